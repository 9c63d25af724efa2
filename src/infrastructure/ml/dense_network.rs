//! Dense multi-task network
//!
//! A shared ReLU trunk over the flattened window, a linear regression head and
//! a sigmoid direction head. Trained with mini-batch Adam on
//! `mean(w_i * (mse_i + bce_i))`, where the mean runs over the batch size.

use crate::domain::errors::{ForecastError, ForecastResult};
use crate::domain::ml::{ModelFactory, ModelOutput, ModelSpec, Scorer, TrainableModel, TrainingSet};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-7;
const PROB_CLAMP: f32 = 1e-7;

/// Everything a scorer needs; this is the checkpoint format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DenseParams {
    seq_len: usize,
    n_features: usize,
    w_hidden: Array2<f32>,
    b_hidden: Array1<f32>,
    w_reg: Array2<f32>,
    b_reg: Array1<f32>,
    w_cls: Array1<f32>,
    b_cls: f32,
}

struct Forward {
    pre_hidden: Array2<f32>,
    hidden: Array2<f32>,
    reg: Array2<f32>,
    prob: Array1<f32>,
}

impl DenseParams {
    fn init(spec: &ModelSpec, rng: &mut StdRng) -> Self {
        let input_dim = spec.seq_len * spec.n_features;
        let he = (6.0 / input_dim.max(1) as f32).sqrt();
        let glorot_reg = (6.0 / (spec.hidden_units + spec.n_reg_targets) as f32).sqrt();
        let glorot_cls = (6.0 / (spec.hidden_units + 1) as f32).sqrt();

        Self {
            seq_len: spec.seq_len,
            n_features: spec.n_features,
            w_hidden: Array2::from_shape_fn((input_dim, spec.hidden_units), |_| {
                rng.random_range(-he..he)
            }),
            b_hidden: Array1::zeros(spec.hidden_units),
            w_reg: Array2::from_shape_fn((spec.hidden_units, spec.n_reg_targets), |_| {
                rng.random_range(-glorot_reg..glorot_reg)
            }),
            b_reg: Array1::zeros(spec.n_reg_targets),
            w_cls: Array1::from_shape_fn(spec.hidden_units, |_| {
                rng.random_range(-glorot_cls..glorot_cls)
            }),
            b_cls: 0.0,
        }
    }

    fn input_dim(&self) -> usize {
        self.seq_len * self.n_features
    }

    fn flatten(&self, batch: &Array3<f32>) -> ForecastResult<Array2<f32>> {
        let (n, seq_len, n_features) = batch.dim();
        if seq_len != self.seq_len || n_features != self.n_features {
            return Err(ForecastError::scoring(format!(
                "network expects windows of {}x{}, got {}x{}",
                self.seq_len, self.n_features, seq_len, n_features
            )));
        }
        batch
            .as_standard_layout()
            .into_owned()
            .into_shape((n, self.input_dim()))
            .map_err(|e| ForecastError::scoring(format!("flatten failed: {}", e)))
    }

    fn forward(&self, x: ArrayView2<f32>) -> Forward {
        let pre_hidden = x.dot(&self.w_hidden) + &self.b_hidden;
        let hidden = pre_hidden.mapv(|v| v.max(0.0));
        let reg = hidden.dot(&self.w_reg) + &self.b_reg;
        let prob = (hidden.dot(&self.w_cls) + self.b_cls).mapv(sigmoid);
        Forward {
            pre_hidden,
            hidden,
            reg,
            prob,
        }
    }
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

fn sample_losses(
    reg: &Array2<f32>,
    prob: &Array1<f32>,
    y_reg: ArrayView2<f32>,
    y_cls: &[f32],
) -> Vec<f64> {
    let n_reg = reg.ncols().max(1) as f64;
    reg.outer_iter()
        .zip(y_reg.outer_iter())
        .zip(prob.iter().zip(y_cls))
        .map(|((r, y), (p, t))| {
            let mse = r
                .iter()
                .zip(y.iter())
                .map(|(a, b)| ((a - b) as f64).powi(2))
                .sum::<f64>()
                / n_reg;
            let p = p.clamp(PROB_CLAMP, 1.0 - PROB_CLAMP) as f64;
            let t = *t as f64;
            let bce = -(t * p.ln() + (1.0 - t) * (1.0 - p).ln());
            mse + bce
        })
        .collect()
}

#[derive(Debug, Clone)]
struct AdamSlot<D: ndarray::Dimension> {
    m: ndarray::Array<f32, D>,
    v: ndarray::Array<f32, D>,
}

impl<D: ndarray::Dimension> AdamSlot<D> {
    fn like(param: &ndarray::Array<f32, D>) -> Self {
        Self {
            m: ndarray::Array::zeros(param.raw_dim()),
            v: ndarray::Array::zeros(param.raw_dim()),
        }
    }

    fn step(
        &mut self,
        param: &mut ndarray::Array<f32, D>,
        grad: &ndarray::Array<f32, D>,
        lr_t: f32,
    ) {
        Zip::from(param)
            .and(&mut self.m)
            .and(&mut self.v)
            .and(grad)
            .for_each(|p, m, v, &g| {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + EPSILON);
            });
    }
}

struct Adam {
    learning_rate: f32,
    t: i32,
    w_hidden: AdamSlot<ndarray::Ix2>,
    b_hidden: AdamSlot<ndarray::Ix1>,
    w_reg: AdamSlot<ndarray::Ix2>,
    b_reg: AdamSlot<ndarray::Ix1>,
    w_cls: AdamSlot<ndarray::Ix1>,
    b_cls: (f32, f32),
}

impl Adam {
    fn new(params: &DenseParams, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            t: 0,
            w_hidden: AdamSlot::like(&params.w_hidden),
            b_hidden: AdamSlot::like(&params.b_hidden),
            w_reg: AdamSlot::like(&params.w_reg),
            b_reg: AdamSlot::like(&params.b_reg),
            w_cls: AdamSlot::like(&params.w_cls),
            b_cls: (0.0, 0.0),
        }
    }

    fn apply(&mut self, params: &mut DenseParams, grads: &Gradients) {
        self.t += 1;
        let lr_t =
            self.learning_rate * (1.0 - BETA2.powi(self.t)).sqrt() / (1.0 - BETA1.powi(self.t));

        self.w_hidden.step(&mut params.w_hidden, &grads.w_hidden, lr_t);
        self.b_hidden.step(&mut params.b_hidden, &grads.b_hidden, lr_t);
        self.w_reg.step(&mut params.w_reg, &grads.w_reg, lr_t);
        self.b_reg.step(&mut params.b_reg, &grads.b_reg, lr_t);
        self.w_cls.step(&mut params.w_cls, &grads.w_cls, lr_t);

        let (m, v) = &mut self.b_cls;
        *m = BETA1 * *m + (1.0 - BETA1) * grads.b_cls;
        *v = BETA2 * *v + (1.0 - BETA2) * grads.b_cls * grads.b_cls;
        params.b_cls -= lr_t * *m / (v.sqrt() + EPSILON);
    }
}

struct Gradients {
    w_hidden: Array2<f32>,
    b_hidden: Array1<f32>,
    w_reg: Array2<f32>,
    b_reg: Array1<f32>,
    w_cls: Array1<f32>,
    b_cls: f32,
}

/// In-process multi-task scorer; the training counterpart is
/// [`DenseMultitaskNetwork`].
pub struct DenseScorer {
    params: DenseParams,
}

impl Scorer for DenseScorer {
    fn predict(&self, batch: &Array3<f32>) -> ForecastResult<ModelOutput> {
        let x = self.params.flatten(batch)?;
        let out = self.params.forward(x.view());
        Ok(ModelOutput {
            reg: out.reg,
            cls: out.prob,
        })
    }
}

pub struct DenseMultitaskNetwork {
    params: DenseParams,
    optimizer: Adam,
    rng: StdRng,
}

impl DenseMultitaskNetwork {
    pub fn new(spec: &ModelSpec) -> ForecastResult<Self> {
        if spec.seq_len == 0
            || spec.n_features == 0
            || spec.n_reg_targets == 0
            || spec.hidden_units == 0
        {
            return Err(ForecastError::InvalidParameter {
                name: "model_spec",
                reason: format!("all dimensions must be positive, got {:?}", spec),
            });
        }
        if !(spec.learning_rate > 0.0 && spec.learning_rate.is_finite()) {
            return Err(ForecastError::InvalidParameter {
                name: "learning_rate",
                reason: format!("must be a positive number, got {}", spec.learning_rate),
            });
        }

        let mut rng = StdRng::seed_from_u64(spec.seed);
        let params = DenseParams::init(spec, &mut rng);
        let optimizer = Adam::new(&params, spec.learning_rate as f32);
        Ok(Self {
            params,
            optimizer,
            rng,
        })
    }

    fn check_targets(&self, data: &TrainingSet<'_>) -> ForecastResult<()> {
        let n = data.len();
        if data.y_reg.nrows() != n {
            return Err(ForecastError::LengthMismatch {
                features: n,
                targets: data.y_reg.nrows(),
                what: "regression target",
            });
        }
        if data.y_reg.ncols() != self.params.w_reg.ncols() {
            return Err(ForecastError::scoring(format!(
                "network has {} regression outputs, targets have {}",
                self.params.w_reg.ncols(),
                data.y_reg.ncols()
            )));
        }
        if data.y_cls.len() != n {
            return Err(ForecastError::LengthMismatch {
                features: n,
                targets: data.y_cls.len(),
                what: "direction target",
            });
        }
        if let Some(w) = data.weights
            && w.len() != n
        {
            return Err(ForecastError::LengthMismatch {
                features: n,
                targets: w.len(),
                what: "sample weight",
            });
        }
        Ok(())
    }

    fn gradients(
        &self,
        x: ArrayView2<f32>,
        y_reg: ArrayView2<f32>,
        y_cls: &Array1<f32>,
        weights: &Array1<f32>,
    ) -> (Gradients, f64) {
        let batch = x.nrows() as f32;
        let fwd = self.params.forward(x);
        let n_reg = y_reg.ncols() as f32;

        let y_cls_slice = y_cls.to_vec();
        let losses = sample_losses(&fwd.reg, &fwd.prob, y_reg, &y_cls_slice);
        let loss = losses
            .iter()
            .zip(weights.iter())
            .map(|(l, w)| l * *w as f64)
            .sum::<f64>()
            / batch as f64;

        let coef = weights / batch;
        let coef_col = coef.view().insert_axis(Axis(1));

        let d_reg = (&fwd.reg - &y_reg) * (2.0 / n_reg) * &coef_col;
        let d_logit = (&fwd.prob - y_cls) * &coef;

        let w_reg = fwd.hidden.t().dot(&d_reg);
        let b_reg = d_reg.sum_axis(Axis(0));
        let w_cls = fwd.hidden.t().dot(&d_logit);
        let b_cls = d_logit.sum();

        let mut d_hidden = d_reg.dot(&self.params.w_reg.t());
        let cls_term = d_logit
            .view()
            .insert_axis(Axis(1))
            .dot(&self.params.w_cls.view().insert_axis(Axis(0)));
        d_hidden += &cls_term;
        Zip::from(&mut d_hidden)
            .and(&fwd.pre_hidden)
            .for_each(|d, &pre| {
                if pre <= 0.0 {
                    *d = 0.0;
                }
            });

        let w_hidden = x.t().dot(&d_hidden);
        let b_hidden = d_hidden.sum_axis(Axis(0));

        (
            Gradients {
                w_hidden,
                b_hidden,
                w_reg,
                b_reg,
                w_cls,
                b_cls,
            },
            loss,
        )
    }
}

impl Scorer for DenseMultitaskNetwork {
    fn predict(&self, batch: &Array3<f32>) -> ForecastResult<ModelOutput> {
        let x = self.params.flatten(batch)?;
        let out = self.params.forward(x.view());
        Ok(ModelOutput {
            reg: out.reg,
            cls: out.prob,
        })
    }
}

impl TrainableModel for DenseMultitaskNetwork {
    fn fit_epoch(&mut self, data: &TrainingSet<'_>, batch_size: usize) -> ForecastResult<f64> {
        self.check_targets(data)?;
        let n = data.len();
        if n == 0 {
            return Err(ForecastError::InsufficientData { rows: 0, seq_len: self.params.seq_len });
        }

        let x = self.params.flatten(data.x)?;
        let weights = data
            .weights
            .cloned()
            .unwrap_or_else(|| Array1::ones(n));

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut self.rng);

        let mut total = 0.0;
        for chunk in order.chunks(batch_size.max(1)) {
            let xb = x.select(Axis(0), chunk);
            let yb = data.y_reg.select(Axis(0), chunk);
            let cb = data.y_cls.select(Axis(0), chunk);
            let wb = weights.select(Axis(0), chunk);

            let (grads, loss) = self.gradients(xb.view(), yb.view(), &cb, &wb);
            self.optimizer.apply(&mut self.params, &grads);
            total += loss * chunk.len() as f64;
        }

        Ok(total / n as f64)
    }

    fn loss(&self, data: &TrainingSet<'_>) -> ForecastResult<f64> {
        self.check_targets(data)?;
        let n = data.len();
        if n == 0 {
            return Ok(0.0);
        }

        let x = self.params.flatten(data.x)?;
        let out = self.params.forward(x.view());
        let y_cls = data.y_cls.to_vec();
        let losses = sample_losses(&out.reg, &out.prob, data.y_reg.view(), &y_cls);
        let total: f64 = match data.weights {
            Some(w) => losses.iter().zip(w.iter()).map(|(l, w)| l * *w as f64).sum(),
            None => losses.iter().sum(),
        };
        Ok(total / n as f64)
    }

    fn checkpoint(&self) -> ForecastResult<Vec<u8>> {
        serde_json::to_vec(&self.params)
            .map_err(|e| ForecastError::scoring(format!("failed to serialize checkpoint: {}", e)))
    }

    fn load_checkpoint(&mut self, bytes: &[u8]) -> ForecastResult<()> {
        let params = decode_params(bytes)?;
        if params.w_hidden.dim() != self.params.w_hidden.dim()
            || params.w_reg.dim() != self.params.w_reg.dim()
        {
            return Err(ForecastError::scoring("checkpoint shape does not match the network"));
        }
        self.params = params;
        Ok(())
    }
}

fn decode_params(bytes: &[u8]) -> ForecastResult<DenseParams> {
    let params: DenseParams = serde_json::from_slice(bytes)
        .map_err(|e| ForecastError::scoring(format!("failed to decode checkpoint: {}", e)))?;

    let hidden = params.b_hidden.len();
    let n_reg = params.b_reg.len();
    if params.w_hidden.dim() != (params.seq_len * params.n_features, hidden)
        || params.w_reg.dim() != (hidden, n_reg)
        || params.w_cls.len() != hidden
    {
        return Err(ForecastError::scoring("checkpoint has inconsistent layer shapes"));
    }
    Ok(params)
}

/// Builds [`DenseMultitaskNetwork`]s and restores their checkpoints as [`DenseScorer`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseNetworkFactory;

impl ModelFactory for DenseNetworkFactory {
    fn build(&self, spec: &ModelSpec) -> ForecastResult<Box<dyn TrainableModel>> {
        Ok(Box::new(DenseMultitaskNetwork::new(spec)?))
    }

    fn restore(&self, checkpoint: &[u8]) -> ForecastResult<Arc<dyn Scorer>> {
        Ok(Arc::new(DenseScorer {
            params: decode_params(checkpoint)?,
        }))
    }
}
