use crate::domain::errors::ForecastResult;
use ndarray::{Array1, Array2, Array3};
use std::sync::Arc;

/// Raw output of a scoring call, still in scaled target space.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    /// (batch, n_reg_targets)
    pub reg: Array2<f32>,
    /// (batch,) probability that the next close is above the current one
    pub cls: Array1<f32>,
}

/// Anything that maps a scaled `(batch, seq_len, n_features)` batch to predictions.
pub trait Scorer: Send + Sync {
    fn predict(&self, batch: &Array3<f32>) -> ForecastResult<ModelOutput>;
}

/// Supervised data for one pass. Weights apply to both heads.
#[derive(Debug, Clone, Copy)]
pub struct TrainingSet<'a> {
    pub x: &'a Array3<f32>,
    pub y_reg: &'a Array2<f32>,
    pub y_cls: &'a Array1<f32>,
    pub weights: Option<&'a Array1<f32>>,
}

impl TrainingSet<'_> {
    pub fn len(&self) -> usize {
        self.x.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A multi-task model (regression + direction heads over a shared trunk)
/// that the training orchestrator can drive epoch by epoch.
pub trait TrainableModel: Scorer {
    /// One pass over `data`; returns the mean training loss.
    fn fit_epoch(&mut self, data: &TrainingSet<'_>, batch_size: usize) -> ForecastResult<f64>;

    /// Loss on `data` without updating parameters.
    fn loss(&self, data: &TrainingSet<'_>) -> ForecastResult<f64>;

    fn checkpoint(&self) -> ForecastResult<Vec<u8>>;

    fn load_checkpoint(&mut self, bytes: &[u8]) -> ForecastResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub seq_len: usize,
    pub n_features: usize,
    pub n_reg_targets: usize,
    pub hidden_units: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

/// Builds fresh models for training and restores persisted checkpoints for scoring.
pub trait ModelFactory: Send + Sync {
    fn build(&self, spec: &ModelSpec) -> ForecastResult<Box<dyn TrainableModel>>;

    fn restore(&self, checkpoint: &[u8]) -> ForecastResult<Arc<dyn Scorer>>;
}
