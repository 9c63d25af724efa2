use crate::domain::errors::{ForecastError, ForecastResult};
use crate::domain::ml::model::Scorer;
use crate::domain::ml::scaler::{MinMaxScaler, Scaler};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Serialized half of a model bundle. The scoring checkpoint lives in its own
/// blob under `model_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub model_key: String,
    pub scaler_x: MinMaxScaler,
    pub scaler_y: MinMaxScaler,
    pub feature_cols: Vec<String>,
    pub target_reg_cols: Vec<String>,
    pub seq_len: usize,
    pub trained_at: DateTime<Utc>,
}

/// Unscaled predictions for a batch of windows.
#[derive(Debug, Clone, PartialEq)]
pub struct BundlePrediction {
    /// (batch, n_reg_targets), in price units
    pub reg: Array2<f32>,
    /// (batch,)
    pub prob_up: Array1<f32>,
}

/// A loaded, ready-to-score model: scorer plus the metadata it was trained with.
#[derive(Clone)]
pub struct ModelBundle {
    pub scorer: Arc<dyn Scorer>,
    pub manifest: BundleManifest,
}

impl fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBundle")
            .field("model_key", &self.manifest.model_key)
            .field("seq_len", &self.manifest.seq_len)
            .field("trained_at", &self.manifest.trained_at)
            .finish()
    }
}

impl ModelBundle {
    pub fn new(scorer: Arc<dyn Scorer>, manifest: BundleManifest) -> Self {
        Self { scorer, manifest }
    }

    pub fn seq_len(&self) -> usize {
        self.manifest.seq_len
    }

    pub fn feature_cols(&self) -> &[String] {
        &self.manifest.feature_cols
    }

    pub fn target_reg_cols(&self) -> &[String] {
        &self.manifest.target_reg_cols
    }

    pub fn target_index(&self, name: &str) -> ForecastResult<usize> {
        self.manifest
            .target_reg_cols
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ForecastError::UnknownColumn {
                name: name.to_string(),
            })
    }

    /// Scales raw windows, scores them in a single call and maps the
    /// regression head back to price units.
    pub fn score_windows(&self, x_seq: &Array3<f32>) -> ForecastResult<BundlePrediction> {
        let (n, seq_len, n_features) = x_seq.dim();
        if seq_len != self.manifest.seq_len || n_features != self.manifest.feature_cols.len() {
            return Err(ForecastError::scoring(format!(
                "bundle expects windows of {}x{}, got {}x{}",
                self.manifest.seq_len,
                self.manifest.feature_cols.len(),
                seq_len,
                n_features
            )));
        }

        let scaled = scale_windows(&self.manifest.scaler_x, x_seq)?;
        let output = self.scorer.predict(&scaled)?;
        if output.reg.nrows() != n || output.cls.len() != n {
            return Err(ForecastError::scoring(format!(
                "scorer returned {} regression rows and {} probabilities for {} windows",
                output.reg.nrows(),
                output.cls.len(),
                n
            )));
        }

        let reg = self.manifest.scaler_y.inverse_transform(output.reg.view())?;
        Ok(BundlePrediction {
            reg,
            prob_up: output.cls,
        })
    }
}

/// Applies a scaler fitted on `(rows, n_features)` to every step of every window.
pub fn scale_windows(scaler: &impl Scaler, x_seq: &Array3<f32>) -> ForecastResult<Array3<f32>> {
    let (n, seq_len, n_features) = x_seq.dim();
    let flat = flatten_windows(x_seq)?;
    let scaled = scaler.transform(flat.view())?;
    scaled
        .as_standard_layout()
        .into_owned()
        .into_shape((n, seq_len, n_features))
        .map_err(|e| ForecastError::scoring(format!("reshape failed: {}", e)))
}

/// Collapses the window and step axes into one: `(n, L, F) -> (n * L, F)`.
pub fn flatten_windows(x_seq: &Array3<f32>) -> ForecastResult<Array2<f32>> {
    let (n, seq_len, n_features) = x_seq.dim();
    x_seq
        .as_standard_layout()
        .into_owned()
        .into_shape((n * seq_len, n_features))
        .map_err(|e| ForecastError::scoring(format!("flatten failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::model::ModelOutput;
    use ndarray::{Array3, array};

    /// Echoes the last scaled value of feature 0 as every regression output.
    struct LastValueScorer;

    impl Scorer for LastValueScorer {
        fn predict(&self, batch: &Array3<f32>) -> ForecastResult<ModelOutput> {
            let (n, seq_len, _) = batch.dim();
            let last = Array1::from_shape_fn(n, |i| batch[[i, seq_len - 1, 0]]);
            let reg = Array2::from_shape_fn((n, 2), |(i, _)| last[i]);
            Ok(ModelOutput {
                reg,
                cls: Array1::from_elem(n, 0.75),
            })
        }
    }

    fn bundle() -> ModelBundle {
        let mut scaler_x = MinMaxScaler::new();
        scaler_x.fit(array![[0.0f32], [10.0]].view()).unwrap();
        let mut scaler_y = MinMaxScaler::new();
        scaler_y.fit(array![[100.0f32, 0.0], [200.0, 10.0]].view()).unwrap();

        ModelBundle::new(
            Arc::new(LastValueScorer),
            BundleManifest {
                model_key: "scorer-1.json".into(),
                scaler_x,
                scaler_y,
                feature_cols: vec!["close".into()],
                target_reg_cols: vec!["close_next".into(), "amp_next".into()],
                seq_len: 2,
                trained_at: Utc::now(),
            },
        )
    }

    #[test]
    fn test_score_windows_round_trips_scaling() {
        let x_seq = Array3::from_shape_vec((2, 2, 1), vec![0.0, 5.0, 5.0, 10.0]).unwrap();
        let pred = bundle().score_windows(&x_seq).unwrap();

        // scaled last values 0.5 and 1.0 -> inverse through scaler_y
        assert_eq!(pred.reg, array![[150.0, 5.0], [200.0, 10.0]]);
        assert_eq!(pred.prob_up.to_vec(), vec![0.75, 0.75]);
    }

    #[test]
    fn test_score_windows_rejects_wrong_shape() {
        let x_seq = Array3::<f32>::zeros((1, 3, 1));
        assert!(bundle().score_windows(&x_seq).is_err());
    }

    #[test]
    fn test_manifest_json_roundtrip_keeps_scalers() {
        let manifest = bundle().manifest;
        let json = serde_json::to_vec(&manifest).unwrap();
        let back: BundleManifest = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn test_target_index() {
        let b = bundle();
        assert_eq!(b.target_index("amp_next").unwrap(), 1);
        assert!(b.target_index("volume_next").is_err());
    }
}
