//! Training Orchestrator
//!
//! One training run end to end: load history, build windows, split in time,
//! weight recent samples, fit scalers on the training partition only, train
//! with early stopping, evaluate `close_next` on the holdout and publish a new
//! model bundle. Every run, successful or not, produces a `JobOutcome` and a
//! job log entry.

use crate::config::TrainingEnvConfig;
use crate::domain::errors::{ForecastError, ForecastResult};
use crate::domain::forecasting::{JobOutcome, JobStatus, TRAIN_JOB};
use crate::domain::ml::bundle::{flatten_windows, scale_windows};
use crate::domain::ml::{
    BundleManifest, HoldoutMetrics, MinMaxScaler, ModelFactory, ModelSpec, Scaler,
    TrainableModel, TrainingSet, build_sequences, exp_sample_weights, temporal_split_index,
};
use crate::domain::ports::{BundleStore, FeatureTargetProvider, HistorySource};
use crate::domain::repositories::JobLogRepository;
use crate::domain::types::CLOSE_TARGET;
use crate::infrastructure::observability::ForecastMetrics;
use chrono::{DateTime, Duration, Utc};
use ndarray::{Array1, Array2, Array3, s};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Largest accepted training window, in days.
pub const MAX_TRAINING_DAYS: u32 = 90;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub lookback_days: u32,
    pub alpha_decay: f64,
    pub seq_len: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub patience: usize,
    pub hidden_units: usize,
    pub min_history_rows: usize,
    pub holdout_max: usize,
    pub train_ratio: f64,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::from(&TrainingEnvConfig::default())
    }
}

impl From<&TrainingEnvConfig> for TrainingConfig {
    fn from(env: &TrainingEnvConfig) -> Self {
        Self {
            lookback_days: env.lookback_days,
            alpha_decay: env.alpha_decay,
            seq_len: env.seq_len,
            epochs: env.epochs,
            batch_size: env.batch_size,
            learning_rate: env.learning_rate,
            patience: env.patience,
            hidden_units: env.hidden_units,
            min_history_rows: env.min_history_rows,
            holdout_max: env.holdout_max,
            train_ratio: env.train_ratio,
            seed: env.seed,
        }
    }
}

/// What a successful run produced, before it becomes a `JobOutcome`.
#[derive(Debug, Clone)]
struct TrainReport {
    samples: usize,
    split_index: usize,
    epochs_ran: usize,
    best_val_loss: f64,
    metrics: HoldoutMetrics,
    model_key: String,
}

struct FitSummary {
    model: Box<dyn TrainableModel>,
    checkpoint: Vec<u8>,
    epochs_ran: usize,
    best_val_loss: f64,
}

/// Scaled, split training data, owned so it can move to a blocking thread.
struct PreparedData {
    x_train: Array3<f32>,
    y_train: Array2<f32>,
    c_train: Array1<f32>,
    weights: Array1<f32>,
    x_val: Array3<f32>,
    y_val: Array2<f32>,
    c_val: Array1<f32>,
}

pub struct TrainingOrchestrator {
    history: Arc<dyn HistorySource>,
    provider: Arc<dyn FeatureTargetProvider>,
    factory: Arc<dyn ModelFactory>,
    store: Arc<dyn BundleStore>,
    job_log: Arc<dyn JobLogRepository>,
    manifest_key: String,
    config: TrainingConfig,
    metrics: Option<ForecastMetrics>,
}

impl TrainingOrchestrator {
    pub fn new(
        history: Arc<dyn HistorySource>,
        provider: Arc<dyn FeatureTargetProvider>,
        factory: Arc<dyn ModelFactory>,
        store: Arc<dyn BundleStore>,
        job_log: Arc<dyn JobLogRepository>,
        manifest_key: impl Into<String>,
        config: TrainingConfig,
    ) -> Self {
        Self {
            history,
            provider,
            factory,
            store,
            job_log,
            manifest_key: manifest_key.into(),
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ForecastMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Trains on the trailing `days` of history with recency decay `decay`.
    /// Defaults come from the configuration. Never fails: errors become a
    /// `JobOutcome` with status `error`.
    pub async fn run_training(&self, days: Option<u32>, decay: Option<f64>) -> JobOutcome {
        let started_at = Utc::now();
        info!("Training run started (days={:?}, decay={:?})", days, decay);

        let result = self.train(days, decay, started_at).await;
        let finished_at = Utc::now();

        let outcome = match result {
            Ok(report) => {
                info!(
                    "Training finished: {} windows, split at {}, {} epochs, holdout MAPE {:.4}%",
                    report.samples, report.split_index, report.epochs_ran, report.metrics.mape
                );
                JobOutcome {
                    job: TRAIN_JOB.to_string(),
                    status: JobStatus::Ok,
                    samples: Some(report.samples),
                    split_index: Some(report.split_index),
                    epochs_ran: Some(report.epochs_ran),
                    best_val_loss: Some(report.best_val_loss),
                    metrics: Some(report.metrics),
                    message: format!(
                        "published {} (close_next MAE {:.4}, MAPE {:.4}%)",
                        report.model_key, report.metrics.mae, report.metrics.mape
                    ),
                    started_at,
                    finished_at,
                }
            }
            Err(e) => {
                error!("Training run failed: {}", e);
                JobOutcome::failed(TRAIN_JOB, e.to_string(), started_at, finished_at)
            }
        };

        if let Err(e) = self.job_log.record(&outcome.log_entry()).await {
            warn!("Failed to record training job log: {:#}", e);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_training(outcome.is_ok(), outcome.elapsed_seconds());
            if let (Some(loss), Some(holdout)) = (outcome.best_val_loss, outcome.metrics) {
                metrics.training_best_val_loss.set(loss);
                metrics.holdout_mape.set(holdout.mape);
            }
        }

        outcome
    }

    async fn train(
        &self,
        days: Option<u32>,
        decay: Option<f64>,
        started_at: DateTime<Utc>,
    ) -> ForecastResult<TrainReport> {
        let cfg = &self.config;

        // 1. Parameters
        let days = days.unwrap_or(cfg.lookback_days);
        if !(1..=MAX_TRAINING_DAYS).contains(&days) {
            return Err(ForecastError::InvalidParameter {
                name: "days",
                reason: format!("must be between 1 and {}, got {}", MAX_TRAINING_DAYS, days),
            });
        }
        let alpha = decay.unwrap_or(cfg.alpha_decay);
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ForecastError::InvalidParameter {
                name: "decay",
                reason: format!("must be in (0, 1], got {}", alpha),
            });
        }

        // 2. History
        let candles = self
            .history
            .fetch_since(started_at - Duration::days(i64::from(days)))
            .await
            .map_err(ForecastError::upstream)?;
        if candles.len() < cfg.min_history_rows {
            return Err(ForecastError::InsufficientHistory {
                rows: candles.len(),
                required: cfg.min_history_rows,
            });
        }

        // 3. Features and windows
        let frame = self.provider.build(&candles)?;
        let dataset = build_sequences(
            frame.features.values.view(),
            frame.targets.values.view(),
            frame.direction.view(),
            cfg.seq_len,
        )?;
        let samples = dataset.len();

        // 4. Temporal split and recency weights
        let split = temporal_split_index(samples, cfg.holdout_max, cfg.train_ratio);
        if split == 0 {
            return Err(ForecastError::InsufficientData {
                rows: samples,
                seq_len: cfg.seq_len,
            });
        }
        debug!("Split {} windows at {}", samples, split);

        let x_train = dataset.x_seq.slice(s![..split, .., ..]).to_owned();
        let x_val = dataset.x_seq.slice(s![split.., .., ..]).to_owned();
        let y_train = dataset.y_reg.slice(s![..split, ..]).to_owned();
        let y_val = dataset.y_reg.slice(s![split.., ..]).to_owned();
        let c_all = dataset.y_cls.mapv(f32::from);
        let c_train = c_all.slice(s![..split]).to_owned();
        let c_val = c_all.slice(s![split..]).to_owned();
        let weights = exp_sample_weights(split, alpha);

        // 5. Scalers fitted on the training partition only
        let mut scaler_x = MinMaxScaler::new();
        scaler_x.fit(flatten_windows(&x_train)?.view())?;
        let mut scaler_y = MinMaxScaler::new();
        scaler_y.fit(y_train.view())?;

        let data = PreparedData {
            x_train: scale_windows(&scaler_x, &x_train)?,
            y_train: scaler_y.transform(y_train.view())?,
            c_train,
            weights,
            x_val: scale_windows(&scaler_x, &x_val)?,
            y_val: scaler_y.transform(y_val.view())?,
            c_val,
        };

        // 6. Fit with early stopping
        let spec = ModelSpec {
            seq_len: cfg.seq_len,
            n_features: frame.features.columns.len(),
            n_reg_targets: frame.targets.columns.len(),
            hidden_units: cfg.hidden_units,
            learning_rate: cfg.learning_rate,
            seed: cfg.seed,
        };
        let model = self.factory.build(&spec)?;
        let (epochs, batch_size, patience) = (cfg.epochs, cfg.batch_size, cfg.patience);
        let (summary, data) = tokio::task::spawn_blocking(move || {
            let summary = fit_with_early_stopping(model, &data, epochs, batch_size, patience);
            (summary, data)
        })
        .await
        .map_err(|e| ForecastError::scoring(format!("training task failed: {}", e)))?;
        let summary = summary?;

        // 7. Holdout evaluation in price units
        let output = summary.model.predict(&data.x_val)?;
        let pred = scaler_y.inverse_transform(output.reg.view())?;
        let close_idx = frame.targets.column_index(CLOSE_TARGET)?;
        let y_true: Vec<f64> = y_val.column(close_idx).iter().map(|v| f64::from(*v)).collect();
        let y_pred: Vec<f64> = pred.column(close_idx).iter().map(|v| f64::from(*v)).collect();
        let metrics = HoldoutMetrics::compute(&y_true, &y_pred);

        // 8. Publish: checkpoint first, manifest last
        let model_key = format!("scorer-{}.json", started_at.timestamp_millis());
        self.store
            .put(&model_key, summary.checkpoint)
            .await
            .map_err(ForecastError::upstream)?;

        let manifest = BundleManifest {
            model_key: model_key.clone(),
            scaler_x,
            scaler_y,
            feature_cols: frame.features.columns.clone(),
            target_reg_cols: frame.targets.columns.clone(),
            seq_len: cfg.seq_len,
            trained_at: Utc::now(),
        };
        let manifest_bytes = serde_json::to_vec(&manifest)
            .map_err(|e| ForecastError::scoring(format!("failed to serialize manifest: {}", e)))?;
        self.store
            .put(&self.manifest_key, manifest_bytes)
            .await
            .map_err(ForecastError::upstream)?;

        Ok(TrainReport {
            samples,
            split_index: split,
            epochs_ran: summary.epochs_ran,
            best_val_loss: summary.best_val_loss,
            metrics,
            model_key,
        })
    }
}

fn fit_with_early_stopping(
    mut model: Box<dyn TrainableModel>,
    data: &PreparedData,
    epochs: usize,
    batch_size: usize,
    patience: usize,
) -> ForecastResult<FitSummary> {
    let train = TrainingSet {
        x: &data.x_train,
        y_reg: &data.y_train,
        y_cls: &data.c_train,
        weights: Some(&data.weights),
    };
    let val = TrainingSet {
        x: &data.x_val,
        y_reg: &data.y_val,
        y_cls: &data.c_val,
        weights: None,
    };

    let mut best: Option<(f64, Vec<u8>)> = None;
    let mut since_best = 0usize;
    let mut epochs_ran = 0usize;

    for epoch in 0..epochs {
        let train_loss = model.fit_epoch(&train, batch_size)?;
        let val_loss = model.loss(&val)?;
        epochs_ran = epoch + 1;
        debug!(
            "epoch {}/{}: loss={:.6} val_loss={:.6}",
            epochs_ran, epochs, train_loss, val_loss
        );

        let improved = val_loss.is_finite() && best.as_ref().is_none_or(|(b, _)| val_loss < *b);
        if improved {
            best = Some((val_loss, model.checkpoint()?));
            since_best = 0;
        } else {
            since_best += 1;
            if since_best >= patience {
                debug!("Early stopping after {} epochs", epochs_ran);
                break;
            }
        }
    }

    let (best_val_loss, checkpoint) =
        best.ok_or_else(|| ForecastError::scoring("validation loss never became finite"))?;
    model.load_checkpoint(&checkpoint)?;

    Ok(FitSummary {
        model,
        checkpoint,
        epochs_ran,
        best_val_loss,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::{ModelOutput, Scorer};
    use ndarray::Array3;

    /// Model whose validation loss follows a fixed script, one value per epoch.
    struct ScriptedModel {
        losses: Vec<f64>,
        epoch: usize,
    }

    impl Scorer for ScriptedModel {
        fn predict(&self, batch: &Array3<f32>) -> ForecastResult<ModelOutput> {
            let n = batch.shape()[0];
            Ok(ModelOutput {
                reg: Array2::zeros((n, 1)),
                cls: Array1::zeros(n),
            })
        }
    }

    impl TrainableModel for ScriptedModel {
        fn fit_epoch(
            &mut self,
            _data: &TrainingSet<'_>,
            _batch_size: usize,
        ) -> ForecastResult<f64> {
            self.epoch += 1;
            Ok(1.0)
        }

        fn loss(&self, _data: &TrainingSet<'_>) -> ForecastResult<f64> {
            Ok(self.losses[self.epoch - 1])
        }

        fn checkpoint(&self) -> ForecastResult<Vec<u8>> {
            Ok(vec![self.epoch as u8])
        }

        fn load_checkpoint(&mut self, bytes: &[u8]) -> ForecastResult<()> {
            self.epoch = bytes[0] as usize;
            Ok(())
        }
    }

    fn prepared() -> PreparedData {
        PreparedData {
            x_train: Array3::zeros((4, 2, 1)),
            y_train: Array2::zeros((4, 1)),
            c_train: Array1::zeros(4),
            weights: Array1::ones(4),
            x_val: Array3::zeros((2, 2, 1)),
            y_val: Array2::zeros((2, 1)),
            c_val: Array1::zeros(2),
        }
    }

    #[test]
    fn test_early_stopping_keeps_best_epoch() {
        let model = ScriptedModel {
            losses: vec![5.0, 3.0, 4.0, 4.5, 6.0, 1.0],
            epoch: 0,
        };
        let summary = fit_with_early_stopping(Box::new(model), &prepared(), 6, 2, 2).unwrap();

        assert_eq!(summary.epochs_ran, 4);
        assert_eq!(summary.best_val_loss, 3.0);
        assert_eq!(summary.checkpoint, vec![2]);
    }

    #[test]
    fn test_runs_all_epochs_while_improving() {
        let model = ScriptedModel {
            losses: vec![5.0, 4.0, 3.0],
            epoch: 0,
        };
        let summary = fit_with_early_stopping(Box::new(model), &prepared(), 3, 2, 1).unwrap();
        assert_eq!(summary.epochs_ran, 3);
        assert_eq!(summary.best_val_loss, 3.0);
    }

    #[test]
    fn test_non_finite_losses_fail() {
        let model = ScriptedModel {
            losses: vec![f64::NAN, f64::NAN],
            epoch: 0,
        };
        assert!(fit_with_early_stopping(Box::new(model), &prepared(), 2, 2, 5).is_err());
    }

    /// Fails unless training batches are weighted and validation is not.
    struct WeightCheckingModel;

    impl Scorer for WeightCheckingModel {
        fn predict(&self, batch: &Array3<f32>) -> ForecastResult<ModelOutput> {
            let n = batch.shape()[0];
            Ok(ModelOutput {
                reg: Array2::zeros((n, 1)),
                cls: Array1::zeros(n),
            })
        }
    }

    impl TrainableModel for WeightCheckingModel {
        fn fit_epoch(&mut self, data: &TrainingSet<'_>, _batch_size: usize) -> ForecastResult<f64> {
            match data.weights {
                Some(w) if w.len() == data.len() => Ok(1.0),
                _ => Err(ForecastError::scoring("training set without matching weights")),
            }
        }

        fn loss(&self, data: &TrainingSet<'_>) -> ForecastResult<f64> {
            match data.weights {
                None => Ok(0.5),
                Some(_) => Err(ForecastError::scoring("validation set is weighted")),
            }
        }

        fn checkpoint(&self) -> ForecastResult<Vec<u8>> {
            Ok(Vec::new())
        }

        fn load_checkpoint(&mut self, _bytes: &[u8]) -> ForecastResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_weights_apply_to_training_only() {
        let summary = fit_with_early_stopping(Box::new(WeightCheckingModel), &prepared(), 2, 2, 1);
        assert_eq!(summary.unwrap().best_val_loss, 0.5);
    }

    #[test]
    fn test_default_config_matches_env_defaults() {
        let config = TrainingConfig::default();
        assert_eq!(config.seq_len, 48);
        assert_eq!(config.min_history_rows, 500);
    }
}
