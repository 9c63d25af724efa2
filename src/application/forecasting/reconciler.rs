use crate::application::ml::BundleCache;
use crate::domain::errors::{ForecastError, ForecastResult};
use crate::domain::forecasting::{DegradedReason, FuturesPoint, FuturesRecord};
use crate::domain::ml::{ModelBundle, build_inference_sequences};
use crate::domain::ports::{FeatureTargetProvider, HistorySource};
use crate::domain::repositories::FuturesRepository;
use crate::domain::types::{CLOSE_TARGET, Candle, FeatureTargetFrame};
use crate::infrastructure::observability::ForecastMetrics;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use ndarray::Axis;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_LOOKBACK_DAYS: u32 = 3;

/// Fewest candles worth building features from.
const MIN_CANDLES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub requested: usize,
    pub upserted: usize,
    pub skipped: usize,
    pub degraded: Option<DegradedReason>,
}

impl ReconcileOutcome {
    fn nothing(requested: usize, reason: Option<DegradedReason>) -> Self {
        Self {
            requested,
            upserted: 0,
            skipped: requested,
            degraded: reason,
        }
    }
}

/// Stores one-step-ahead predictions beside the candles they predicted.
pub struct FuturesReconciler {
    history: Arc<dyn HistorySource>,
    provider: Arc<dyn FeatureTargetProvider>,
    cache: Arc<BundleCache>,
    repository: Arc<dyn FuturesRepository>,
    lookback_days: u32,
    metrics: Option<ForecastMetrics>,
}

impl FuturesReconciler {
    pub fn new(
        history: Arc<dyn HistorySource>,
        provider: Arc<dyn FeatureTargetProvider>,
        cache: Arc<BundleCache>,
        repository: Arc<dyn FuturesRepository>,
    ) -> Self {
        Self {
            history,
            provider,
            cache,
            repository,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            metrics: None,
        }
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn with_metrics(mut self, metrics: ForecastMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// For each time `T`, predicts `close` at `T` from the window ending at the
    /// candle before `T` and upserts `(T, pred, real, |pred - real|)`.
    ///
    /// Times without a predecessor candle, or whose predecessor has fewer than
    /// `seq_len - 1` rows of history before it, are skipped.
    pub async fn reconcile(&self, times: &[DateTime<Utc>]) -> ReconcileOutcome {
        let mut times = times.to_vec();
        times.sort();
        times.dedup();
        let requested = times.len();
        let Some(&earliest) = times.first() else {
            return ReconcileOutcome::nothing(0, None);
        };

        let since = earliest - Duration::days(i64::from(self.lookback_days));
        let candles = match self.history.fetch_since(since).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!("Reconcile could not load candles: {:#}", e);
                return ReconcileOutcome::nothing(
                    requested,
                    Some(ForecastError::upstream(e).into()),
                );
            }
        };
        if candles.len() < MIN_CANDLES {
            return ReconcileOutcome::nothing(
                requested,
                Some(DegradedReason::InsufficientData(format!(
                    "{} candles since {}",
                    candles.len(),
                    since
                ))),
            );
        }

        let records = match self.build_records(&candles, &times).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Reconcile degraded: {}", e);
                return ReconcileOutcome::nothing(requested, Some(e.into()));
            }
        };
        if records.is_empty() {
            return ReconcileOutcome::nothing(requested, None);
        }

        match self.repository.upsert_many(&records).await {
            Ok(upserted) => {
                info!("Reconciled {} of {} requested futures", upserted, requested);
                if let Some(metrics) = &self.metrics {
                    metrics.futures_upserts_total.inc_by(upserted as f64);
                }
                ReconcileOutcome {
                    requested,
                    upserted,
                    skipped: requested - records.len(),
                    degraded: None,
                }
            }
            Err(e) => {
                warn!("Failed to upsert futures: {:#}", e);
                ReconcileOutcome::nothing(requested, Some(ForecastError::upstream(e).into()))
            }
        }
    }

    async fn build_records(
        &self,
        candles: &[Candle],
        times: &[DateTime<Utc>],
    ) -> ForecastResult<Vec<FuturesRecord>> {
        let frame = self.provider.build(candles)?;
        let bundle = self.cache.get().await?;
        records_for_times(&bundle, &frame, times)
    }

    /// Reconciles every candle in the trailing `hours`.
    pub async fn update_recent(&self, hours: u32) -> ReconcileOutcome {
        let since = Utc::now() - Duration::hours(i64::from(hours));
        match self.history.fetch_since(since).await {
            Ok(candles) => {
                let times: Vec<_> = candles.iter().map(|c| c.timestamp).collect();
                self.reconcile(&times).await
            }
            Err(e) => {
                warn!("Futures update could not list recent candles: {:#}", e);
                ReconcileOutcome::nothing(0, Some(ForecastError::upstream(e).into()))
            }
        }
    }

    /// Rolling MAPE (%) over the newest `n` reconciled records.
    pub async fn rolling_mape(&self, n: usize) -> Result<Option<f64>> {
        let mape = self.repository.rolling_mape(n).await?;
        if let Some(metrics) = &self.metrics {
            metrics.set_rolling_mape(mape);
        }
        Ok(mape)
    }

    /// Stored records in ascending time; with `limit`, only the newest ones.
    pub async fn list(
        &self,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: Option<usize>,
    ) -> Result<Vec<FuturesPoint>> {
        let records = self.repository.find(range, limit).await?;
        Ok(records.iter().map(FuturesRecord::sanitized).collect())
    }
}

/// Scores the windows ending at each requested time's predecessor in a single
/// batch.
fn records_for_times(
    bundle: &ModelBundle,
    frame: &FeatureTargetFrame,
    times: &[DateTime<Utc>],
) -> ForecastResult<Vec<FuturesRecord>> {
    let seq_len = bundle.seq_len();
    let next_to_prev: HashMap<DateTime<Utc>, usize> = frame
        .rows
        .windows(2)
        .enumerate()
        .map(|(i, pair)| (pair[1].timestamp, i))
        .collect();

    let targets: Vec<(DateTime<Utc>, usize)> = times
        .iter()
        .filter_map(|t| next_to_prev.get(t).map(|&prev| (*t, prev)))
        .filter(|(_, prev)| *prev + 1 >= seq_len)
        .collect();
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let features = frame.features.select(bundle.feature_cols())?;
    let (x_all, _) = build_inference_sequences(features.values.view(), seq_len)?;
    // Window j ends at row seq_len - 1 + j.
    let windows: Vec<usize> = targets.iter().map(|(_, prev)| prev + 1 - seq_len).collect();
    let x_seq = x_all.select(Axis(0), &windows);

    let prediction = bundle.score_windows(&x_seq)?;
    let close_idx = bundle.target_index(CLOSE_TARGET)?;

    let records: Vec<FuturesRecord> = targets
        .iter()
        .enumerate()
        .filter_map(|(j, (time, prev))| {
            let pred_close = f64::from(prediction.reg[[j, close_idx]]);
            // Non-finite predictions are skipped, like in the series.
            if !pred_close.is_finite() {
                return None;
            }
            let real_close = frame.rows[prev + 1].close;
            Some(FuturesRecord::reconciled(*time, pred_close, real_close))
        })
        .collect();
    if records.len() < targets.len() {
        warn!(
            "Skipped {} non-finite predictions out of {}",
            targets.len() - records.len(),
            targets.len()
        );
    }
    Ok(records)
}
