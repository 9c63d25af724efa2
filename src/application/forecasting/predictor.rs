use crate::application::ml::BundleCache;
use crate::domain::errors::{ForecastError, ForecastResult};
use crate::domain::forecasting::{
    DegradedReason, DirectionPrediction, PredictionError, SeriesOutcome, SeriesPoint,
};
use crate::domain::ml::{ModelBundle, build_inference_sequences};
use crate::domain::ports::{FeatureTargetProvider, HistorySource};
use crate::domain::types::{AMP_TARGET, CLOSE_TARGET, Candle, FeatureTargetFrame};
use crate::infrastructure::observability::ForecastMetrics;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_FALLBACK_DAYS: u32 = 90;
pub const DEFAULT_MIN_ROWS: usize = 30;

/// Batch predictions over a historical window, with per-point error against
/// the realized next candle.
pub struct SeriesPredictor {
    history: Arc<dyn HistorySource>,
    provider: Arc<dyn FeatureTargetProvider>,
    cache: Arc<BundleCache>,
    fallback_days: u32,
    min_rows: usize,
    metrics: Option<ForecastMetrics>,
}

impl SeriesPredictor {
    pub fn new(
        history: Arc<dyn HistorySource>,
        provider: Arc<dyn FeatureTargetProvider>,
        cache: Arc<BundleCache>,
    ) -> Self {
        Self {
            history,
            provider,
            cache,
            fallback_days: DEFAULT_FALLBACK_DAYS,
            min_rows: DEFAULT_MIN_ROWS,
            metrics: None,
        }
    }

    pub fn with_window(mut self, fallback_days: u32, min_rows: usize) -> Self {
        self.fallback_days = fallback_days;
        self.min_rows = min_rows;
        self
    }

    pub fn with_metrics(mut self, metrics: ForecastMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Candles in `[start, end]` when a range is given, otherwise the trailing
    /// `fallback_days`. Never fails: problems are reported as `Degraded`.
    pub async fn predict_series(
        &self,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> SeriesOutcome {
        let outcome = self.predict(range).await;
        if let SeriesOutcome::Degraded { reason, points } = &outcome {
            warn!("Series prediction degraded ({} points): {}", points.len(), reason);
        }
        if let Some(metrics) = &self.metrics {
            metrics.inc_series(if outcome.is_degraded() { "degraded" } else { "complete" });
        }
        outcome
    }

    async fn predict(&self, range: Option<(DateTime<Utc>, DateTime<Utc>)>) -> SeriesOutcome {
        let fetched = match range {
            Some((start, end)) => self.history.fetch_range(start, end).await,
            None => {
                let since = Utc::now() - Duration::days(i64::from(self.fallback_days));
                self.history.fetch_since(since).await
            }
        };
        let candles = match fetched {
            Ok(candles) => candles,
            Err(e) => return degraded(Vec::new(), ForecastError::upstream(e)),
        };
        if candles.len() < self.min_rows {
            return SeriesOutcome::Degraded {
                points: Vec::new(),
                reason: DegradedReason::InsufficientData(format!(
                    "{} candles, need at least {}",
                    candles.len(),
                    self.min_rows
                )),
            };
        }

        let frame = match self.provider.build(&candles) {
            Ok(frame) => frame,
            Err(e) => return degraded(realized(&candles), e),
        };
        let mut points = realized(&frame.rows);
        if points.is_empty() {
            return SeriesOutcome::Degraded {
                points,
                reason: DegradedReason::InsufficientData(format!(
                    "no aligned rows from {} candles",
                    candles.len()
                )),
            };
        }

        let bundle = match self.cache.get().await {
            Ok(bundle) => bundle,
            Err(e) => return degraded(points, e),
        };

        match fill_predictions(&bundle, &frame, &mut points) {
            Ok(scored) => {
                debug!("Scored {} of {} points", scored, points.len());
                SeriesOutcome::Complete { points }
            }
            Err(e) => {
                // Keep the realized values only; a partial fill is not reported.
                let points = realized(&frame.rows);
                degraded(points, e)
            }
        }
    }
}

fn realized(rows: &[Candle]) -> Vec<SeriesPoint> {
    rows.iter().copied().map(SeriesPoint::realized).collect()
}

fn degraded(points: Vec<SeriesPoint>, err: ForecastError) -> SeriesOutcome {
    SeriesOutcome::Degraded {
        points,
        reason: err.into(),
    }
}

/// Scores every window in one call and writes `pred`, `cls` and `err` onto the
/// points. Returns how many points received a prediction.
fn fill_predictions(
    bundle: &ModelBundle,
    frame: &FeatureTargetFrame,
    points: &mut [SeriesPoint],
) -> ForecastResult<usize> {
    let features = frame.features.select(bundle.feature_cols())?;
    let (x_seq, index_original) =
        build_inference_sequences(features.values.view(), bundle.seq_len())?;
    let prediction = bundle.score_windows(&x_seq)?;

    let close_idx = bundle.target_index(CLOSE_TARGET)?;
    let amp_idx = bundle.target_index(AMP_TARGET).ok();
    let names = bundle.target_reg_cols();

    let mut scored = 0;
    for (j, &i) in index_original.iter().enumerate() {
        let reg = prediction.reg.row(j);
        let pred_close = f64::from(reg[close_idx]);
        if !pred_close.is_finite() {
            continue;
        }

        let pred: BTreeMap<String, f64> = names
            .iter()
            .zip(reg.iter())
            .map(|(name, v)| (name.clone(), f64::from(*v)))
            .collect();
        let prob_up = f64::from(prediction.prob_up[j]);

        let err = frame.rows.get(i + 1).map(|next| PredictionError {
            close_abs: (pred_close - next.close).abs(),
            close_signed: pred_close - next.close,
            amp_abs: amp_idx.map(|a| (f64::from(reg[a]) - next.amplitude()).abs()),
        });

        let point = &mut points[i];
        point.pred = Some(pred);
        point.cls = prob_up
            .is_finite()
            .then(|| DirectionPrediction::from_prob_up(prob_up));
        point.err = err;
        scored += 1;
    }
    Ok(scored)
}
