use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One-step-ahead prediction for `time`, stored beside the realized close.
/// Keyed by `time`; writing the same time again replaces the values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuturesRecord {
    pub time: DateTime<Utc>,
    pub pred_close: f64,
    pub real_close: Option<f64>,
    pub err_close: Option<f64>,
}

impl FuturesRecord {
    pub fn reconciled(time: DateTime<Utc>, pred_close: f64, real_close: f64) -> Self {
        Self {
            time,
            pred_close,
            real_close: Some(real_close),
            err_close: Some((pred_close - real_close).abs()),
        }
    }

    /// Replaces non-finite values with `None` for reporting.
    pub fn sanitized(&self) -> FuturesPoint {
        let finite = |v: f64| v.is_finite().then_some(v);
        FuturesPoint {
            time: self.time,
            pred_close: finite(self.pred_close),
            real_close: self.real_close.and_then(finite),
            err_close: self.err_close.and_then(finite),
        }
    }

    fn usable_ratio(&self) -> Option<f64> {
        let real = self.real_close?;
        let err = self.err_close?;
        if real == 0.0 || !real.is_finite() || !err.is_finite() {
            return None;
        }
        Some(err.abs() / real.abs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuturesPoint {
    pub time: DateTime<Utc>,
    pub pred_close: Option<f64>,
    pub real_close: Option<f64>,
    pub err_close: Option<f64>,
}

/// Mean `|err| / real` in percent over records with a usable realized close.
///
/// `None` when no record qualifies; callers must not read that as zero error.
pub fn rolling_mape<'a>(records: impl IntoIterator<Item = &'a FuturesRecord>) -> Option<f64> {
    let (sum, count) = records
        .into_iter()
        .filter_map(FuturesRecord::usable_ratio)
        .fold((0.0, 0usize), |(s, c), r| (s + r, c + 1));
    (count > 0).then(|| sum / count as f64 * 100.0)
}
