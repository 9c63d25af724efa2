use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainReason {
    NoPreviousTrain,
    MaxHoursExceeded,
    MapeThresholdExceeded,
    MinHoursNotReached,
    NoNeed,
}

impl fmt::Display for RetrainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrainReason::NoPreviousTrain => write!(f, "no_previous_train"),
            RetrainReason::MaxHoursExceeded => write!(f, "max_hours_exceeded"),
            RetrainReason::MapeThresholdExceeded => write!(f, "mape_threshold_exceeded"),
            RetrainReason::MinHoursNotReached => write!(f, "min_hours_not_reached"),
            RetrainReason::NoNeed => write!(f, "no_need"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrainDecision {
    pub retrain: bool,
    pub reason: RetrainReason,
    pub hours_since_last: Option<f64>,
    pub futures_mape: Option<f64>,
}

/// When to refresh the model.
///
/// `max_hours` is a hard ceiling that forces a refresh even when the error
/// looks fine. Between `min_hours` and `max_hours` a rolling MAPE at or above
/// `mape_threshold` triggers an early refresh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrainPolicy {
    pub max_hours: f64,
    pub min_hours: f64,
    /// Percent, compared against rolling futures MAPE.
    pub mape_threshold: f64,
    /// How many recent futures records feed the rolling MAPE.
    pub rolling_n: usize,
}

impl Default for RetrainPolicy {
    fn default() -> Self {
        Self {
            max_hours: 24.0,
            min_hours: 12.0,
            mape_threshold: 0.8,
            rolling_n: 288,
        }
    }
}

impl RetrainPolicy {
    /// True when `decide` would actually look at the rolling error for these hours.
    pub fn needs_error_signal(&self, hours_since_last: Option<f64>) -> bool {
        matches!(hours_since_last, Some(h) if h >= self.min_hours && h < self.max_hours)
    }

    pub fn decide(
        &self,
        hours_since_last: Option<f64>,
        rolling_mape: Option<f64>,
    ) -> RetrainDecision {
        let Some(hours) = hours_since_last else {
            return RetrainDecision {
                retrain: true,
                reason: RetrainReason::NoPreviousTrain,
                hours_since_last: None,
                futures_mape: None,
            };
        };

        if hours >= self.max_hours {
            return RetrainDecision {
                retrain: true,
                reason: RetrainReason::MaxHoursExceeded,
                hours_since_last: Some(hours),
                futures_mape: None,
            };
        }

        if hours < self.min_hours {
            return RetrainDecision {
                retrain: false,
                reason: RetrainReason::MinHoursNotReached,
                hours_since_last: Some(hours),
                futures_mape: None,
            };
        }

        let exceeded = rolling_mape.is_some_and(|m| m >= self.mape_threshold);
        RetrainDecision {
            retrain: exceeded,
            reason: if exceeded {
                RetrainReason::MapeThresholdExceeded
            } else {
                RetrainReason::NoNeed
            },
            hours_since_last: Some(hours),
            futures_mape: rolling_mape,
        }
    }
}
