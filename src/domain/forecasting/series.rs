use crate::domain::errors::ForecastError;
use crate::domain::types::Candle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionPrediction {
    pub dir_next: u8,
    pub prob_up: f64,
    pub prob_down: f64,
}

impl DirectionPrediction {
    pub fn from_prob_up(prob_up: f64) -> Self {
        Self {
            dir_next: u8::from(prob_up >= 0.5),
            prob_up,
            prob_down: 1.0 - prob_up,
        }
    }
}

/// Prediction of row `i` against the realized candle `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionError {
    pub close_abs: f64,
    pub close_signed: f64,
    pub amp_abs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub real: Candle,
    pub pred: Option<BTreeMap<String, f64>>,
    pub cls: Option<DirectionPrediction>,
    pub err: Option<PredictionError>,
}

impl SeriesPoint {
    pub fn realized(real: Candle) -> Self {
        Self {
            real,
            pred: None,
            cls: None,
            err: None,
        }
    }
}

/// Why a result carries less than was asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DegradedReason {
    InsufficientData(String),
    BundleUnavailable(String),
    ScoringFailure(String),
    UpstreamFailure(String),
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradedReason::InsufficientData(d) => write!(f, "insufficient data: {}", d),
            DegradedReason::BundleUnavailable(d) => write!(f, "bundle unavailable: {}", d),
            DegradedReason::ScoringFailure(d) => write!(f, "scoring failure: {}", d),
            DegradedReason::UpstreamFailure(d) => write!(f, "upstream failure: {}", d),
        }
    }
}

impl From<ForecastError> for DegradedReason {
    fn from(err: ForecastError) -> Self {
        let detail = err.to_string();
        match err {
            ForecastError::InsufficientData { .. } | ForecastError::InsufficientHistory { .. } => {
                DegradedReason::InsufficientData(detail)
            }
            ForecastError::BundleUnavailable { .. } => DegradedReason::BundleUnavailable(detail),
            ForecastError::UpstreamFailure(_) => DegradedReason::UpstreamFailure(detail),
            _ => DegradedReason::ScoringFailure(detail),
        }
    }
}

/// Result of a series prediction. `Degraded` still carries every realized
/// point that could be produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SeriesOutcome {
    Complete {
        points: Vec<SeriesPoint>,
    },
    Degraded {
        points: Vec<SeriesPoint>,
        reason: DegradedReason,
    },
}

impl SeriesOutcome {
    pub fn points(&self) -> &[SeriesPoint] {
        match self {
            SeriesOutcome::Complete { points } | SeriesOutcome::Degraded { points, .. } => points,
        }
    }

    pub fn into_points(self) -> Vec<SeriesPoint> {
        match self {
            SeriesOutcome::Complete { points } | SeriesOutcome::Degraded { points, .. } => points,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, SeriesOutcome::Degraded { .. })
    }

    pub fn degraded_reason(&self) -> Option<&DegradedReason> {
        match self {
            SeriesOutcome::Degraded { reason, .. } => Some(reason),
            SeriesOutcome::Complete { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_threshold() {
        assert_eq!(DirectionPrediction::from_prob_up(0.5).dir_next, 1);
        assert_eq!(DirectionPrediction::from_prob_up(0.49).dir_next, 0);
        let d = DirectionPrediction::from_prob_up(0.25);
        assert!((d.prob_down - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_degraded_reason_from_error() {
        let reason: DegradedReason = ForecastError::bundle_unavailable("missing").into();
        assert!(matches!(reason, DegradedReason::BundleUnavailable(_)));

        let reason: DegradedReason =
            ForecastError::InsufficientData { rows: 3, seq_len: 48 }.into();
        assert!(matches!(reason, DegradedReason::InsufficientData(_)));

        let reason: DegradedReason = ForecastError::UnknownColumn { name: "rsi".into() }.into();
        assert!(matches!(reason, DegradedReason::ScoringFailure(_)));
    }

    #[test]
    fn test_outcome_json_is_tagged() {
        let outcome = SeriesOutcome::Degraded {
            points: vec![],
            reason: DegradedReason::BundleUnavailable("no manifest".into()),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["reason"]["kind"], "bundle_unavailable");
    }
}
