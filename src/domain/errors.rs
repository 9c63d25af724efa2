use thiserror::Error;

/// Errors raised by the forecasting core.
///
/// Window-length and length-mismatch variants signal caller or configuration
/// mistakes and are returned directly. The remaining variants are converted into
/// degraded or failed outcomes by the boundary operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("Invalid window length: seq_len must be >= 2, got {seq_len}")]
    InvalidWindowLength { seq_len: usize },

    #[error("Insufficient data to build sequences: {rows} rows, need more than {seq_len}")]
    InsufficientData { rows: usize, seq_len: usize },

    #[error("Insufficient history for training: {rows} candles, minimum is {required}")]
    InsufficientHistory { rows: usize, required: usize },

    #[error("Length mismatch: {features} feature rows vs {targets} {what} rows")]
    LengthMismatch {
        features: usize,
        targets: usize,
        what: &'static str,
    },

    #[error("Model bundle unavailable: {reason}")]
    BundleUnavailable { reason: String },

    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("Scoring failure: {reason}")]
    ScoringFailure { reason: String },

    #[error("Unknown column: {name}")]
    UnknownColumn { name: String },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl ForecastError {
    /// Wraps a collaborator error (store, history source) keeping its full context chain.
    pub fn upstream(err: anyhow::Error) -> Self {
        ForecastError::UpstreamFailure(format!("{:#}", err))
    }

    pub fn scoring(reason: impl Into<String>) -> Self {
        ForecastError::ScoringFailure {
            reason: reason.into(),
        }
    }

    pub fn bundle_unavailable(reason: impl Into<String>) -> Self {
        ForecastError::BundleUnavailable {
            reason: reason.into(),
        }
    }
}

pub type ForecastResult<T> = Result<T, ForecastError>;
