pub mod futures;
pub mod job;
pub mod retrain_policy;
pub mod series;

pub use futures::{FuturesPoint, FuturesRecord, rolling_mape};
pub use job::{JobLogEntry, JobOutcome, JobStatus, TRAIN_JOB};
pub use retrain_policy::{RetrainDecision, RetrainPolicy, RetrainReason};
pub use series::{DegradedReason, DirectionPrediction, PredictionError, SeriesOutcome, SeriesPoint};
