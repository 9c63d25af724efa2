//! Repository Pattern Abstractions
//!
//! Storage seams for the forecasting core:
//! - `CandleRepository`: candle history (also a `HistorySource`)
//! - `FuturesRepository`: reconciled one-step-ahead predictions, keyed by time
//! - `JobLogRepository`: outcomes of training runs
//!
//! SQLite implementations live in `infrastructure::persistence`, in-memory
//! ones in `infrastructure::repositories`.

use crate::domain::forecasting::{FuturesRecord, JobLogEntry};
use crate::domain::ports::HistorySource;
use crate::domain::types::Candle;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait CandleRepository: HistorySource {
    /// Insert or replace candles by timestamp. Returns the number written.
    async fn upsert_many(&self, candles: &[Candle]) -> Result<usize>;

    async fn count(&self) -> Result<usize>;
}

#[async_trait]
pub trait FuturesRepository: Send + Sync {
    /// Insert or overwrite all value columns by `time`. Returns the number written.
    async fn upsert_many(&self, records: &[FuturesRecord]) -> Result<usize>;

    /// Rolling MAPE (%) over the newest `n` records with a non-null, non-zero
    /// realized close and a non-null error. `None` when none qualify.
    async fn rolling_mape(&self, n: usize) -> Result<Option<f64>>;

    /// Records in ascending time. With `limit`, the newest `limit` records
    /// (still returned ascending).
    async fn find(
        &self,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: Option<usize>,
    ) -> Result<Vec<FuturesRecord>>;

    async fn count(&self) -> Result<usize>;
}

#[async_trait]
pub trait JobLogRepository: Send + Sync {
    async fn record(&self, entry: &JobLogEntry) -> Result<()>;

    /// Finish time of the most recent successful run of `job_name`.
    async fn last_success(&self, job_name: &str) -> Result<Option<DateTime<Utc>>>;

    async fn latest(&self, job_name: &str) -> Result<Option<JobLogEntry>>;
}
