//! In-Memory Repository Implementations
//!
//! Thread-safe, in-memory implementations of the repository traits defined in
//! `domain::repositories`, with the same ordering and upsert semantics as the
//! SQLite ones.
//!
//! # Limitations
//!
//! - Data is lost on application restart
//! - Limited by available RAM

use crate::domain::forecasting::{self, FuturesRecord, JobLogEntry, JobStatus};
use crate::domain::ports::HistorySource;
use crate::domain::repositories::{CandleRepository, FuturesRepository, JobLogRepository};
use crate::domain::types::Candle;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Candles keyed by timestamp, so reads come back ordered and deduplicated.
pub struct InMemoryCandleRepository {
    candles: Arc<RwLock<BTreeMap<DateTime<Utc>, Candle>>>,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self {
            candles: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn with_candles(candles: impl IntoIterator<Item = Candle>) -> Self {
        let map = candles.into_iter().map(|c| (c.timestamp, c)).collect();
        Self {
            candles: Arc::new(RwLock::new(map)),
        }
    }
}

impl Default for InMemoryCandleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistorySource for InMemoryCandleRepository {
    async fn fetch_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Candle>> {
        if start > end {
            return Ok(Vec::new());
        }
        let candles = self.candles.read().await;
        Ok(candles.range(start..=end).map(|(_, c)| *c).collect())
    }

    async fn fetch_since(&self, start: DateTime<Utc>) -> Result<Vec<Candle>> {
        let candles = self.candles.read().await;
        Ok(candles.range(start..).map(|(_, c)| *c).collect())
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn upsert_many(&self, candles: &[Candle]) -> Result<usize> {
        let mut map = self.candles.write().await;
        for candle in candles {
            map.insert(candle.timestamp, *candle);
        }
        Ok(candles.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.candles.read().await.len())
    }
}

pub struct InMemoryFuturesRepository {
    records: Arc<RwLock<BTreeMap<DateTime<Utc>, FuturesRecord>>>,
}

impl InMemoryFuturesRepository {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for InMemoryFuturesRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FuturesRepository for InMemoryFuturesRepository {
    async fn upsert_many(&self, records: &[FuturesRecord]) -> Result<usize> {
        let mut map = self.records.write().await;
        for record in records {
            map.insert(record.time, *record);
        }
        Ok(records.len())
    }

    async fn rolling_mape(&self, n: usize) -> Result<Option<f64>> {
        let records = self.records.read().await;
        let newest: Vec<&FuturesRecord> = records
            .values()
            .rev()
            .filter(|r| {
                r.err_close.is_some_and(f64::is_finite)
                    && r.real_close.is_some_and(|v| v != 0.0 && v.is_finite())
            })
            .take(n.max(1))
            .collect();
        Ok(forecasting::rolling_mape(newest))
    }

    async fn find(
        &self,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: Option<usize>,
    ) -> Result<Vec<FuturesRecord>> {
        let records = self.records.read().await;
        let mut selected: Vec<FuturesRecord> = records
            .values()
            .filter(|r| range.is_none_or(|(start, end)| r.time >= start && r.time <= end))
            .copied()
            .collect();
        if let Some(limit) = limit {
            let skip = selected.len().saturating_sub(limit);
            selected.drain(..skip);
        }
        Ok(selected)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

pub struct InMemoryJobLogRepository {
    entries: Arc<RwLock<Vec<JobLogEntry>>>,
}

impl InMemoryJobLogRepository {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn entries(&self) -> Vec<JobLogEntry> {
        self.entries.read().await.clone()
    }
}

impl Default for InMemoryJobLogRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobLogRepository for InMemoryJobLogRepository {
    async fn record(&self, entry: &JobLogEntry) -> Result<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn last_success(&self, job_name: &str) -> Result<Option<DateTime<Utc>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .find(|e| e.job_name == job_name && e.status == JobStatus::Ok)
            .map(|e| e.finished_at))
    }

    async fn latest(&self, job_name: &str) -> Result<Option<JobLogEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().rev().find(|e| e.job_name == job_name).cloned())
    }
}
