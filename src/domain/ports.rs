use crate::domain::errors::ForecastResult;
use crate::domain::types::{Candle, FeatureTargetFrame};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Ordered, deduplicated candle history.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Candles with `start <= timestamp <= end`, oldest first.
    async fn fetch_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Candle>>;

    /// Candles with `timestamp >= start`, oldest first.
    async fn fetch_since(&self, start: DateTime<Utc>) -> Result<Vec<Candle>>;
}

/// Turns raw candles into aligned features and next-step targets.
pub trait FeatureTargetProvider: Send + Sync {
    fn build(&self, rows: &[Candle]) -> ForecastResult<FeatureTargetFrame>;
}

/// Opaque key/blob persistence for bundle manifests and scorer checkpoints.
#[async_trait]
pub trait BundleStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// `Ok(None)` when nothing is stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}
