use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::StorageEnvConfig;
use crate::domain::ports::{BundleStore, HistorySource};
use crate::domain::repositories::{CandleRepository, FuturesRepository, JobLogRepository};
use crate::infrastructure::bundle_store::{FileBundleStore, InMemoryBundleStore};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteCandleRepository, SqliteFuturesRepository, SqliteJobLogRepository,
};
use crate::infrastructure::repositories::{
    InMemoryCandleRepository, InMemoryFuturesRepository, InMemoryJobLogRepository,
};

pub struct PersistenceHandle {
    pub db: Option<Database>,
    /// Same store as `candle_repository`, seen as read-only history
    pub history: Arc<dyn HistorySource>,
    pub candle_repository: Arc<dyn CandleRepository>,
    pub futures_repository: Arc<dyn FuturesRepository>,
    pub job_log_repository: Arc<dyn JobLogRepository>,
    pub bundle_store: Arc<dyn BundleStore>,
}

impl PersistenceHandle {
    /// Volatile storage for tests and dry runs.
    pub fn in_memory() -> Self {
        Self::with_candles(InMemoryCandleRepository::new())
    }

    /// In-memory stores over pre-seeded candles.
    pub fn with_candles(candles: InMemoryCandleRepository) -> Self {
        let candles = Arc::new(candles);
        Self {
            db: None,
            history: candles.clone(),
            candle_repository: candles,
            futures_repository: Arc::new(InMemoryFuturesRepository::new()),
            job_log_repository: Arc::new(InMemoryJobLogRepository::new()),
            bundle_store: Arc::new(InMemoryBundleStore::new()),
        }
    }
}

pub struct PersistenceBootstrap;

impl PersistenceBootstrap {
    pub async fn init(storage: &StorageEnvConfig) -> Result<PersistenceHandle> {
        info!("Initializing Database at {}", storage.database_url);

        let db = Database::new(&storage.database_url)
            .await
            .context("Failed to initialize database")?;

        let candle_repo = Arc::new(SqliteCandleRepository::new(db.pool.clone()));
        let futures_repo = Arc::new(SqliteFuturesRepository::new(db.pool.clone()));
        let job_log_repo = Arc::new(SqliteJobLogRepository::new(db.pool.clone()));

        info!("Model store at {}", storage.model_store_dir);
        let bundle_store = Arc::new(FileBundleStore::new(&storage.model_store_dir));

        Ok(PersistenceHandle {
            db: Some(db),
            history: candle_repo.clone(),
            candle_repository: candle_repo,
            futures_repository: futures_repo,
            job_log_repository: job_log_repo,
            bundle_store,
        })
    }
}
