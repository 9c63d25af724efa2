use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::application::bootstrap::{PersistenceBootstrap, PersistenceHandle};
use crate::application::forecasting::{FuturesReconciler, SeriesPredictor};
use crate::application::ml::{AutoTrainer, BundleCache, TrainingConfig, TrainingOrchestrator};
use crate::application::scheduler::{ScheduleConfig, Scheduler};
use crate::config::Config;
use crate::domain::forecasting::JobOutcome;
use crate::domain::ports::FeatureTargetProvider;
use crate::domain::types::Candle;
use crate::infrastructure::features::{TechnicalFeatureConfig, TechnicalFeatureProvider};
use crate::infrastructure::ml::DenseNetworkFactory;
use crate::infrastructure::observability::{ForecastMetrics, MetricsReporter};

/// Every service of the forecaster, wired over one set of stores.
pub struct ForecastSystem {
    pub config: Config,
    // Keeps the pool alive for the repositories
    pub persistence: PersistenceHandle,
    pub metrics: ForecastMetrics,
    pub cache: Arc<BundleCache>,
    pub orchestrator: Arc<TrainingOrchestrator>,
    pub auto_trainer: Arc<AutoTrainer>,
    pub predictor: Arc<SeriesPredictor>,
    pub reconciler: Arc<FuturesReconciler>,
    pub reporter: Option<Arc<MetricsReporter>>,
}

impl ForecastSystem {
    /// SQLite and the file model store, as configured.
    pub async fn build(config: Config) -> Result<Self> {
        let persistence = PersistenceBootstrap::init(&config.storage)
            .await
            .context("Failed to initialize persistence")?;
        Self::assemble(config, persistence)
    }

    pub fn assemble(config: Config, persistence: PersistenceHandle) -> Result<Self> {
        let metrics = ForecastMetrics::new().context("Failed to register metrics")?;
        let provider: Arc<dyn FeatureTargetProvider> =
            Arc::new(TechnicalFeatureProvider::new(TechnicalFeatureConfig::default()));
        let factory = Arc::new(DenseNetworkFactory);
        let bundle_key = config.storage.bundle_key.clone();
        let history = persistence.history.clone();

        let cache = Arc::new(
            BundleCache::new(persistence.bundle_store.clone(), factory.clone(), bundle_key.clone())
                .with_metrics(metrics.clone()),
        );

        let orchestrator = Arc::new(
            TrainingOrchestrator::new(
                history.clone(),
                provider.clone(),
                factory,
                persistence.bundle_store.clone(),
                persistence.job_log_repository.clone(),
                bundle_key,
                TrainingConfig::from(&config.training),
            )
            .with_metrics(metrics.clone()),
        );

        let policy = config.policy.to_policy();
        let auto_trainer = Arc::new(
            AutoTrainer::new(
                orchestrator.clone(),
                persistence.job_log_repository.clone(),
                persistence.futures_repository.clone(),
                policy,
            )
            .with_cache(cache.clone())
            .with_metrics(metrics.clone()),
        );

        let predictor = Arc::new(
            SeriesPredictor::new(history.clone(), provider.clone(), cache.clone())
                .with_window(config.service.series_fallback_days, config.service.series_min_rows)
                .with_metrics(metrics.clone()),
        );

        let reconciler = Arc::new(
            FuturesReconciler::new(
                history,
                provider,
                cache.clone(),
                persistence.futures_repository.clone(),
            )
            .with_lookback_days(config.service.futures_lookback_days)
            .with_metrics(metrics.clone()),
        );

        let reporter = config.observability.enabled.then(|| {
            Arc::new(MetricsReporter::new(
                persistence.job_log_repository.clone(),
                persistence.futures_repository.clone(),
                metrics.clone(),
                policy.rolling_n,
            ))
        });

        info!(
            "Forecast system assembled (seq_len={}, bundle={})",
            config.training.seq_len, config.storage.bundle_key
        );

        Ok(Self {
            config,
            persistence,
            metrics,
            cache,
            orchestrator,
            auto_trainer,
            predictor,
            reconciler,
            reporter,
        })
    }

    /// One training run. A successful run drops the cached bundle so the next
    /// prediction picks up the new one.
    pub async fn train(&self, days: Option<u32>, decay: Option<f64>) -> JobOutcome {
        let outcome = self.orchestrator.run_training(days, decay).await;
        if outcome.is_ok() {
            self.cache.invalidate().await;
        }
        outcome
    }

    /// Stores candles in the history. Returns the number written.
    pub async fn import_candles(&self, candles: &[Candle]) -> Result<usize> {
        let written = self
            .persistence
            .candle_repository
            .upsert_many(candles)
            .await
            .context("Failed to import candles")?;
        info!("Imported {} candles", written);
        Ok(written)
    }

    pub fn scheduler(&self) -> Scheduler {
        let service = &self.config.service;
        let schedule = ScheduleConfig {
            futures_interval: Duration::from_secs(service.futures_update_interval_minutes * 60),
            train_check_interval: Duration::from_secs(service.train_check_interval_minutes * 60),
            metrics_interval: Duration::from_secs(self.config.observability.interval_seconds),
            futures_update_hours: service.futures_update_hours,
            train_days: Some(self.config.training.lookback_days),
        };
        let scheduler =
            Scheduler::new(self.reconciler.clone(), self.auto_trainer.clone(), schedule);
        match &self.reporter {
            Some(reporter) => scheduler.with_reporter(reporter.clone()),
            None => scheduler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn in_memory_system() -> ForecastSystem {
        let config = Config::from_source(&HashMap::<String, String>::new()).unwrap();
        ForecastSystem::assemble(config, PersistenceHandle::in_memory()).unwrap()
    }

    #[tokio::test]
    async fn test_train_without_history_fails_and_keeps_cache_empty() {
        let system = in_memory_system();
        let outcome = system.train(None, None).await;
        assert!(!outcome.is_ok());
        assert!(!system.cache.is_loaded().await);
    }

    #[tokio::test]
    async fn test_import_candles_counts_rows() {
        let system = in_memory_system();
        let t0 = chrono::Utc::now();
        let candles: Vec<Candle> = (0..3)
            .map(|i| Candle {
                timestamp: t0 + chrono::Duration::minutes(i),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            })
            .collect();
        assert_eq!(system.import_candles(&candles).await.unwrap(), 3);
        assert_eq!(system.persistence.candle_repository.count().await.unwrap(), 3);
    }
}
