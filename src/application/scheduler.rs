//! Background Scheduler
//!
//! Drives the periodic jobs of a long-running process: reconciling recent
//! futures, asking the auto-trainer whether a retrain is due, and emitting
//! metrics snapshots. A failing tick is logged and the loop carries on.

use crate::application::forecasting::FuturesReconciler;
use crate::application::ml::AutoTrainer;
use crate::infrastructure::observability::MetricsReporter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    pub futures_interval: Duration,
    pub train_check_interval: Duration,
    pub metrics_interval: Duration,
    /// Trailing window reconciled on each futures tick
    pub futures_update_hours: u32,
    /// Training window handed to the auto-trainer; `None` uses its default
    pub train_days: Option<u32>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            futures_interval: Duration::from_secs(5 * 60),
            train_check_interval: Duration::from_secs(60 * 60),
            metrics_interval: Duration::from_secs(60),
            futures_update_hours: 24,
            train_days: None,
        }
    }
}

pub struct Scheduler {
    reconciler: Arc<FuturesReconciler>,
    auto_trainer: Arc<AutoTrainer>,
    reporter: Option<Arc<MetricsReporter>>,
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(
        reconciler: Arc<FuturesReconciler>,
        auto_trainer: Arc<AutoTrainer>,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            reconciler,
            auto_trainer,
            reporter: None,
            config,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<MetricsReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Runs until `shutdown` resolves. Every interval fires once right away.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Scheduler started (futures every {:?}, train check every {:?})",
            self.config.futures_interval, self.config.train_check_interval
        );

        let mut futures_interval = tokio::time::interval(self.config.futures_interval);
        let mut train_interval = tokio::time::interval(self.config.train_check_interval);
        let mut metrics_interval = tokio::time::interval(self.config.metrics_interval);
        for interval in [&mut futures_interval, &mut train_interval, &mut metrics_interval] {
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler stopping.");
                    break;
                }
                _ = futures_interval.tick() => {
                    self.futures_tick().await;
                }
                _ = train_interval.tick() => {
                    self.train_tick().await;
                }
                _ = metrics_interval.tick(), if self.reporter.is_some() => {
                    if let Some(reporter) = &self.reporter {
                        reporter.report_once().await;
                    }
                }
            }
        }
    }

    async fn futures_tick(&self) {
        let outcome = self
            .reconciler
            .update_recent(self.config.futures_update_hours)
            .await;
        match &outcome.degraded {
            Some(reason) => warn!(
                "Futures update degraded ({} of {} upserted): {}",
                outcome.upserted, outcome.requested, reason
            ),
            None => info!(
                "Futures update: {} upserted, {} skipped",
                outcome.upserted, outcome.skipped
            ),
        }
    }

    async fn train_tick(&self) {
        match self.auto_trainer.run(self.config.train_days).await {
            Ok(outcome) if outcome.trained => info!("Auto-train retrained the model."),
            Ok(outcome) => match &outcome.outcome {
                Some(job) => warn!("Auto-train run failed: {}", job.message),
                None => info!("Auto-train skipped: {:?}", outcome.decision),
            },
            Err(e) => error!("Auto-train check failed: {:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ml::{BundleCache, TrainingConfig, TrainingOrchestrator};
    use crate::domain::forecasting::{JobStatus, RetrainPolicy};
    use crate::infrastructure::{
        DenseNetworkFactory, InMemoryBundleStore, InMemoryCandleRepository,
        InMemoryFuturesRepository, InMemoryJobLogRepository, TechnicalFeatureProvider,
    };

    #[tokio::test]
    async fn test_scheduler_stops_on_shutdown() {
        let candles = Arc::new(InMemoryCandleRepository::new());
        let provider = Arc::new(TechnicalFeatureProvider::default());
        let store = Arc::new(InMemoryBundleStore::new());
        let job_logs = Arc::new(InMemoryJobLogRepository::new());
        let futures = Arc::new(InMemoryFuturesRepository::new());
        let factory = Arc::new(DenseNetworkFactory);

        let cache = Arc::new(BundleCache::new(store.clone(), factory.clone(), "bundle.json"));
        let orchestrator = Arc::new(TrainingOrchestrator::new(
            candles.clone(),
            provider.clone(),
            factory,
            store,
            job_logs.clone(),
            "bundle.json",
            TrainingConfig::default(),
        ));
        let auto_trainer = Arc::new(AutoTrainer::new(
            orchestrator,
            job_logs.clone(),
            futures.clone(),
            RetrainPolicy::default(),
        ));
        let reconciler = Arc::new(FuturesReconciler::new(candles, provider, cache, futures));

        let scheduler = Scheduler::new(
            reconciler,
            auto_trainer,
            ScheduleConfig {
                futures_interval: Duration::from_millis(10),
                train_check_interval: Duration::from_millis(10),
                ..ScheduleConfig::default()
            },
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            scheduler.run(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await;
        assert!(result.is_ok(), "Scheduler should stop when shutdown resolves");

        // With no history every training attempt fails and is logged.
        let entries = job_logs.entries().await;
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|e| e.status == JobStatus::Error));
    }
}
