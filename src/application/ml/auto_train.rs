use crate::application::ml::bundle_cache::BundleCache;
use crate::application::ml::training::TrainingOrchestrator;
use crate::domain::forecasting::{JobOutcome, RetrainDecision, RetrainPolicy, TRAIN_JOB};
use crate::domain::repositories::{FuturesRepository, JobLogRepository};
use crate::infrastructure::observability::ForecastMetrics;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct AutoTrainOutcome {
    pub decision: RetrainDecision,
    /// True only when a run happened and succeeded.
    pub trained: bool,
    pub outcome: Option<JobOutcome>,
}

/// Runs the training orchestrator when the retrain policy asks for it.
pub struct AutoTrainer {
    orchestrator: Arc<TrainingOrchestrator>,
    job_log: Arc<dyn JobLogRepository>,
    futures: Arc<dyn FuturesRepository>,
    policy: RetrainPolicy,
    cache: Option<Arc<BundleCache>>,
    metrics: Option<ForecastMetrics>,
}

impl AutoTrainer {
    pub fn new(
        orchestrator: Arc<TrainingOrchestrator>,
        job_log: Arc<dyn JobLogRepository>,
        futures: Arc<dyn FuturesRepository>,
        policy: RetrainPolicy,
    ) -> Self {
        Self {
            orchestrator,
            job_log,
            futures,
            policy,
            cache: None,
            metrics: None,
        }
    }

    /// Cache to invalidate after a successful run.
    pub fn with_cache(mut self, cache: Arc<BundleCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_metrics(mut self, metrics: ForecastMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> &RetrainPolicy {
        &self.policy
    }

    pub async fn run(&self, days: Option<u32>) -> Result<AutoTrainOutcome> {
        self.run_at(Utc::now(), days).await
    }

    /// Evaluates the policy as of `now`.
    pub async fn run_at(&self, now: DateTime<Utc>, days: Option<u32>) -> Result<AutoTrainOutcome> {
        let decision = self.decide_at(now).await?;
        if let Some(metrics) = &self.metrics {
            metrics.inc_retrain_decision(&decision.reason.to_string());
        }

        if !decision.retrain {
            info!(
                "Auto-train skipped: {} (hours_since_last={:?}, futures_mape={:?})",
                decision.reason, decision.hours_since_last, decision.futures_mape
            );
            return Ok(AutoTrainOutcome {
                decision,
                trained: false,
                outcome: None,
            });
        }

        info!("Auto-train triggered: {}", decision.reason);
        let outcome = self.orchestrator.run_training(days, None).await;
        let trained = outcome.is_ok();
        if trained && let Some(cache) = &self.cache {
            cache.invalidate().await;
        }

        Ok(AutoTrainOutcome {
            decision,
            trained,
            outcome: Some(outcome),
        })
    }

    /// Policy decision without running anything.
    pub async fn decide_at(&self, now: DateTime<Utc>) -> Result<RetrainDecision> {
        let last = self
            .job_log
            .last_success(TRAIN_JOB)
            .await
            .context("Failed to read last successful training run")?;
        let hours_since_last = last.map(|t| (now - t).num_milliseconds() as f64 / 3_600_000.0);

        let rolling_mape = if self.policy.needs_error_signal(hours_since_last) {
            match self.futures.rolling_mape(self.policy.rolling_n).await {
                Ok(mape) => mape,
                Err(e) => {
                    warn!("Rolling futures MAPE unavailable: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(self.policy.decide(hours_since_last, rolling_mape))
    }
}
