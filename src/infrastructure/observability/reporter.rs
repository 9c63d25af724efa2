//! Push-based metrics reporter for candlecast
//!
//! Collects a snapshot of training and reconciliation state and writes it to
//! stdout as a single `METRICS_JSON:` line.

use crate::domain::forecasting::TRAIN_JOB;
use crate::domain::repositories::{FuturesRepository, JobLogRepository};
use crate::infrastructure::observability::metrics::ForecastMetrics;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Metrics snapshot for JSON output
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub training: TrainingSnapshot,
    pub futures: FuturesSnapshot,
}

#[derive(Debug, Serialize)]
pub struct TrainingSnapshot {
    pub last_status: Option<String>,
    pub last_finished_at: Option<String>,
    pub hours_since_last_success: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct FuturesSnapshot {
    pub stored: usize,
    pub rolling_mape: Option<f64>,
    pub rolling_n: usize,
}

/// Push-based metrics reporter
pub struct MetricsReporter {
    job_logs: Arc<dyn JobLogRepository>,
    futures: Arc<dyn FuturesRepository>,
    metrics: ForecastMetrics,
    rolling_n: usize,
    start_time: Instant,
}

impl MetricsReporter {
    pub fn new(
        job_logs: Arc<dyn JobLogRepository>,
        futures: Arc<dyn FuturesRepository>,
        metrics: ForecastMetrics,
        rolling_n: usize,
    ) -> Self {
        Self {
            job_logs,
            futures,
            metrics,
            rolling_n,
            start_time: Instant::now(),
        }
    }

    /// Collect a snapshot and print it. Failures are logged, never raised.
    pub async fn report_once(&self) {
        match self.collect_snapshot().await {
            Ok(snapshot) => match serde_json::to_string(&snapshot) {
                Ok(json) => {
                    // Use a special prefix so logs can be easily filtered
                    println!("METRICS_JSON:{}", json);
                    info!(
                        "Futures: {} stored | Rolling MAPE: {} | Uptime: {}s",
                        snapshot.futures.stored,
                        snapshot
                            .futures
                            .rolling_mape
                            .map_or_else(|| "n/a".to_string(), |m| format!("{:.3}%", m)),
                        snapshot.uptime_seconds
                    );
                }
                Err(e) => warn!("Failed to serialize metrics: {}", e),
            },
            Err(e) => warn!("Failed to collect metrics: {:#}", e),
        }
    }

    pub async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let uptime = self.start_time.elapsed().as_secs();
        let now = Utc::now();

        let last = self.job_logs.latest(TRAIN_JOB).await?;
        let last_success = self.job_logs.last_success(TRAIN_JOB).await?;
        let stored = self.futures.count().await?;
        let rolling_mape = self.futures.rolling_mape(self.rolling_n).await?;

        self.metrics.uptime_seconds.set(uptime as f64);
        self.metrics.set_rolling_mape(rolling_mape);

        Ok(MetricsSnapshot {
            timestamp: now.to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            training: TrainingSnapshot {
                last_status: last.as_ref().map(|e| e.status.to_string()),
                last_finished_at: last.as_ref().map(|e| e.finished_at.to_rfc3339()),
                hours_since_last_success: last_success
                    .map(|t| (now - t).num_seconds() as f64 / 3600.0),
            },
            futures: FuturesSnapshot {
                stored,
                rolling_mape,
                rolling_n: self.rolling_n,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::forecasting::{FuturesRecord, JobLogEntry, JobStatus};
    use crate::infrastructure::repositories::{InMemoryFuturesRepository, InMemoryJobLogRepository};
    use chrono::Duration;

    #[tokio::test]
    async fn test_metrics_snapshot_collection() {
        let job_logs = Arc::new(InMemoryJobLogRepository::new());
        let futures = Arc::new(InMemoryFuturesRepository::new());
        let metrics = ForecastMetrics::new().expect("Failed to create metrics");

        let finished = Utc::now() - Duration::hours(2);
        job_logs
            .record(&JobLogEntry {
                job_name: TRAIN_JOB.into(),
                status: JobStatus::Ok,
                message: "ok".into(),
                started_at: finished,
                finished_at: finished,
            })
            .await
            .unwrap();
        futures
            .upsert_many(&[FuturesRecord::reconciled(Utc::now(), 101.0, 100.0)])
            .await
            .unwrap();

        let reporter = MetricsReporter::new(job_logs, futures, metrics.clone(), 288);
        let snapshot = reporter
            .collect_snapshot()
            .await
            .expect("Failed to collect snapshot");

        assert_eq!(snapshot.futures.stored, 1);
        assert_eq!(snapshot.training.last_status.as_deref(), Some("ok"));
        let hours = snapshot.training.hours_since_last_success.unwrap();
        assert!((hours - 2.0).abs() < 0.1);
        assert!((metrics.futures_rolling_mape.get() - 1.0).abs() < 1e-9);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"rolling_n\":288"));
    }

    #[tokio::test]
    async fn test_empty_snapshot() {
        let reporter = MetricsReporter::new(
            Arc::new(InMemoryJobLogRepository::new()),
            Arc::new(InMemoryFuturesRepository::new()),
            ForecastMetrics::new().unwrap(),
            10,
        );
        let snapshot = reporter.collect_snapshot().await.unwrap();
        assert_eq!(snapshot.futures.rolling_mape, None);
        assert_eq!(snapshot.training.last_status, None);
    }
}
