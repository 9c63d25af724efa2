//! Prometheus metrics definitions for candlecast
//!
//! All metrics use the `candlecast_` prefix and are read-only.

use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

/// Prometheus metrics for training, prediction and reconciliation
#[derive(Clone)]
pub struct ForecastMetrics {
    registry: Arc<Registry>,
    /// Training runs by status (ok/error)
    pub training_runs_total: CounterVec,
    /// Wall time of a training run
    pub training_duration_seconds: Histogram,
    /// Best validation loss of the last successful run
    pub training_best_val_loss: GenericGauge<AtomicF64>,
    /// Holdout MAPE (%) of close_next for the last successful run
    pub holdout_mape: GenericGauge<AtomicF64>,
    /// Auto-train decisions by reason
    pub retrain_decisions_total: CounterVec,
    /// Futures rows written
    pub futures_upserts_total: Counter,
    /// Rolling MAPE (%) over stored futures, -1 when unavailable
    pub futures_rolling_mape: GenericGauge<AtomicF64>,
    /// Bundle loads by outcome (ok/unavailable)
    pub bundle_loads_total: CounterVec,
    /// Series predictions by status (complete/degraded)
    pub series_requests_total: CounterVec,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl ForecastMetrics {
    /// Create a new metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let training_runs_total = CounterVec::new(
            Opts::new("candlecast_training_runs_total", "Training runs by status"),
            &["status"],
        )?;
        registry.register(Box::new(training_runs_total.clone()))?;

        let training_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "candlecast_training_duration_seconds",
                "Training run wall time in seconds",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        )?;
        registry.register(Box::new(training_duration_seconds.clone()))?;

        let training_best_val_loss = Gauge::with_opts(Opts::new(
            "candlecast_training_best_val_loss",
            "Best validation loss of the last successful training run",
        ))?;
        registry.register(Box::new(training_best_val_loss.clone()))?;

        let holdout_mape = Gauge::with_opts(Opts::new(
            "candlecast_holdout_mape",
            "Holdout MAPE (%) of close_next for the last successful training run",
        ))?;
        registry.register(Box::new(holdout_mape.clone()))?;

        let retrain_decisions_total = CounterVec::new(
            Opts::new(
                "candlecast_retrain_decisions_total",
                "Retrain policy decisions by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(retrain_decisions_total.clone()))?;

        let futures_upserts_total = Counter::with_opts(Opts::new(
            "candlecast_futures_upserts_total",
            "Reconciled futures rows written",
        ))?;
        registry.register(Box::new(futures_upserts_total.clone()))?;

        let futures_rolling_mape = Gauge::with_opts(Opts::new(
            "candlecast_futures_rolling_mape",
            "Rolling MAPE (%) over stored futures, -1 when unavailable",
        ))?;
        registry.register(Box::new(futures_rolling_mape.clone()))?;

        let bundle_loads_total = CounterVec::new(
            Opts::new("candlecast_bundle_loads_total", "Model bundle loads by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(bundle_loads_total.clone()))?;

        let series_requests_total = CounterVec::new(
            Opts::new(
                "candlecast_series_requests_total",
                "Series predictions by status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(series_requests_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "candlecast_uptime_seconds",
            "Process uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            training_runs_total,
            training_duration_seconds,
            training_best_val_loss,
            holdout_mape,
            retrain_decisions_total,
            futures_upserts_total,
            futures_rolling_mape,
            bundle_loads_total,
            series_requests_total,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn record_training(&self, ok: bool, seconds: f64) {
        let status = if ok { "ok" } else { "error" };
        self.training_runs_total.with_label_values(&[status]).inc();
        self.training_duration_seconds.observe(seconds.max(0.0));
    }

    pub fn inc_retrain_decision(&self, reason: &str) {
        self.retrain_decisions_total.with_label_values(&[reason]).inc();
    }

    pub fn inc_bundle_load(&self, outcome: &str) {
        self.bundle_loads_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_series(&self, status: &str) {
        self.series_requests_total.with_label_values(&[status]).inc();
    }

    pub fn set_rolling_mape(&self, mape: Option<f64>) {
        self.futures_rolling_mape.set(mape.unwrap_or(-1.0));
    }
}
