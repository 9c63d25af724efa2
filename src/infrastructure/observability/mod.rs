//! Push-based observability for candlecast
//!
//! Metrics only ever leave the process: a prometheus registry kept in memory
//! and a periodic `METRICS_JSON:` line on stdout. There is no HTTP endpoint.

pub mod metrics;
pub mod reporter;

pub use metrics::ForecastMetrics;
pub use reporter::MetricsReporter;
