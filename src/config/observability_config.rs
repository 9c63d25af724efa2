//! Observability configuration parsing from environment variables.

use super::{ConfigSource, parse_bool, parse_var};
use anyhow::Result;

/// Observability environment configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    /// Seconds between `METRICS_JSON:` snapshots
    pub interval_seconds: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        Ok(Self {
            enabled: parse_bool(source, "OBSERVABILITY_ENABLED", true),
            interval_seconds: parse_var(source, "OBSERVABILITY_INTERVAL", 60u64)?.max(1),
        })
    }
}
