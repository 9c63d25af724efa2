//! Prediction, reconciliation and scheduling settings, from environment variables.

use super::{ConfigSource, parse_var};
use anyhow::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEnvConfig {
    pub series_fallback_days: u32,
    pub series_min_rows: usize,
    pub futures_lookback_days: u32,
    pub futures_update_hours: u32,
    pub futures_update_interval_minutes: u64,
    pub train_check_interval_minutes: u64,
}

impl Default for ServiceEnvConfig {
    fn default() -> Self {
        Self {
            series_fallback_days: 90,
            series_min_rows: 30,
            futures_lookback_days: 3,
            futures_update_hours: 24,
            futures_update_interval_minutes: 5,
            train_check_interval_minutes: 60,
        }
    }
}

impl ServiceEnvConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            series_fallback_days: parse_var(
                source,
                "SERIES_FALLBACK_DAYS",
                d.series_fallback_days,
            )?,
            series_min_rows: parse_var(source, "SERIES_MIN_ROWS", d.series_min_rows)?,
            futures_lookback_days: parse_var(
                source,
                "FUTURES_LOOKBACK_DAYS",
                d.futures_lookback_days,
            )?,
            futures_update_hours: parse_var(
                source,
                "FUTURES_UPDATE_HOURS",
                d.futures_update_hours,
            )?,
            futures_update_interval_minutes: parse_var(
                source,
                "FUTURES_UPDATE_INTERVAL_MINUTES",
                d.futures_update_interval_minutes,
            )?,
            train_check_interval_minutes: parse_var(
                source,
                "TRAIN_CHECK_INTERVAL_MINUTES",
                d.train_check_interval_minutes,
            )?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.futures_update_interval_minutes == 0 || self.train_check_interval_minutes == 0 {
            anyhow::bail!("Scheduler intervals must be positive");
        }
        Ok(())
    }
}
