//! Retrain policy thresholds, from environment variables.

use super::{ConfigSource, parse_var};
use crate::domain::forecasting::RetrainPolicy;
use anyhow::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyEnvConfig {
    pub max_hours: f64,
    pub min_hours: f64,
    pub mape_threshold: f64,
    pub rolling_n: usize,
}

impl Default for PolicyEnvConfig {
    fn default() -> Self {
        let policy = RetrainPolicy::default();
        Self {
            max_hours: policy.max_hours,
            min_hours: policy.min_hours,
            mape_threshold: policy.mape_threshold,
            rolling_n: policy.rolling_n,
        }
    }
}

impl PolicyEnvConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            max_hours: parse_var(source, "TRAIN_MAX_HOURS", d.max_hours)?,
            min_hours: parse_var(source, "TRAIN_MIN_HOURS", d.min_hours)?,
            mape_threshold: parse_var(source, "FUTURES_MAPE_THRESHOLD", d.mape_threshold)?,
            rolling_n: parse_var(source, "FUTURES_ROLLING_N", d.rolling_n)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_hours < 0.0 || self.max_hours < 0.0 {
            anyhow::bail!("TRAIN_MIN_HOURS and TRAIN_MAX_HOURS must not be negative");
        }
        if self.rolling_n == 0 {
            anyhow::bail!("FUTURES_ROLLING_N must be positive");
        }
        Ok(())
    }

    pub fn to_policy(&self) -> RetrainPolicy {
        RetrainPolicy {
            max_hours: self.max_hours,
            min_hours: self.min_hours,
            mape_threshold: self.mape_threshold,
            rolling_n: self.rolling_n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_policy_config_overrides() {
        let env: HashMap<String, String> =
            [("FUTURES_MAPE_THRESHOLD", "1.5"), ("FUTURES_ROLLING_N", "12")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
        let policy = PolicyEnvConfig::from_source(&env).unwrap().to_policy();
        assert_eq!(policy.mape_threshold, 1.5);
        assert_eq!(policy.rolling_n, 12);
        assert_eq!(policy.max_hours, 24.0);
    }
}
