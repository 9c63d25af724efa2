//! Training hyperparameters and data window, from environment variables.

use super::{ConfigSource, parse_var};
use anyhow::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingEnvConfig {
    pub lookback_days: u32,
    pub alpha_decay: f64,
    pub seq_len: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub patience: usize,
    pub hidden_units: usize,
    pub min_history_rows: usize,
    pub holdout_max: usize,
    pub train_ratio: f64,
    pub seed: u64,
}

impl Default for TrainingEnvConfig {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            alpha_decay: 0.999,
            seq_len: 48,
            epochs: 50,
            batch_size: 64,
            learning_rate: 1e-3,
            patience: 8,
            hidden_units: 64,
            min_history_rows: 500,
            holdout_max: 500,
            train_ratio: 0.8,
            seed: 42,
        }
    }
}

impl TrainingEnvConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            lookback_days: parse_var(source, "LOOKBACK_DAYS", d.lookback_days)?,
            alpha_decay: parse_var(source, "ALPHA_DECAY", d.alpha_decay)?,
            seq_len: parse_var(source, "LSTM_SEQ_LEN", d.seq_len)?,
            epochs: parse_var(source, "LSTM_EPOCHS", d.epochs)?,
            batch_size: parse_var(source, "LSTM_BATCH_SIZE", d.batch_size)?,
            learning_rate: parse_var(source, "LSTM_LR", d.learning_rate)?,
            patience: parse_var(source, "LSTM_PATIENCE", d.patience)?,
            hidden_units: parse_var(source, "LSTM_HIDDEN_UNITS", d.hidden_units)?,
            min_history_rows: parse_var(source, "MIN_HISTORY_ROWS", d.min_history_rows)?,
            holdout_max: parse_var(source, "HOLDOUT_MAX", d.holdout_max)?,
            train_ratio: parse_var(source, "TRAIN_RATIO", d.train_ratio)?,
            seed: parse_var(source, "TRAIN_SEED", d.seed)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.seq_len < 2 {
            anyhow::bail!("LSTM_SEQ_LEN must be >= 2, got {}", self.seq_len);
        }
        if self.epochs == 0 || self.batch_size == 0 || self.hidden_units == 0 {
            anyhow::bail!("LSTM_EPOCHS, LSTM_BATCH_SIZE and LSTM_HIDDEN_UNITS must be positive");
        }
        if !(self.train_ratio > 0.0 && self.train_ratio < 1.0) {
            anyhow::bail!("TRAIN_RATIO must be in (0, 1), got {}", self.train_ratio);
        }
        if !(self.learning_rate > 0.0) {
            anyhow::bail!("LSTM_LR must be positive, got {}", self.learning_rate);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_training_config_defaults() {
        let config = TrainingEnvConfig::from_source(&HashMap::<String, String>::new()).unwrap();
        assert_eq!(config, TrainingEnvConfig::default());
        assert_eq!(config.alpha_decay, 0.999);
        assert_eq!(config.patience, 8);
    }

    #[test]
    fn test_rejects_short_window() {
        let config = TrainingEnvConfig {
            seq_len: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
