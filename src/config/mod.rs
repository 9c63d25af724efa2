//! Configuration module for candlecast.
//!
//! Structured configuration loading from environment variables, organized by
//! concern: Training, Retrain Policy, Storage, Service and Observability.
//!
//! An optional JSON policy file (`TRAIN_POLICY_PATH`, default
//! `train_policy.json`) overrides the model hyperparameters and the retrain
//! policy keys. Its keys are the lowercase form of the environment names,
//! e.g. `lstm_seq_len` or `train_max_hours`.

mod observability_config;
mod policy_config;
mod service_config;
mod storage_config;
mod training_config;

pub use observability_config::ObservabilityEnvConfig;
pub use policy_config::PolicyEnvConfig;
pub use service_config::ServiceEnvConfig;
pub use storage_config::StorageEnvConfig;
pub use training_config::TrainingEnvConfig;

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

const DEFAULT_POLICY_PATH: &str = "train_policy.json";

/// Keys the policy file may override.
const POLICY_FILE_KEYS: &[&str] = &[
    "LSTM_SEQ_LEN",
    "LSTM_EPOCHS",
    "LSTM_BATCH_SIZE",
    "LSTM_LR",
    "LSTM_PATIENCE",
    "TRAIN_MAX_HOURS",
    "TRAIN_MIN_HOURS",
    "FUTURES_MAPE_THRESHOLD",
    "FUTURES_ROLLING_N",
];

/// Where configuration values come from.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// The process environment.
pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Policy file values layered over another source.
pub struct PolicyFileOverlay<'a> {
    file: serde_json::Map<String, Value>,
    base: &'a dyn ConfigSource,
}

impl<'a> PolicyFileOverlay<'a> {
    pub fn new(file: serde_json::Map<String, Value>, base: &'a dyn ConfigSource) -> Self {
        Self { file, base }
    }
}

impl ConfigSource for PolicyFileOverlay<'_> {
    fn get(&self, key: &str) -> Option<String> {
        if POLICY_FILE_KEYS.contains(&key) {
            match self.file.get(&key.to_lowercase()) {
                Some(Value::Number(n)) => return Some(n.to_string()),
                Some(Value::String(s)) => return Some(s.clone()),
                _ => {}
            }
        }
        self.base.get(key)
    }
}

/// Reads the policy file. A missing or unreadable file means no overrides.
pub fn read_policy_file(path: &Path) -> serde_json::Map<String, Value> {
    if !path.is_file() {
        return serde_json::Map::new();
    }
    let parsed = std::fs::read_to_string(path)
        .context("Failed to read policy file")
        .and_then(|s| serde_json::from_str::<Value>(&s).context("Failed to parse policy file"));
    match parsed {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!("Policy file {} is not a JSON object, ignoring", path.display());
            serde_json::Map::new()
        }
        Err(e) => {
            warn!("Ignoring policy file {}: {:#}", path.display(), e);
            serde_json::Map::new()
        }
    }
}

pub(crate) fn parse_var<T>(source: &dyn ConfigSource, key: &str, default: T) -> Result<T>
where
    T: FromStr + ToString,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    source
        .get(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse::<T>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_bool(source: &dyn ConfigSource, key: &str, default: bool) -> bool {
    source
        .get(key)
        .and_then(|v| v.trim().parse::<bool>().ok())
        .unwrap_or(default)
}

pub(crate) fn var_or(source: &dyn ConfigSource, key: &str, default: &str) -> String {
    source.get(key).unwrap_or_else(|| default.to_string())
}

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub training: TrainingEnvConfig,
    pub policy: PolicyEnvConfig,
    pub storage: StorageEnvConfig,
    pub service: ServiceEnvConfig,
    pub observability: ObservabilityEnvConfig,
    pub policy_path: PathBuf,
}

impl Config {
    /// Load from the process environment plus the optional policy file.
    pub fn from_env() -> Result<Self> {
        let policy_path =
            PathBuf::from(var_or(&ProcessEnv, "TRAIN_POLICY_PATH", DEFAULT_POLICY_PATH));
        let overlay = PolicyFileOverlay::new(read_policy_file(&policy_path), &ProcessEnv);
        Self::from_source(&overlay)
    }

    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let training =
            TrainingEnvConfig::from_source(source).context("Failed to load training config")?;
        let policy = PolicyEnvConfig::from_source(source).context("Failed to load policy config")?;
        let storage = StorageEnvConfig::from_source(source);
        let service =
            ServiceEnvConfig::from_source(source).context("Failed to load service config")?;
        let observability = ObservabilityEnvConfig::from_source(source)
            .context("Failed to load observability config")?;

        let config = Self {
            training,
            policy,
            storage,
            service,
            observability,
            policy_path: PathBuf::from(var_or(source, "TRAIN_POLICY_PATH", DEFAULT_POLICY_PATH)),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.training.validate()?;
        self.policy.validate()?;
        self.service.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_source(&source(&[])).expect("Should parse with defaults");
        assert_eq!(config.training.lookback_days, 90);
        assert_eq!(config.training.seq_len, 48);
        assert_eq!(config.policy.rolling_n, 288);
        assert_eq!(config.storage.bundle_key, "bundle.json");
        assert_eq!(config.policy_path, PathBuf::from("train_policy.json"));
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = Config::from_source(&source(&[("LSTM_EPOCHS", "many")])).unwrap_err();
        assert!(format!("{:#}", err).contains("LSTM_EPOCHS"));
    }

    #[test]
    fn test_policy_file_overrides_env() {
        let env = source(&[
            ("LSTM_SEQ_LEN", "24"),
            ("TRAIN_MAX_HOURS", "6"),
            ("LOOKBACK_DAYS", "30"),
        ]);
        let file = json!({
            "lstm_seq_len": 32,
            "train_max_hours": 48.0,
            "lookback_days": 5
        });
        let overlay = PolicyFileOverlay::new(file.as_object().unwrap().clone(), &env);
        let config = Config::from_source(&overlay).unwrap();

        assert_eq!(config.training.seq_len, 32);
        assert_eq!(config.policy.max_hours, 48.0);
        // not a policy-file key
        assert_eq!(config.training.lookback_days, 30);
    }

    #[test]
    fn test_read_policy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_policy.json");
        assert!(read_policy_file(&path).is_empty());

        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, r#"{{"futures_rolling_n": 100}}"#).unwrap();
        assert_eq!(read_policy_file(&path)["futures_rolling_n"], json!(100));

        std::fs::write(&path, "not json").unwrap();
        assert!(read_policy_file(&path).is_empty());
    }
}
