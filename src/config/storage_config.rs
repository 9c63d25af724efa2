//! Storage locations, from environment variables.

use super::{ConfigSource, var_or};

#[derive(Debug, Clone, PartialEq)]
pub struct StorageEnvConfig {
    pub database_url: String,
    pub model_store_dir: String,
    /// Key of the bundle manifest inside the model store
    pub bundle_key: String,
}

impl Default for StorageEnvConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/candlecast.db".to_string(),
            model_store_dir: "data/models".to_string(),
            bundle_key: "bundle.json".to_string(),
        }
    }
}

impl StorageEnvConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let d = Self::default();
        Self {
            database_url: var_or(source, "DATABASE_URL", &d.database_url),
            model_store_dir: var_or(source, "MODEL_STORE_DIR", &d.model_store_dir),
            bundle_key: var_or(source, "BUNDLE_KEY", &d.bundle_key),
        }
    }
}
