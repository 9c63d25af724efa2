use crate::domain::errors::{ForecastError, ForecastResult};
use crate::domain::ml::{BundleManifest, ModelBundle, ModelFactory};
use crate::domain::ports::BundleStore;
use crate::infrastructure::observability::ForecastMetrics;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Lazily loaded, explicitly invalidated model bundle.
///
/// Readers get an `Arc` and keep scoring with it even if a reload swaps the
/// cached bundle underneath them.
pub struct BundleCache {
    store: Arc<dyn BundleStore>,
    factory: Arc<dyn ModelFactory>,
    manifest_key: String,
    cached: RwLock<Option<Arc<ModelBundle>>>,
    metrics: Option<ForecastMetrics>,
}

impl BundleCache {
    pub fn new(
        store: Arc<dyn BundleStore>,
        factory: Arc<dyn ModelFactory>,
        manifest_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            factory,
            manifest_key: manifest_key.into(),
            cached: RwLock::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ForecastMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cached bundle, loading it from the store on first use.
    pub async fn get(&self) -> ForecastResult<Arc<ModelBundle>> {
        if let Some(bundle) = self.cached.read().await.as_ref() {
            return Ok(bundle.clone());
        }

        let mut cached = self.cached.write().await;
        // Another task may have loaded it while we waited for the write lock.
        if let Some(bundle) = cached.as_ref() {
            return Ok(bundle.clone());
        }
        let bundle = Arc::new(self.load().await?);
        *cached = Some(bundle.clone());
        Ok(bundle)
    }

    /// Drops the cached bundle; the next `get` reloads from the store.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    /// Loads from the store now and replaces the cached bundle. On failure the
    /// previously cached bundle, if any, is kept.
    pub async fn force_reload(&self) -> ForecastResult<Arc<ModelBundle>> {
        let bundle = Arc::new(self.load().await?);
        *self.cached.write().await = Some(bundle.clone());
        Ok(bundle)
    }

    pub async fn is_loaded(&self) -> bool {
        self.cached.read().await.is_some()
    }

    async fn load(&self) -> ForecastResult<ModelBundle> {
        let result = self.load_uncached().await;
        match &result {
            Ok(bundle) => {
                info!(
                    "Loaded model bundle {} (seq_len={}, trained_at={})",
                    bundle.manifest.model_key, bundle.manifest.seq_len, bundle.manifest.trained_at
                );
                self.count("ok");
            }
            Err(e) => {
                warn!("Model bundle unavailable: {}", e);
                self.count("unavailable");
            }
        }
        result
    }

    async fn load_uncached(&self) -> ForecastResult<ModelBundle> {
        let manifest_bytes = self
            .store
            .get(&self.manifest_key)
            .await
            .map_err(|e| ForecastError::bundle_unavailable(format!("{:#}", e)))?
            .ok_or_else(|| {
                ForecastError::bundle_unavailable(format!("no manifest at {}", self.manifest_key))
            })?;
        let manifest: BundleManifest = serde_json::from_slice(&manifest_bytes).map_err(|e| {
            ForecastError::bundle_unavailable(format!(
                "invalid manifest {}: {}",
                self.manifest_key, e
            ))
        })?;

        let checkpoint = self
            .store
            .get(&manifest.model_key)
            .await
            .map_err(|e| ForecastError::bundle_unavailable(format!("{:#}", e)))?
            .ok_or_else(|| {
                ForecastError::bundle_unavailable(format!(
                    "no checkpoint at {}",
                    manifest.model_key
                ))
            })?;
        let scorer = self
            .factory
            .restore(&checkpoint)
            .map_err(|e| ForecastError::bundle_unavailable(e.to_string()))?;

        Ok(ModelBundle::new(scorer, manifest))
    }

    fn count(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_bundle_load(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::{MinMaxScaler, ModelOutput, ModelSpec, Scaler, Scorer, TrainableModel};
    use crate::infrastructure::bundle_store::InMemoryBundleStore;
    use chrono::Utc;
    use ndarray::{Array1, Array2, Array3, array};

    /// Scorer whose output is the constant stored in its checkpoint.
    struct ConstScorer(f32);

    impl Scorer for ConstScorer {
        fn predict(&self, batch: &Array3<f32>) -> ForecastResult<ModelOutput> {
            let n = batch.shape()[0];
            Ok(ModelOutput {
                reg: Array2::from_elem((n, 1), self.0),
                cls: Array1::from_elem(n, 0.5),
            })
        }
    }

    struct ConstFactory;

    impl ModelFactory for ConstFactory {
        fn build(&self, _spec: &ModelSpec) -> ForecastResult<Box<dyn TrainableModel>> {
            Err(ForecastError::scoring("not trainable"))
        }

        fn restore(&self, checkpoint: &[u8]) -> ForecastResult<Arc<dyn Scorer>> {
            let value: f32 = serde_json::from_slice(checkpoint)
                .map_err(|e| ForecastError::scoring(e.to_string()))?;
            Ok(Arc::new(ConstScorer(value)))
        }
    }

    async fn publish(store: &InMemoryBundleStore, model_key: &str, value: f32) {
        let mut scaler = MinMaxScaler::new();
        scaler.fit(array![[0.0f32], [1.0]].view()).unwrap();
        let manifest = BundleManifest {
            model_key: model_key.to_string(),
            scaler_x: scaler.clone(),
            scaler_y: scaler,
            feature_cols: vec!["close".into()],
            target_reg_cols: vec!["close_next".into()],
            seq_len: 2,
            trained_at: Utc::now(),
        };
        store
            .put(model_key, serde_json::to_vec(&value).unwrap())
            .await
            .unwrap();
        store
            .put("bundle.json", serde_json::to_vec(&manifest).unwrap())
            .await
            .unwrap();
    }

    fn cache(store: Arc<InMemoryBundleStore>) -> BundleCache {
        BundleCache::new(store, Arc::new(ConstFactory), "bundle.json")
    }

    #[tokio::test]
    async fn test_missing_manifest_is_unavailable() {
        let cache = cache(Arc::new(InMemoryBundleStore::new()));
        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, ForecastError::BundleUnavailable { .. }));
        assert!(!cache.is_loaded().await);
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_unavailable() {
        let source = InMemoryBundleStore::new();
        publish(&source, "scorer-1.json", 1.0).await;

        // Only the manifest makes it across.
        let store = Arc::new(InMemoryBundleStore::new());
        let manifest = source.get("bundle.json").await.unwrap().unwrap();
        store.put("bundle.json", manifest).await.unwrap();

        let err = cache(store).get().await.unwrap_err();
        assert!(err.to_string().contains("scorer-1.json"));
        assert!(matches!(err, ForecastError::BundleUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_get_caches_until_invalidated() {
        let store = Arc::new(InMemoryBundleStore::new());
        publish(&store, "scorer-1.json", 1.0).await;
        let cache = cache(store.clone());

        let first = cache.get().await.unwrap();
        assert_eq!(first.manifest.model_key, "scorer-1.json");

        publish(&store, "scorer-2.json", 2.0).await;
        assert_eq!(cache.get().await.unwrap().manifest.model_key, "scorer-1.json");

        cache.invalidate().await;
        let second = cache.get().await.unwrap();
        assert_eq!(second.manifest.model_key, "scorer-2.json");

        // The reader holding the old bundle keeps using it.
        assert_eq!(first.manifest.model_key, "scorer-1.json");
    }

    #[tokio::test]
    async fn test_force_reload_keeps_old_bundle_on_failure() {
        let store = Arc::new(InMemoryBundleStore::new());
        publish(&store, "scorer-1.json", 1.0).await;
        let cache = cache(store.clone());
        cache.get().await.unwrap();

        store.put("bundle.json", b"garbage".to_vec()).await.unwrap();
        assert!(cache.force_reload().await.is_err());
        assert_eq!(cache.get().await.unwrap().manifest.model_key, "scorer-1.json");

        publish(&store, "scorer-3.json", 3.0).await;
        let reloaded = cache.force_reload().await.unwrap();
        assert_eq!(reloaded.manifest.model_key, "scorer-3.json");
    }
}
