use crate::domain::ports::BundleStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

/// Stores each key as a file under `root`. Writes go to a temporary sibling
/// and are renamed into place, so a reader never sees a half-written blob.
pub struct FileBundleStore {
    root: PathBuf,
}

impl FileBundleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            anyhow::bail!("Invalid bundle key: {:?}", key);
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BundleStore for FileBundleStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create model store {}", self.root.display()))?;

        let tmp = self.root.join(format!(".{}.tmp", key));
        fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move bundle blob into {}", path.display()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

#[derive(Default)]
pub struct InMemoryBundleStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BundleStore for InMemoryBundleStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.blobs.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBundleStore::new(dir.path().join("models"));

        assert_eq!(store.get("bundle.json").await.unwrap(), None);

        store.put("bundle.json", b"v1".to_vec()).await.unwrap();
        store.put("bundle.json", b"v2".to_vec()).await.unwrap();
        assert_eq!(store.get("bundle.json").await.unwrap(), Some(b"v2".to_vec()));
        assert!(!dir.path().join("models/.bundle.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBundleStore::new(dir.path());
        assert!(store.put("../escape", vec![1]).await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryBundleStore::new();
        store.put("b", vec![2]).await.unwrap();
        store.put("a", vec![1]).await.unwrap();
        assert_eq!(store.keys().await, vec!["a", "b"]);
        assert_eq!(store.get("a").await.unwrap(), Some(vec![1]));
        assert_eq!(store.get("c").await.unwrap(), None);
    }
}
