use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::store::{PersistedStore, StoredValue};

const FILE_EXTENSION: &str = "json";

/// Persisted store keeping one pretty-printed JSON file per key.
pub struct FileStore {
    cache_dir: PathBuf,
}

impl FileStore {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir).with_context(|| {
            format!("Failed to create cache directory: {}", cache_dir.display())
        })?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\', '.']) {
            bail!("Invalid cache key: {:?}", key);
        }
        Ok(self.cache_dir.join(format!("{}.{}", key, FILE_EXTENSION)))
    }
}

#[async_trait]
impl PersistedStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        let path = self.cache_path(key)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read cache file: {}", key))
            }
        };

        let cached: StoredValue = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file: {}", key))?;
        Ok(Some(cached))
    }

    async fn set(&self, key: &str, value: &StoredValue) -> Result<()> {
        let path = self.cache_path(key)?;
        let contents = serde_json::to_string_pretty(value)?;

        // Write then rename so a crash never leaves a half-written entry
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, contents)
            .await
            .with_context(|| format!("Failed to write cache file: {}", key))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("Failed to replace cache file: {}", key))?;

        debug!(key, "Wrote cache file");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.cache_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove cache file: {}", key)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.cache_dir)
            .await
            .context("Failed to list cache directory")?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedData;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("cache")).unwrap();

        assert!(store.get("progress-abc").await.unwrap().is_none());

        let value = CachedData::new(json!({"completed": 3, "total": 10}));
        store.set("progress-abc", &value).await.unwrap();

        // A second store over the same directory sees the entry
        let reopened = FileStore::new(dir.path().join("cache")).unwrap();
        assert_eq!(reopened.get("progress-abc").await.unwrap(), Some(value));
        assert_eq!(reopened.keys().await.unwrap(), vec!["progress-abc".to_string()]);

        reopened.remove("progress-abc").await.unwrap();
        reopened.remove("progress-abc").await.unwrap();
        assert!(store.get("progress-abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.get("../session").await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();
        std::fs::write(dir.path().join("progress.json"), "{not json").unwrap();
        assert!(store.get("progress").await.is_err());
    }
}
