use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CachedData;

/// What the persisted store holds for each key.
pub type StoredValue = CachedData<serde_json::Value>;

/// Durable key-value backing for the query cache.
///
/// Keys are storage keys produced by [`QueryKey::storage_key`](super::QueryKey::storage_key).
/// Writes for a key are only issued by that key's in-flight fetch, so
/// implementations do not need per-key write ordering.
#[async_trait]
pub trait PersistedStore: Send + Sync {
    /// A name for logging, e.g. "file" or "memory"
    fn name(&self) -> &'static str;

    /// Return the stored value, `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<StoredValue>>;

    async fn set(&self, key: &str, value: &StoredValue) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently stored.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Process-local store. Contents do not survive a restart, but a store shared
/// through an `Arc` survives the cache that uses it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl PersistedStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &StoredValue) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
