//! In-memory storage backing.

use super::{CredentialStore, StorageError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Process-local backing, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBacking {
    /// Values indexed by namespace, then key
    namespaces: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored value keyed by `(namespace, key)`.
    pub async fn snapshot(&self) -> BTreeMap<(String, String), Vec<u8>> {
        let namespaces = self.namespaces.read().await;
        namespaces
            .iter()
            .flat_map(|(ns, entries)| {
                entries
                    .iter()
                    .map(move |(key, value)| ((ns.clone(), key.clone()), value.clone()))
            })
            .collect()
    }

    /// Total number of stored values.
    pub async fn count(&self) -> usize {
        self.namespaces
            .read()
            .await
            .values()
            .map(HashMap::len)
            .sum()
    }
}

#[async_trait]
impl CredentialStore for MemoryBacking {
    async fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces.get(ns).and_then(|entries| entries.get(key)).cloned())
    }

    async fn set(&self, ns: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(ns.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn has(&self, ns: &str, key: &str) -> Result<bool, StorageError> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(ns)
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false))
    }

    async fn remove(&self, ns: &str, key: &str) -> Result<(), StorageError> {
        let mut namespaces = self.namespaces.write().await;
        if let Some(entries) = namespaces.get_mut(ns) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn keys(&self, ns: &str) -> Result<Vec<String>, StorageError> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(ns)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, ns: &str) -> Result<(), StorageError> {
        self.namespaces.write().await.remove(ns);
        Ok(())
    }
}
