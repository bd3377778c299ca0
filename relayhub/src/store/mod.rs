//! Shared store and configuration store.
//!
//! The shared store holds per-worker records (presence, session state).
//! Every key lives under a namespace derived from the worker identity, so
//! workers never write into each other's space.

mod config;
mod fs;

pub use config::{ConfigStore, MemoryConfigStore};
pub use fs::FsStore;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Namespaced key/value store shared across worker processes.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError>;

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StoreError>;

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError>;

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StoreError>;

    /// Drop the whole namespace. Returns the number of records removed.
    async fn clean(&self, namespace: &str) -> Result<usize, StoreError>;
}

/// In-process store, used by tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace_count(&self) -> usize {
        self.namespaces.lock().len()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.namespaces
            .lock()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .namespaces
            .lock()
            .get(namespace)
            .and_then(|ns| ns.get(key).cloned()))
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let mut namespaces = self.namespaces.lock();
        if let Some(ns) = namespaces.get_mut(namespace) {
            ns.remove(key);
            if ns.is_empty() {
                namespaces.remove(namespace);
            }
        }
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .namespaces
            .lock()
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn clean(&self, namespace: &str) -> Result<usize, StoreError> {
        Ok(self
            .namespaces
            .lock()
            .remove(namespace)
            .map(|ns| ns.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_namespaces_are_isolated() {
        let store = MemoryStore::new();
        store.put("worker-a", "session:1", json!(1)).await.unwrap();
        store.put("worker-b", "session:1", json!(2)).await.unwrap();

        assert_eq!(store.get("worker-a", "session:1").await.unwrap(), Some(json!(1)));
        assert_eq!(store.clean("worker-a").await.unwrap(), 1);
        assert_eq!(store.get("worker-a", "session:1").await.unwrap(), None);
        assert_eq!(store.get("worker-b", "session:1").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_memory_store_remove_last_key_drops_namespace() {
        let store = MemoryStore::new();
        store.put("worker-a", "k", json!(true)).await.unwrap();
        store.remove("worker-a", "k").await.unwrap();

        assert_eq!(store.namespace_count(), 0);
        assert!(store.keys("worker-a").await.unwrap().is_empty());
        assert_eq!(store.clean("worker-a").await.unwrap(), 0);
    }
}
