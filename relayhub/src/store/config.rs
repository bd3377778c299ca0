use async_trait::async_trait;
use dashmap::DashMap;
use platforms::ConfigError;
use serde_json::{Map, Value};

/// Process-wide configuration, read-only from the routing layer.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Value of `key` for `platform`.
    async fn get(&self, platform: &str, key: &str) -> Result<Value, ConfigError>;
}

/// In-memory configuration store keyed by `(platform, key)`.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: DashMap<(String, String), Value>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, platform: &str, key: &str, value: Value) {
        self.entries
            .insert((platform.to_string(), key.to_string()), value);
    }

    /// Merge object entries into the object stored at `key`.
    pub fn merge(&self, platform: &str, key: &str, entries: Map<String, Value>) {
        let mut slot = self
            .entries
            .entry((platform.to_string(), key.to_string()))
            .or_insert_with(|| Value::Object(Map::new()));
        match slot.value_mut() {
            Value::Object(existing) => existing.extend(entries),
            other => *other = Value::Object(entries),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, platform: &str, key: &str) -> Result<Value, ConfigError> {
        self.entries
            .get(&(platform.to_string(), key.to_string()))
            .map(|v| v.value().clone())
            .ok_or_else(|| ConfigError::MissingKey(format!("{}.{}", platform, key)))
    }
}
