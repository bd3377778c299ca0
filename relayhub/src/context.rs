//! Per-process context.
//!
//! Worker identity, the shutdown flag and the stores are owned by a
//! [`WorkerContext`] built at startup and handed to the dispatcher,
//! listeners and transport.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::store::{ConfigStore, SharedStore, StoreError};

/// Opaque, time-seeded worker identity.
///
/// Restarted workers get a fresh identity, so they never collide with
/// records a crashed predecessor left in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis();
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{:x}-{}-{}", millis, std::process::id(), &random[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set exactly once, when shutdown is first requested.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the call that set it.
    pub fn trigger(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything a worker process shares between its components.
pub struct WorkerContext {
    pub worker_id: WorkerId,
    pub slot: usize,
    pub config: GatewayConfig,
    pub shutdown: ShutdownFlag,
    store: Arc<dyn SharedStore>,
    config_store: Arc<dyn ConfigStore>,
    store_released: AtomicBool,
}

impl WorkerContext {
    pub fn new(
        slot: usize,
        config: GatewayConfig,
        store: Arc<dyn SharedStore>,
        config_store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self::with_id(WorkerId::generate(), slot, config, store, config_store)
    }

    pub fn with_id(
        worker_id: WorkerId,
        slot: usize,
        config: GatewayConfig,
        store: Arc<dyn SharedStore>,
        config_store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            worker_id,
            slot,
            config,
            shutdown: ShutdownFlag::new(),
            store,
            config_store,
            store_released: AtomicBool::new(false),
        }
    }

    /// Shared-store namespace owned by this worker.
    pub fn namespace(&self) -> String {
        format!("worker-{}", self.worker_id)
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    pub fn config_store(&self) -> &Arc<dyn ConfigStore> {
        &self.config_store
    }

    /// Remove this worker's namespace from the shared store.
    ///
    /// Runs at most once per process; returns `Ok(false)` on later calls.
    pub async fn release_store(&self) -> Result<bool, StoreError> {
        if self.store_released.swap(true, Ordering::AcqRel) {
            debug!("Store namespace {} already released", self.namespace());
            return Ok(false);
        }

        let namespace = self.namespace();
        let removed = self.store.clean(&namespace).await?;
        info!("Released store namespace {} ({} records)", namespace, removed);
        Ok(true)
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("worker_id", &self.worker_id)
            .field("slot", &self.slot)
            .field("shutdown", &self.shutdown.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryConfigStore, MemoryStore};
    use serde_json::json;

    #[test]
    fn test_worker_ids_are_unique() {
        let a = WorkerId::generate();
        let b = WorkerId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_shutdown_flag_set_once() {
        let flag = ShutdownFlag::new();
        let clone = flag.clone();

        assert!(!flag.is_set());
        assert!(flag.trigger());
        assert!(!clone.trigger());
        assert!(clone.is_set());
    }

    #[tokio::test]
    async fn test_release_store_runs_once() {
        let store = Arc::new(MemoryStore::new());
        let ctx = WorkerContext::with_id(
            WorkerId::from("w1"),
            0,
            GatewayConfig::default(),
            store.clone(),
            Arc::new(MemoryConfigStore::new()),
        );
        store.put(&ctx.namespace(), "session:1", json!(1)).await.unwrap();

        assert!(ctx.release_store().await.unwrap());
        assert!(!ctx.release_store().await.unwrap());
        assert_eq!(store.namespace_count(), 0);
    }
}
