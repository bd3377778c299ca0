//! Per-connection sessions.
//!
//! A [`Session`] is created when a client connects and dropped when it
//! disconnects. It owns the outbound channel to that client and a local
//! configuration layer (credentials registered with `set`), overlaid on
//! the process-wide configuration store entry by entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use platforms::{ConfigError, Job, PlatformSession};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::outcome::JobResult;
use crate::store::ConfigStore;

/// A document on its way to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    /// Item pushed by an adapter while processing a job.
    Item(Job),
    /// Terminal result of a job.
    Result(JobResult),
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Context of one client connection.
pub struct Session {
    id: String,
    outbound: OutboundSender,
    local_config: RwLock<HashMap<(String, String), Value>>,
    config_store: Arc<dyn ConfigStore>,
}

impl Session {
    pub fn new(id: impl Into<String>, outbound: OutboundSender, config_store: Arc<dyn ConfigStore>) -> Self {
        Self {
            id: id.into(),
            outbound,
            local_config: RwLock::new(HashMap::new()),
            config_store,
        }
    }

    /// Create a session together with the receiving end of its channel.
    pub fn channel(id: impl Into<String>, config_store: Arc<dyn ConfigStore>) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx, config_store), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the client end is gone.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Look up `key` for `platform` in the process-wide store, overlaid with
    /// the session layer.
    ///
    /// Object values merge per entry with session entries winning, so a
    /// `set` for one actor keeps the preloaded entries of every other actor.
    pub async fn get_config(&self, platform: &str, key: &str) -> Result<Value, ConfigError> {
        let local = self
            .local_config
            .read()
            .get(&(platform.to_string(), key.to_string()))
            .cloned();
        let Some(local) = local else {
            return self.config_store.get(platform, key).await;
        };

        match (self.config_store.get(platform, key).await, local) {
            (Ok(Value::Object(mut global)), Value::Object(local)) => {
                global.extend(local);
                Ok(Value::Object(global))
            }
            (_, local) => Ok(local),
        }
    }

    /// Merge object entries into the session-local value of `key`.
    pub fn merge_config(&self, platform: &str, key: &str, entries: Map<String, Value>) {
        let mut local = self.local_config.write();
        let slot = local
            .entry((platform.to_string(), key.to_string()))
            .or_insert_with(|| Value::Object(Map::new()));
        match slot {
            Value::Object(existing) => existing.extend(entries),
            other => *other = Value::Object(entries),
        }
    }

    /// Push an item to the client. Dropped (and logged) if the client is gone.
    pub fn send(&self, job: Job) {
        self.deliver(Outbound::Item(job));
    }

    /// Deliver the terminal result of a job.
    pub fn respond(&self, result: JobResult) {
        self.deliver(Outbound::Result(result));
    }

    fn deliver(&self, message: Outbound) {
        if self.outbound.send(message).is_err() {
            warn!(session = %self.id, "Client disconnected, dropping outbound message");
        }
    }

    /// View of this session scoped to one platform, handed to adapters.
    pub fn scoped<'a>(&'a self, platform: &'a str) -> PlatformScope<'a> {
        PlatformScope {
            session: self,
            platform,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A session as seen by one platform adapter.
pub struct PlatformScope<'a> {
    session: &'a Session,
    platform: &'a str,
}

#[async_trait]
impl PlatformSession for PlatformScope<'_> {
    fn id(&self) -> &str {
        self.session.id()
    }

    fn platform(&self) -> &str {
        self.platform
    }

    async fn get_config(&self, key: &str) -> Result<Value, ConfigError> {
        self.session.get_config(self.platform, key).await
    }

    fn send(&self, mut job: Job) {
        if job.platform.is_empty() {
            job.platform = self.platform.to_string();
        }
        self.session.send(job);
    }

    fn log(&self, message: &str) {
        info!(session = %self.session.id, platform = %self.platform, "{}", message);
    }

    fn debug(&self, message: &str) {
        debug!(session = %self.session.id, platform = %self.platform, "{}", message);
    }

    fn error(&self, message: &str) {
        error!(session = %self.session.id, platform = %self.platform, "{}", message);
    }
}
