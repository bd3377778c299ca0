//! The platform adapter contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::AdapterError;
use crate::job::{Job, Verb};
use crate::schema::PlatformSchema;
use crate::session::PlatformSession;

/// Default bound on a single upstream request made by `fetch`.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Process-level resources an adapter receives at `init`.
#[derive(Debug, Clone)]
pub struct PlatformContext {
    /// Identity of the worker hosting the adapter.
    pub worker_id: String,
    /// Shared HTTP client.
    pub client: Client,
    /// Bound on each upstream request of a fetch.
    pub fetch_timeout: Duration,
}

impl PlatformContext {
    pub fn new(worker_id: impl Into<String>, client: Client) -> Self {
        Self {
            worker_id: worker_id.into(),
            client,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

/// Successful completion of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// `items` documents were pushed to the session.
    Delivered {
        items: usize,
        message: Option<String>,
    },
    /// The upstream had nothing to return; nothing was pushed.
    NoResult { message: String },
}

impl FetchOutcome {
    pub fn delivered(items: usize) -> Self {
        if items == 0 {
            return Self::no_result();
        }
        Self::Delivered {
            items,
            message: None,
        }
    }

    pub fn no_result() -> Self {
        Self::NoResult {
            message: "no result".to_string(),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Delivered { message, .. } => message.as_deref(),
            Self::NoResult { message } => Some(message),
        }
    }
}

/// One integration with an external network.
///
/// A single adapter instance serves every session of a worker: verbs take
/// `&self` plus the session of the job being processed. Verbs an adapter
/// does not offer keep their default body, which reports the verb as
/// unimplemented.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Platform name jobs are routed by.
    fn name(&self) -> &'static str;

    /// Structural contract for this platform's jobs.
    fn schema(&self) -> &PlatformSchema;

    /// Verbs this adapter implements.
    fn capabilities(&self) -> &'static [Verb];

    fn supports(&self, verb: Verb) -> bool {
        self.capabilities().contains(&verb)
    }

    /// Store process resources. Must not perform network I/O.
    async fn init(&mut self, _ctx: &PlatformContext) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn fetch(
        &self,
        _job: &Job,
        _session: &dyn PlatformSession,
    ) -> Result<FetchOutcome, AdapterError> {
        Err(AdapterError::unimplemented(self.name(), Verb::Fetch))
    }

    async fn post(&self, _job: &Job, _session: &dyn PlatformSession) -> Result<Value, AdapterError> {
        Err(AdapterError::unimplemented(self.name(), Verb::Post))
    }

    async fn send(&self, _job: &Job, _session: &dyn PlatformSession) -> Result<Value, AdapterError> {
        Err(AdapterError::unimplemented(self.name(), Verb::Send))
    }

    /// Release adapter-held resources.
    async fn cleanup(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}
