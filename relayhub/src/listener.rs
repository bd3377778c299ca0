//! Listener: hosts one platform adapter inside a worker.
//!
//! The listener is the failure boundary of an adapter. Whatever a verb
//! method does (returns an error, panics), the caller gets a [`JobResult`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use platforms::{AdapterError, FetchOutcome, Job, Platform, PlatformContext, PlatformRegistry, Verb};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::outcome::{FailureKind, JobHeader, JobResult};
use crate::session::Session;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to construct adapter for {platform}: {source}")]
    Construct {
        platform: String,
        #[source]
        source: AdapterError,
    },

    #[error("adapter for {0} declares no schema")]
    MissingSchema(String),

    #[error("failed to initialize adapter for {platform}: {source}")]
    Init {
        platform: String,
        #[source]
        source: AdapterError,
    },
}

pub struct Listener {
    platform: String,
    adapter: Box<dyn Platform>,
    shut_down: AtomicBool,
}

impl Listener {
    /// Construct the adapter for `platform` and initialize it.
    pub async fn init(
        platform: &str,
        registry: &PlatformRegistry,
        ctx: &PlatformContext,
    ) -> Result<Self, ListenerError> {
        let mut adapter = registry
            .create(platform)
            .map_err(|source| ListenerError::Construct {
                platform: platform.to_string(),
                source,
            })?;

        if adapter.schema().is_empty() {
            return Err(ListenerError::MissingSchema(platform.to_string()));
        }

        adapter
            .init(ctx)
            .await
            .map_err(|source| ListenerError::Init {
                platform: platform.to_string(),
                source,
            })?;

        info!(
            "Listener for {} initialized (worker {}, verbs: {:?})",
            adapter.name(),
            ctx.worker_id,
            adapter.capabilities()
        );

        Ok(Self {
            platform: adapter.name().to_string(),
            adapter,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn adapter(&self) -> &dyn Platform {
        self.adapter.as_ref()
    }

    /// Run `verb` on the adapter and turn the outcome into a result.
    pub async fn dispatch(&self, verb: Verb, job: &Job, session: &Session) -> JobResult {
        let header = JobHeader {
            rid: job.rid.clone(),
            platform: self.platform.clone(),
            verb: verb.to_string(),
        };

        if matches!(verb, Verb::Update | Verb::Set) {
            return JobResult::failure(
                &header,
                FailureKind::UnknownVerb,
                format!("{} has no handler for verb {}", self.platform, verb),
            );
        }

        if !self.adapter.supports(verb) {
            return JobResult::failure(
                &header,
                FailureKind::UnimplementedVerb,
                AdapterError::unimplemented(self.platform.as_str(), verb).to_string(),
            );
        }

        let scope = session.scoped(&self.platform);
        debug!(session = %session.id(), "Dispatching {}.{}", self.platform, verb);

        let call = async {
            match verb {
                Verb::Fetch => self.adapter.fetch(job, &scope).await.map(Completion::Fetched),
                Verb::Post => self.adapter.post(job, &scope).await.map(Completion::Object),
                Verb::Send => self.adapter.send(job, &scope).await.map(Completion::Object),
                Verb::Update | Verb::Set => {
                    Err(AdapterError::unimplemented(self.platform.as_str(), verb))
                }
            }
        };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(Completion::Fetched(outcome))) => fetched(&header, outcome),
            Ok(Ok(Completion::Object(object))) => JobResult::success(&header).with_object(object),
            Ok(Err(e)) => {
                warn!(session = %session.id(), "{}.{} failed: {}", self.platform, verb, e);
                JobResult::failure(&header, FailureKind::of(&e), e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(session = %session.id(), "{}.{} panicked: {}", self.platform, verb, message);
                JobResult::failure(
                    &header,
                    FailureKind::AdapterFailure,
                    format!("adapter panicked: {}", message),
                )
            }
        }
    }

    /// Run the adapter's cleanup once; later calls are no-ops.
    pub async fn shutdown(&self) -> Result<(), AdapterError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("Listener for {} already shut down", self.platform);
            return Ok(());
        }

        match AssertUnwindSafe(self.adapter.cleanup()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(AdapterError::Other(format!(
                "cleanup panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

enum Completion {
    Fetched(FetchOutcome),
    Object(serde_json::Value),
}

fn fetched(header: &JobHeader, outcome: FetchOutcome) -> JobResult {
    match outcome {
        FetchOutcome::Delivered { items, message } => {
            let result = JobResult::success(header).with_items(items);
            match message {
                Some(message) => result.with_message(message),
                None => result,
            }
        }
        FetchOutcome::NoResult { message } => JobResult::success(header)
            .with_items(0)
            .with_message(message),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
