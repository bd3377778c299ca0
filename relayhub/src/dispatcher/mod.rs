//! Per-worker job routing.
//!
//! The dispatcher owns one [`Listener`] per platform this worker serves.
//! It validates every incoming job against the target platform's schema,
//! forwards it to the listener and delivers exactly one [`JobResult`] to
//! the session that submitted it.
//!
//! Lifecycle: `Uninitialized -> Ready -> Draining -> Stopped`.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use platforms::schema::validate;
use platforms::session::CREDENTIALS_KEY;
use platforms::{Job, PlatformContext, PlatformRegistry, ValidationError, Verb};
use reqwest::Client;
use serde_json::Value;
use strum::Display;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::context::WorkerContext;
use crate::listener::{Listener, ListenerError};
use crate::outcome::{FailureKind, JobHeader, JobResult};
use crate::session::Session;

/// Lifecycle state of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DispatcherState {
    Uninitialized,
    Ready,
    Draining,
    Stopped,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid job: {0}")]
    Malformed(String),

    #[error("invalid job: {0}")]
    Validation(#[from] ValidationError),

    #[error("platform {0} is not served by this worker")]
    UnknownPlatform(String),

    #[error("unknown verb '{0}'")]
    UnknownVerb(String),

    #[error("{platform}.{verb} unimplemented")]
    Unimplemented { platform: String, verb: Verb },

    #[error("dispatcher is draining, not accepting jobs")]
    Draining,

    #[error("dispatcher is stopped")]
    Stopped,

    #[error("dispatcher is not ready (state: {0})")]
    NotReady(DispatcherState),

    #[error("no platforms configured")]
    NoPlatforms,

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

impl DispatchError {
    /// Failure kind reported to the client.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Malformed(_) | Self::Validation(_) => FailureKind::Validation,
            Self::UnknownPlatform(_) => FailureKind::UnknownPlatform,
            Self::UnknownVerb(_) => FailureKind::UnknownVerb,
            Self::Unimplemented { .. } => FailureKind::UnimplementedVerb,
            Self::Draining => FailureKind::DispatcherDraining,
            Self::Stopped | Self::NotReady(_) | Self::NoPlatforms | Self::Listener(_) => {
                FailureKind::DispatcherStopped
            }
        }
    }
}

/// Outcome of [`Dispatcher::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Listeners that were shut down.
    pub listeners: usize,
    /// Listeners whose cleanup failed.
    pub listener_failures: usize,
    /// Whether every in-flight job settled before the drain timeout.
    pub drained: bool,
    /// Whether this call removed the worker's store namespace.
    pub store_cleaned: bool,
}

pub struct Dispatcher {
    ctx: Arc<WorkerContext>,
    state: RwLock<DispatcherState>,
    listeners: RwLock<HashMap<String, Arc<Listener>>>,
    in_flight: TaskTracker,
    drained: OnceCell<DrainReport>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self {
            ctx,
            state: RwLock::new(DispatcherState::Uninitialized),
            listeners: RwLock::new(HashMap::new()),
            in_flight: TaskTracker::new(),
            drained: OnceCell::new(),
        }
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.ctx
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.read()
    }

    /// Platforms served by this dispatcher, sorted.
    pub fn platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self.listeners.read().keys().cloned().collect();
        platforms.sort();
        platforms
    }

    pub fn listener(&self, platform: &str) -> Option<Arc<Listener>> {
        self.listeners.read().get(&platform.to_ascii_lowercase()).cloned()
    }

    /// Build a listener for every configured platform and become ready.
    ///
    /// Any listener failing to initialize fails the whole call; listeners
    /// built so far are shut down again.
    pub async fn init(&self, registry: &PlatformRegistry, client: Client) -> Result<(), DispatchError> {
        let state = self.state();
        if state != DispatcherState::Uninitialized {
            return Err(DispatchError::NotReady(state));
        }

        let platforms = &self.ctx.config.platforms;
        if platforms.is_empty() {
            return Err(DispatchError::NoPlatforms);
        }

        let platform_ctx = PlatformContext::new(self.ctx.worker_id.as_str(), client)
            .with_fetch_timeout(self.ctx.config.fetch_timeout);

        let mut built: HashMap<String, Arc<Listener>> = HashMap::new();
        for platform in platforms {
            match Listener::init(platform, registry, &platform_ctx).await {
                Ok(listener) => {
                    built.insert(listener.platform().to_string(), Arc::new(listener));
                }
                Err(e) => {
                    error!("Worker {} failed to initialize {}: {}", self.ctx.worker_id, platform, e);
                    for listener in built.values() {
                        if let Err(cleanup) = listener.shutdown().await {
                            warn!("Cleanup of {} failed: {}", listener.platform(), cleanup);
                        }
                    }
                    return Err(e.into());
                }
            }
        }

        let count = built.len();
        *self.listeners.write() = built;
        *self.state.write() = DispatcherState::Ready;
        info!("Dispatcher ready with {} listener(s): {:?}", count, self.platforms());
        Ok(())
    }

    /// Route a raw text frame. Frames that are not JSON are answered with a
    /// validation failure.
    pub async fn route_text(&self, text: &str, session: &Session) -> JobResult {
        match serde_json::from_str::<Value>(text) {
            Ok(document) => self.route(document, session).await,
            Err(e) => {
                let error = DispatchError::Malformed(format!("not a JSON document: {}", e));
                let result = JobResult::failure(&JobHeader::default(), error.kind(), error.to_string());
                session.respond(result.clone());
                result
            }
        }
    }

    /// Route one job document and deliver its result to `session`.
    ///
    /// The returned result is the one delivered; it is delivered exactly once.
    pub async fn route(&self, document: Value, session: &Session) -> JobResult {
        // Held until the job settles so a concurrent drain waits for it.
        let _in_flight = self.in_flight.token();

        let header = JobHeader::from_document(&document);
        let result = match self.execute(document, &header, session).await {
            Ok(result) => result,
            Err(e) => {
                debug!(session = %session.id(), rid = ?header.rid, "Job rejected: {}", e);
                JobResult::failure(&header, e.kind(), e.to_string())
            }
        };

        session.respond(result.clone());
        result
    }

    async fn execute(
        &self,
        document: Value,
        header: &JobHeader,
        session: &Session,
    ) -> Result<JobResult, DispatchError> {
        match self.state() {
            DispatcherState::Ready => {}
            DispatcherState::Draining => return Err(DispatchError::Draining),
            DispatcherState::Stopped => return Err(DispatchError::Stopped),
            state @ DispatcherState::Uninitialized => return Err(DispatchError::NotReady(state)),
        }

        if !document.is_object() {
            return Err(DispatchError::Malformed("job must be a JSON object".to_string()));
        }
        if header.platform.is_empty() {
            return Err(DispatchError::Malformed("job has no platform".to_string()));
        }

        let listener = self
            .listener(&header.platform)
            .ok_or_else(|| DispatchError::UnknownPlatform(header.platform.clone()))?;

        let verb: Verb = header
            .verb
            .parse()
            .map_err(|_| DispatchError::UnknownVerb(header.verb.clone()))?;

        let schema = listener.adapter().schema();
        if verb == Verb::Set && !schema.declares(Verb::Set) {
            return Err(DispatchError::Unimplemented {
                platform: listener.platform().to_string(),
                verb,
            });
        }
        validate(schema, verb, &document)?;

        let job: Job =
            serde_json::from_value(document).map_err(|e| DispatchError::Malformed(e.to_string()))?;

        if matches!(verb, Verb::Fetch | Verb::Post | Verb::Send) && job.actor.address.is_empty() {
            return Err(DispatchError::Malformed("job.actor.address is required".to_string()));
        }

        debug!(
            session = %session.id(),
            rid = ?job.rid,
            "Routing {}.{} for {}",
            listener.platform(),
            verb,
            job.actor.address
        );

        if verb == Verb::Set {
            return Ok(register_credentials(listener.platform(), &job, header, session));
        }

        Ok(listener.dispatch(verb, &job, session).await)
    }

    /// Stop accepting jobs, wait for in-flight jobs, shut every listener
    /// down and release this worker's store namespace.
    ///
    /// Idempotent: later and concurrent calls return the first report.
    pub async fn shutdown(&self) -> &DrainReport {
        self.drained.get_or_init(|| self.drain()).await
    }

    async fn drain(&self) -> DrainReport {
        let previous = std::mem::replace(&mut *self.state.write(), DispatcherState::Draining);
        info!("Dispatcher draining (was {})", previous);

        self.in_flight.close();
        let drained = match tokio::time::timeout(self.ctx.config.drain_timeout, self.in_flight.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "{} job(s) still in flight after {:?}, shutting listeners down anyway",
                    self.in_flight.len(),
                    self.ctx.config.drain_timeout
                );
                false
            }
        };

        let listeners: Vec<Arc<Listener>> = self.listeners.read().values().cloned().collect();
        let results = join_all(listeners.iter().map(|listener| async move {
            (listener.platform().to_string(), listener.shutdown().await)
        }))
        .await;

        let mut listener_failures = 0;
        for (platform, result) in results {
            match result {
                Ok(()) => debug!("Listener for {} shut down", platform),
                Err(e) => {
                    listener_failures += 1;
                    warn!("Listener for {} failed to shut down: {}", platform, e);
                }
            }
        }

        let store_cleaned = match self.ctx.release_store().await {
            Ok(cleaned) => cleaned,
            Err(e) => {
                error!("Failed to release store namespace {}: {}", self.ctx.namespace(), e);
                false
            }
        };

        *self.state.write() = DispatcherState::Stopped;

        let report = DrainReport {
            listeners: listeners.len(),
            listener_failures,
            drained,
            store_cleaned,
        };
        info!(
            "Dispatcher stopped: {} listener(s), {} failure(s), drained: {}",
            report.listeners, report.listener_failures, report.drained
        );
        report
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("worker_id", &self.ctx.worker_id)
            .field("state", &self.state())
            .field("platforms", &self.platforms())
            .finish()
    }
}

/// Handle a validated `set` job: merge its credentials into the session.
fn register_credentials(platform: &str, job: &Job, header: &JobHeader, session: &Session) -> JobResult {
    let credentials = job
        .object
        .get(CREDENTIALS_KEY)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let count = credentials.len();

    session.merge_config(platform, CREDENTIALS_KEY, credentials);
    info!(session = %session.id(), "Registered {} credential(s) for {}", count, platform);

    JobResult::success(header).with_message(format!("credentials set for {} actor(s)", count))
}
