//! Worker process runtime.
//!
//! A worker owns one dispatcher, serves the WebSocket transport on the
//! shared port and waits for instructions from its supervisor on stdin.
//! It never shuts down on its own OS signals: only a shutdown instruction
//! (or the supervisor going away) starts the drain.

use std::sync::Arc;
use std::time::Duration;

use platforms::PlatformRegistry;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{GatewayConfig, load_credentials};
use crate::context::{WorkerContext, WorkerId};
use crate::dispatcher::Dispatcher;
use crate::store::{FsStore, MemoryConfigStore};
use crate::supervisor::{ControlMessage, EXIT_INIT_FAILURE, EXIT_SHUTDOWN};
use crate::transport::{TransportState, bind_reuseport, serve};

/// Exit code of a worker whose transport stopped on its own.
pub const EXIT_TRANSPORT_FAILURE: i32 = 3;

/// Extra time granted on top of the drain timeout for listener cleanup.
pub const CLEANUP_GRACE: Duration = Duration::from_secs(5);

/// Time the transport gets to flush and close its sockets after the drain.
pub const TRANSPORT_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Longest a worker takes from a shutdown instruction to its exit, not
/// counting the final namespace cleanup.
pub fn shutdown_budget(drain_timeout: Duration) -> Duration {
    drain_timeout + CLEANUP_GRACE + TRANSPORT_CLOSE_GRACE
}

/// Why a worker stopped serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// The supervisor sent a shutdown instruction.
    Instructed,
    /// The control channel closed.
    SupervisorGone,
    /// The transport ended without being asked to.
    TransportFailed,
}

impl StopCause {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Instructed | Self::SupervisorGone => EXIT_SHUTDOWN,
            Self::TransportFailed => EXIT_TRANSPORT_FAILURE,
        }
    }
}

/// Entry point of `relayhub worker --slot <n>`. Returns the exit code.
pub async fn run_worker(config: GatewayConfig, slot: usize) -> i32 {
    let worker_id = WorkerId::generate();
    let span = info_span!("worker", slot, id = %worker_id);

    async move {
        tokio::spawn(ignore_termination_signals().in_current_span());

        let registry = PlatformRegistry::with_defaults();
        let config_store = MemoryConfigStore::new();
        if let Some(path) = &config.credentials_file
            && let Err(e) = load_credentials(path, &registry, &config_store).await
        {
            error!("Failed to load credentials from {}: {}", path.display(), e);
            return EXIT_INIT_FAILURE;
        }

        let addr = match config.socket_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("{}", e);
                return EXIT_INIT_FAILURE;
            }
        };
        let listener = match bind_reuseport(addr) {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind {}: {}", addr, e);
                return EXIT_INIT_FAILURE;
            }
        };

        let store = Arc::new(FsStore::new(&config.state_dir));
        let ctx = Arc::new(WorkerContext::with_id(
            worker_id,
            slot,
            config,
            store,
            Arc::new(config_store),
        ));

        serve_worker(ctx, &registry, listener, tokio::io::stdin()).await
    }
    .instrument(span)
    .await
}

/// Run a worker until it is told to stop, then drain it.
///
/// `control` carries newline-delimited [`ControlMessage`]s; EOF counts as
/// a shutdown instruction.
pub async fn serve_worker<R>(
    ctx: Arc<WorkerContext>,
    registry: &PlatformRegistry,
    listener: TcpListener,
    control: R,
) -> i32
where
    R: AsyncRead + Unpin,
{
    let client = match platforms::http::default_client() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return EXIT_INIT_FAILURE;
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(ctx.clone()));
    if let Err(e) = dispatcher.init(registry, client).await {
        error!("Worker {} failed to initialize: {}", ctx.worker_id, e);
        return EXIT_INIT_FAILURE;
    }

    let cancel = CancellationToken::new();
    let transport_state = TransportState::new(dispatcher.clone(), cancel.clone());
    let connections = transport_state.connections();
    let mut transport = tokio::spawn(serve(listener, transport_state).in_current_span());
    info!("Worker {} serving {:?}", ctx.worker_id, dispatcher.platforms());

    let cause = tokio::select! {
        cause = wait_for_instruction(control) => cause,
        result = &mut transport => {
            match result {
                Ok(Ok(())) => error!("Transport stopped unexpectedly"),
                Ok(Err(e)) => error!("Transport failed: {}", e),
                Err(e) => error!("Transport task panicked: {}", e),
            }
            StopCause::TransportFailed
        }
    };

    ctx.shutdown.trigger();
    info!("Worker {} stopping ({:?})", ctx.worker_id, cause);

    // Sockets stay open during the drain: results of in-flight jobs still
    // reach their clients, new jobs are answered with `dispatcher_draining`.
    match tokio::time::timeout(ctx.config.drain_timeout + CLEANUP_GRACE, dispatcher.shutdown()).await {
        Ok(report) => debug!("Drain report: {:?}", report),
        Err(_) => warn!("Drain did not finish in time, exiting anyway"),
    }

    cancel.cancel();
    let closed = async {
        if !transport.is_finished() {
            let _ = (&mut transport).await;
        }
        connections.close();
        connections.wait().await;
    };
    if tokio::time::timeout(TRANSPORT_CLOSE_GRACE, closed).await.is_err() {
        warn!("Transport did not close in time, {} socket(s) still open", connections.len());
        transport.abort();
    }

    // No-op when the drain already released the namespace.
    if let Err(e) = ctx.release_store().await {
        error!("Failed to release store namespace {}: {}", ctx.namespace(), e);
    }

    info!("Worker {} exiting with code {}", ctx.worker_id, cause.exit_code());
    cause.exit_code()
}

/// Read control lines until a shutdown instruction or EOF.
pub async fn wait_for_instruction<R>(control: R) -> StopCause
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(control).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match ControlMessage::from_line(&line) {
                Ok(ControlMessage::Shutdown) => return StopCause::Instructed,
                Err(e) => warn!("Ignoring control message {:?}: {}", line, e),
            },
            Ok(None) => {
                warn!("Control channel closed, assuming the supervisor is gone");
                return StopCause::SupervisorGone;
            }
            Err(e) => {
                warn!("Failed to read control channel: {}", e);
                return StopCause::SupervisorGone;
            }
        }
    }
}

/// Swallow SIGINT/SIGTERM so a terminal Ctrl+C reaching the whole process
/// group does not race the supervisor's orchestrated shutdown.
async fn ignore_termination_signals() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut interrupt, mut terminate) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        loop {
            tokio::select! {
                _ = interrupt.recv() => debug!("Ignoring SIGINT, waiting for the supervisor"),
                _ = terminate.recv() => debug!("Ignoring SIGTERM, waiting for the supervisor"),
            }
        }
    }

    #[cfg(not(unix))]
    loop {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        debug!("Ignoring Ctrl+C, waiting for the supervisor");
    }
}
