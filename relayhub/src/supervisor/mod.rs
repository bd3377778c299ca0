//! Worker pool supervisor.
//!
//! The `Supervisor` is responsible for:
//! - Forking the configured number of workers at startup
//! - Replacing workers that exit outside an orchestrated shutdown
//! - Backing off slots that crash repeatedly
//! - Telling every worker to shut down on a termination signal
//!
//! A worker exiting with [`EXIT_SHUTDOWN`] marks the pool as shutting
//! down; from then on no worker is replaced.

pub mod protocol;
pub mod restart_tracker;
pub mod spawner;

pub use protocol::{ControlMessage, EXIT_INIT_FAILURE, EXIT_SHUTDOWN, WorkerExit};
pub use restart_tracker::{RestartTracker, RestartTrackerConfig};
pub use spawner::{ProcessSpawner, SpawnedWorker, WorkerSpawner};

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_WORKERS};
use crate::context::ShutdownFlag;
use crate::worker::shutdown_budget;

/// Time past a worker's own shutdown budget before it is killed.
pub const KILL_MARGIN: Duration = Duration::from_secs(3);

/// Configuration for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Pool size.
    pub workers: usize,
    pub restart_config: RestartTrackerConfig,
    /// How long workers get to exit after the shutdown instruction before
    /// they are killed.
    pub shutdown_timeout: Duration,
}

impl SupervisorConfig {
    /// Derive the kill deadline from the drain timeout workers run with,
    /// so a worker is only killed after its own shutdown bound has passed.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_budget(drain_timeout) + KILL_MARGIN;
        self
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            restart_config: RestartTrackerConfig::default(),
            shutdown_timeout: shutdown_budget(DEFAULT_DRAIN_TIMEOUT) + KILL_MARGIN,
        }
    }
}

/// A live worker.
struct WorkerHandle {
    pid: Option<u32>,
    control: mpsc::Sender<ControlMessage>,
    kill: Option<oneshot::Sender<()>>,
    started_at: Instant,
}

#[derive(Debug)]
struct PendingRestart {
    slot: usize,
    restart_at: Instant,
}

/// What the supervisor did about a worker exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitAction {
    /// A replacement will be forked after `backoff`.
    ReplacementScheduled { slot: usize, backoff: Duration },
    /// The worker finished an orchestrated shutdown the supervisor did not
    /// ask for; the pool is now shutting down.
    PoolShuttingDown { slot: usize },
    /// The pool is shutting down; the slot stays empty.
    Retired { slot: usize },
}

/// Report generated when the pool has stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers the shutdown instruction was delivered to.
    pub workers_signalled: usize,
    /// Workers that exited with [`EXIT_SHUTDOWN`] during shutdown.
    pub graceful_exits: usize,
    /// Workers killed after the shutdown timeout.
    pub forced_terminations: usize,
    /// Replacement workers forked over the pool's lifetime.
    pub replacements: usize,
    /// Every exit observed, by slot.
    pub exits: Vec<(usize, WorkerExit)>,
}

impl ShutdownReport {
    pub fn all_graceful(&self) -> bool {
        self.forced_terminations == 0
    }
}

pub struct Supervisor {
    spawner: Arc<dyn WorkerSpawner>,
    config: SupervisorConfig,
    shutdown: ShutdownFlag,
    workers: HashMap<usize, WorkerHandle>,
    exits: JoinSet<(usize, WorkerExit)>,
    restart_tracker: RestartTracker,
    pending_restarts: Vec<PendingRestart>,
    shutdown_deadline: Option<Instant>,
    report: ShutdownReport,
}

impl Supervisor {
    pub fn new(spawner: Arc<dyn WorkerSpawner>, config: SupervisorConfig) -> Self {
        let restart_tracker = RestartTracker::with_config(config.restart_config.clone());
        Self {
            spawner,
            config,
            shutdown: ShutdownFlag::new(),
            workers: HashMap::new(),
            exits: JoinSet::new(),
            restart_tracker,
            pending_restarts: Vec::new(),
            shutdown_deadline: None,
            report: ShutdownReport::default(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_set()
    }

    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn pending_restart_count(&self) -> usize {
        self.pending_restarts.len()
    }

    /// Fork one worker per slot.
    pub async fn start(&mut self) -> io::Result<()> {
        info!("Starting worker pool with {} worker(s)", self.config.workers);
        for slot in 0..self.config.workers {
            self.spawn_slot(slot).await?;
        }
        Ok(())
    }

    async fn spawn_slot(&mut self, slot: usize) -> io::Result<()> {
        let spawned = self.spawner.spawn(slot).await?;
        info!("Forked worker slot {} (pid {:?})", slot, spawned.pid);

        self.workers.insert(
            slot,
            WorkerHandle {
                pid: spawned.pid,
                control: spawned.control,
                kill: Some(spawned.kill),
                started_at: Instant::now(),
            },
        );
        let exited = spawned.exited;
        self.exits.spawn(async move { (slot, exited.await) });
        Ok(())
    }

    /// React to a worker exit.
    pub fn handle_exit(&mut self, slot: usize, exit: WorkerExit) -> ExitAction {
        let handle = self.workers.remove(&slot);
        self.report.exits.push((slot, exit.clone()));

        if self.shutdown.is_set() {
            if exit.is_orchestrated() {
                self.report.graceful_exits += 1;
                info!("Worker slot {} shut down", slot);
            } else {
                warn!("Worker slot {} exited during shutdown: {}", slot, exit);
            }
            return ExitAction::Retired { slot };
        }

        if exit.is_orchestrated() {
            warn!(
                "Worker slot {} exited with the shutdown code, shutting the pool down",
                slot
            );
            self.report.graceful_exits += 1;
            self.begin_shutdown();
            return ExitAction::PoolShuttingDown { slot };
        }

        error!("Worker slot {} crashed: {}", slot, exit);

        // A worker that outlived the failure window is not crash-looping.
        if let Some(handle) = handle
            && handle.started_at.elapsed() >= self.config.restart_config.failure_window
        {
            self.restart_tracker.clear_failures(slot);
        }

        let backoff = self.restart_tracker.record_failure(slot);
        if backoff.is_zero() {
            info!("Replacing worker slot {} now", slot);
        } else {
            warn!(
                "Worker slot {} is crash-looping ({} crashes in window), replacement delayed by {:?}; pool at {}/{} worker(s)",
                slot,
                self.restart_tracker.recent_failures(slot),
                backoff,
                self.workers.len(),
                self.config.workers
            );
        }
        self.pending_restarts.push(PendingRestart {
            slot,
            restart_at: Instant::now() + backoff,
        });
        ExitAction::ReplacementScheduled { slot, backoff }
    }

    /// Set the shutdown flag and instruct every live worker to stop.
    ///
    /// Returns `false` when shutdown was already underway.
    pub fn begin_shutdown(&mut self) -> bool {
        if !self.shutdown.trigger() {
            return false;
        }

        info!("Shutting down worker pool ({} live worker(s))", self.workers.len());
        self.pending_restarts.clear();
        self.shutdown_deadline = Some(Instant::now() + self.config.shutdown_timeout);

        for (slot, handle) in &self.workers {
            match handle.control.try_send(ControlMessage::Shutdown) {
                Ok(()) => {
                    debug!("Sent shutdown to worker slot {} (pid {:?})", slot, handle.pid);
                    self.report.workers_signalled += 1;
                }
                Err(e) => warn!("Failed to send shutdown to worker slot {}: {}", slot, e),
            }
        }
        true
    }

    /// Fork replacements whose backoff has elapsed.
    pub async fn process_pending_restarts(&mut self) {
        if self.shutdown.is_set() {
            self.pending_restarts.clear();
            return;
        }

        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_restarts)
            .into_iter()
            .partition(|p| p.restart_at <= now);
        self.pending_restarts = waiting;

        for pending in due {
            match self.spawn_slot(pending.slot).await {
                Ok(()) => self.report.replacements += 1,
                Err(e) => {
                    error!("Failed to fork replacement for slot {}: {}", pending.slot, e);
                    let backoff = self.restart_tracker.record_failure(pending.slot);
                    self.pending_restarts.push(PendingRestart {
                        slot: pending.slot,
                        restart_at: Instant::now() + backoff,
                    });
                }
            }
        }
    }

    fn next_restart_at(&self) -> Option<Instant> {
        self.pending_restarts.iter().map(|p| p.restart_at).min()
    }

    /// Kill workers still alive after the shutdown timeout.
    fn force_terminate(&mut self) {
        warn!(
            "Shutdown timeout reached, killing {} worker(s)",
            self.workers.len()
        );
        for (slot, handle) in self.workers.iter_mut() {
            if let Some(kill) = handle.kill.take() {
                debug!("Killing worker slot {} (pid {:?})", slot, handle.pid);
                if kill.send(()).is_ok() {
                    self.report.forced_terminations += 1;
                }
            }
        }
    }

    /// Supervise the pool until it has shut down.
    ///
    /// Every message on `signals` is a termination request; only the first
    /// one has an effect.
    pub async fn run(mut self, mut signals: mpsc::Receiver<()>) -> ShutdownReport {
        let mut signals_open = true;
        let far_future = || Instant::now() + Duration::from_secs(86_400);

        loop {
            if self.shutdown.is_set() && self.workers.is_empty() {
                break;
            }

            let restart_at = self.next_restart_at();
            let deadline = self
                .shutdown_deadline
                .filter(|_| self.workers.values().any(|h| h.kill.is_some()));

            tokio::select! {
                Some(joined) = self.exits.join_next() => match joined {
                    Ok((slot, exit)) => {
                        let action = self.handle_exit(slot, exit);
                        debug!("Worker exit handled: {:?}", action);
                    }
                    Err(e) => error!("Worker monitor task failed: {}", e),
                },
                signal = signals.recv(), if signals_open => match signal {
                    Some(()) => {
                        if !self.begin_shutdown() {
                            debug!("Shutdown already in progress");
                        }
                    }
                    None => signals_open = false,
                },
                _ = tokio::time::sleep_until(restart_at.unwrap_or_else(far_future)), if restart_at.is_some() => {
                    self.process_pending_restarts().await;
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                    self.force_terminate();
                }
                else => {
                    warn!("Worker pool has nothing left to supervise");
                    break;
                }
            }
        }

        let stats = self.restart_tracker.stats();
        info!(
            "Worker pool stopped: {} signalled, {} graceful, {} forced, {} replacement(s) over {} slot(s)",
            self.report.workers_signalled,
            self.report.graceful_exits,
            self.report.forced_terminations,
            stats.total_restarts,
            stats.slots
        );
        self.report
    }
}
