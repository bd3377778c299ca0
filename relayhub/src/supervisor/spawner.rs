//! Forking worker processes.

use std::io;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::protocol::{ControlMessage, WorkerExit};

/// Capacity of a worker's control channel.
const CONTROL_CHANNEL_CAPACITY: usize = 8;

/// A freshly started worker, as seen by the supervisor.
pub struct SpawnedWorker {
    pub pid: Option<u32>,
    /// Control messages to the worker. Dropping it closes the worker's stdin.
    pub control: mpsc::Sender<ControlMessage>,
    /// Fire to kill the worker outright.
    pub kill: oneshot::Sender<()>,
    /// Resolves once the worker is gone.
    pub exited: BoxFuture<'static, WorkerExit>,
}

/// Starts workers for pool slots.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, slot: usize) -> io::Result<SpawnedWorker>;
}

/// Re-executes the current binary in worker mode.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpawner {
    extra_args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments appended after `worker --slot <n>` (configuration overrides).
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, slot: usize) -> io::Result<SpawnedWorker> {
        let mut args = vec!["worker".to_string(), "--slot".to_string(), slot.to_string()];
        args.extend(self.extra_args.iter().cloned());

        let mut child = process_utils::self_command(args)?.spawn()?;
        let pid = child.id();
        let stdin = child.stdin.take();

        let (control, mut control_rx) = mpsc::channel::<ControlMessage>(CONTROL_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let Some(mut stdin) = stdin else {
                warn!("Worker slot {} has no stdin, control messages are dropped", slot);
                return;
            };
            while let Some(message) = control_rx.recv().await {
                let line = match message.to_line() {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to encode control message {:?}: {}", message, e);
                        continue;
                    }
                };
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    debug!("Worker slot {} stdin closed: {}", slot, e);
                    break;
                }
                let _ = stdin.flush().await;
            }
            // stdin is dropped here, the worker sees EOF
        });

        let (kill, kill_rx) = oneshot::channel::<()>();
        let exited = async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => WorkerExit::from_status(status),
                    Err(e) => WorkerExit::Lost(e.to_string()),
                },
                Ok(()) = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill worker slot {}: {}", slot, e);
                    }
                    match child.wait().await {
                        Ok(status) => WorkerExit::from_status(status),
                        Err(e) => WorkerExit::Lost(e.to_string()),
                    }
                }
            }
        }
        .boxed();

        Ok(SpawnedWorker {
            pid,
            control,
            kill,
            exited,
        })
    }
}
