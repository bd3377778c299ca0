//! Supervisor/worker control protocol.
//!
//! The supervisor writes newline-delimited JSON [`ControlMessage`]s to a
//! worker's stdin. A worker reports back only through its exit status.

use std::process::ExitStatus;

use serde::{Deserialize, Serialize};

/// Exit code of a worker that finished an orchestrated shutdown.
///
/// Seeing it tells the supervisor the pool is shutting down; such a worker
/// is never replaced.
pub const EXIT_SHUTDOWN: i32 = 1;

/// Exit code of a worker whose listeners failed to initialize.
pub const EXIT_INIT_FAILURE: i32 = 2;

/// Instruction sent from the supervisor to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Drain, release the store namespace and exit with [`EXIT_SHUTDOWN`].
    Shutdown,
}

impl ControlMessage {
    /// Encode as one protocol line, newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

/// How a worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Exited with a code.
    Code(i32),
    /// Killed by a signal.
    Signaled,
    /// The supervisor lost track of the process (wait failed).
    Lost(String),
}

impl WorkerExit {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::Code(code),
            None => Self::Signaled,
        }
    }

    /// Whether the worker exited because of an orchestrated shutdown.
    pub fn is_orchestrated(&self) -> bool {
        matches!(self, Self::Code(EXIT_SHUTDOWN))
    }
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {}", code),
            Self::Signaled => f.write_str("killed by signal"),
            Self::Lost(reason) => write!(f, "lost ({})", reason),
        }
    }
}
