//! relayhub: a protocol gateway routing ActivityStream-shaped jobs from
//! WebSocket clients to pluggable platform adapters.
//!
//! A supervisor process keeps a pool of worker processes alive; each worker
//! runs a [`dispatcher::Dispatcher`] with one [`listener::Listener`] per
//! platform and serves clients on a shared port.

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod logging;
pub mod outcome;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod transport;
pub mod worker;

pub use error::{Error, Result};
