//! Application-wide error types.

use thiserror::Error;

use crate::dispatcher::DispatchError;
use crate::store::StoreError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] platforms::AdapterError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
