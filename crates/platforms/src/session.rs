//! The session capability handed to adapters.
//!
//! The gateway owns the concrete session (one per client connection); an
//! adapter only sees this trait, scoped to its own platform.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::error::AdapterError;
use crate::job::Job;

/// Configuration lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The configuration store cannot be reached.
    #[error("configuration store unavailable: {0}")]
    Unavailable(String),
    /// The key holds no value for this session.
    #[error("configuration key not found: {0}")]
    MissingKey(String),
}

/// What an adapter may do with the session of the client it serves.
#[async_trait]
pub trait PlatformSession: Send + Sync {
    /// Session identifier (for log correlation).
    fn id(&self) -> &str;

    /// Platform this view of the session is scoped to.
    fn platform(&self) -> &str;

    /// Look up a configuration value for this platform.
    ///
    /// Never returns a partial value: a missing key is an error.
    async fn get_config(&self, key: &str) -> Result<Value, ConfigError>;

    /// Push a document to the client. Best effort, never fails.
    fn send(&self, job: Job);

    fn log(&self, message: &str);

    fn debug(&self, message: &str);

    fn error(&self, message: &str);
}

/// Configuration key holding the credential map (actor address -> secrets).
pub const CREDENTIALS_KEY: &str = "credentials";

/// Resolve the credential entry for `address`.
///
/// A missing credential map and a map without this address both surface
/// as [`AdapterError::MissingCredentials`]; only an unreachable store is a
/// configuration error.
pub async fn credentials_for(
    session: &dyn PlatformSession,
    address: &str,
) -> Result<Value, AdapterError> {
    if address.is_empty() {
        return Err(AdapterError::MissingCredentials("<empty address>".to_string()));
    }

    let credentials = match session.get_config(CREDENTIALS_KEY).await {
        Ok(credentials) => credentials,
        Err(ConfigError::MissingKey(_)) => {
            return Err(AdapterError::MissingCredentials(address.to_string()));
        }
        Err(e) => return Err(AdapterError::Config(e)),
    };

    match credentials.get(address) {
        Some(entry) if entry.is_object() => {
            session.log(&format!("got credentials for {}", address));
            Ok(entry.clone())
        }
        _ => Err(AdapterError::MissingCredentials(address.to_string())),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A recording session for adapter tests.

    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;

    pub struct RecordingSession {
        pub platform: String,
        pub config: HashMap<String, Value>,
        pub sent: Mutex<Vec<Job>>,
        pub errors: Mutex<Vec<String>>,
    }

    impl RecordingSession {
        pub fn new(platform: &str) -> Self {
            Self {
                platform: platform.to_string(),
                config: HashMap::new(),
                sent: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
            }
        }

        pub fn with_config(mut self, key: &str, value: Value) -> Self {
            self.config.insert(key.to_string(), value);
            self
        }

        pub fn sent(&self) -> Vec<Job> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl PlatformSession for RecordingSession {
        fn id(&self) -> &str {
            "test-session"
        }

        fn platform(&self) -> &str {
            &self.platform
        }

        async fn get_config(&self, key: &str) -> Result<Value, ConfigError> {
            self.config
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
        }

        fn send(&self, job: Job) {
            self.sent.lock().push(job);
        }

        fn log(&self, _message: &str) {}

        fn debug(&self, _message: &str) {}

        fn error(&self, message: &str) {
            self.errors.lock().push(message.to_string());
        }
    }
}
