use std::time::Duration;

use thiserror::Error;

use crate::job::Verb;
use crate::session::ConfigError;

/// Errors raised by platform adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The adapter does not implement the verb.
    #[error("{platform}.{verb} unimplemented")]
    Unimplemented { platform: String, verb: Verb },
    #[error("unable to get credentials for {0}")]
    MissingCredentials(String),
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("configuration unavailable: {0}")]
    Config(#[from] ConfigError),
    #[error("no target(s) specified")]
    MissingTarget,
    /// The job asked for a mode the adapter does not offer.
    #[error("unsupported request: {0}")]
    Unsupported(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The upstream API answered with an error document.
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("adapter used before init")]
    NotInitialized,
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    pub fn unimplemented(platform: impl Into<String>, verb: Verb) -> Self {
        Self::Unimplemented {
            platform: platform.into(),
            verb,
        }
    }

    /// Check if the failure is about credentials rather than the upstream call.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials(_) | Self::InvalidCredentials(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unimplemented_display() {
        let err = AdapterError::unimplemented("facebook", Verb::Send);
        assert_eq!(err.to_string(), "facebook.send unimplemented");
    }

    #[test]
    fn test_credential_errors() {
        assert!(AdapterError::MissingCredentials("user1".to_string()).is_credential_error());
        assert!(!AdapterError::MissingTarget.is_credential_error());
        assert_eq!(
            AdapterError::MissingCredentials("user1".to_string()).to_string(),
            "unable to get credentials for user1"
        );
    }
}
