//! Terminal job results.
//!
//! Every routed job ends in exactly one [`JobResult`] delivered to the
//! session that submitted it. Items an adapter pushes while processing a
//! job are sent separately and are not results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display};

use platforms::AdapterError;

/// Why a job failed, as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    Validation,
    ConfigUnavailable,
    MissingCredentials,
    UnknownVerb,
    UnimplementedVerb,
    AdapterFailure,
    UnknownPlatform,
    DispatcherDraining,
    DispatcherStopped,
}

impl FailureKind {
    /// Classify an adapter error.
    pub fn of(error: &AdapterError) -> Self {
        match error {
            AdapterError::Unimplemented { .. } => Self::UnimplementedVerb,
            e if e.is_credential_error() => Self::MissingCredentials,
            AdapterError::Config(_) => Self::ConfigUnavailable,
            AdapterError::UnsupportedPlatform(_) => Self::UnknownPlatform,
            _ => Self::AdapterFailure,
        }
    }
}

/// Correlation fields taken from a job before it is fully parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobHeader {
    pub rid: Option<Value>,
    pub platform: String,
    pub verb: String,
}

impl JobHeader {
    pub fn from_document(document: &Value) -> Self {
        let text = |key: &str| {
            document
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            rid: document.get("rid").filter(|v| !v.is_null()).cloned(),
            platform: text("platform"),
            verb: text("verb"),
        }
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<Value>,
    pub platform: String,
    pub verb: String,
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    /// Items pushed to the session (fetch only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
}

impl JobResult {
    pub fn success(header: &JobHeader) -> Self {
        Self {
            rid: header.rid.clone(),
            platform: header.platform.clone(),
            verb: header.verb.clone(),
            status: true,
            message: None,
            error_kind: None,
            items: None,
            object: None,
        }
    }

    pub fn failure(header: &JobHeader, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            status: false,
            message: Some(message.into()),
            error_kind: Some(kind),
            ..Self::success(header)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_items(mut self, items: usize) -> Self {
        self.items = Some(items);
        self
    }

    pub fn with_object(mut self, object: Value) -> Self {
        self.object = Some(object);
        self
    }

    /// A fetch that completed without retrieving anything.
    pub fn is_no_result(&self) -> bool {
        self.status && self.items == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_from_document() {
        let header = JobHeader::from_document(&json!({
            "rid": 7, "platform": "twitter", "verb": "fetch"
        }));
        assert_eq!(header.rid, Some(json!(7)));
        assert_eq!(header.platform, "twitter");

        let header = JobHeader::from_document(&json!("garbage"));
        assert_eq!(header, JobHeader::default());
    }

    #[test]
    fn test_failure_serialization() {
        let header = JobHeader {
            rid: Some(json!("a1")),
            platform: "facebook".to_string(),
            verb: "send".to_string(),
        };
        let result = JobResult::failure(&header, FailureKind::UnimplementedVerb, "facebook.send unimplemented");
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["rid"], "a1");
        assert_eq!(value["status"], false);
        assert_eq!(value["error_kind"], "unimplemented_verb");
        assert!(value.get("object").is_none());
    }

    #[test]
    fn test_failure_kind_of_adapter_error() {
        use platforms::Verb;

        assert_eq!(
            FailureKind::of(&AdapterError::unimplemented("facebook", Verb::Send)),
            FailureKind::UnimplementedVerb
        );
        assert_eq!(
            FailureKind::of(&AdapterError::MissingCredentials("user1".to_string())),
            FailureKind::MissingCredentials
        );
        assert_eq!(
            FailureKind::of(&AdapterError::Upstream("boom".to_string())),
            FailureKind::AdapterFailure
        );
    }

    #[test]
    fn test_no_result() {
        let result = JobResult::success(&JobHeader::default()).with_items(0);
        assert!(result.is_no_result());
        assert!(!result.clone().with_items(2).is_no_result());
    }
}
