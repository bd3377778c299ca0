//! ActivityStream-shaped job documents.
//!
//! A [`Job`] is the unit of work a client submits and the shape of every
//! item an adapter pushes back. Unknown top-level properties are kept in
//! [`Job::extra`] so the schema validator still sees them after parsing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

/// Verbs understood by the gateway.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    /// Retrieve items (timelines, feeds) for the actor.
    Fetch,
    /// Publish a post on behalf of the actor.
    Post,
    /// Send a direct message.
    Send,
    /// Update a previously published item.
    Update,
    /// Register credentials for the session.
    Set,
}

/// The identity a job acts on behalf of.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable identity used for credential lookup.
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Actor {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A destination of a job (a feed, a mentioned user, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub address: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl Target {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }
}

/// A job document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Client-chosen correlation id, echoed in the terminal result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<Value>,
    /// Platform the job is addressed to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub platform: String,
    /// Raw verb, kept as a string so unknown verbs can be reported instead
    /// of failing deserialization.
    #[serde(default)]
    pub verb: String,
    #[serde(default)]
    pub actor: Actor,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<Target>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub object: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,
    /// Any other top-level property the client sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Job {
    /// Create a job for `platform` with the given verb and actor address.
    pub fn new(platform: impl Into<String>, verb: Verb, actor: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            verb: verb.to_string(),
            actor: Actor::new(actor),
            ..Default::default()
        }
    }

    /// Build the canonical post-shaped document adapters emit per retrieved item.
    pub fn post_item(actor: Actor, targets: Vec<Target>, object: PostObject) -> Self {
        Self {
            verb: Verb::Post.to_string(),
            actor,
            target: targets,
            object: serde_json::to_value(object).unwrap_or(Value::Null),
            status: Some(true),
            ..Default::default()
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target.push(target);
        self
    }

    pub fn with_object(mut self, object: Value) -> Self {
        self.object = object;
        self
    }

    pub fn with_rid(mut self, rid: impl Into<Value>) -> Self {
        self.rid = Some(rid.into());
        self
    }

    /// Whether the client asked for a continuous (streaming) fetch.
    pub fn wants_poll(&self) -> bool {
        match self.object.get("poll") {
            Some(Value::Bool(poll)) => *poll,
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }

    /// String property of `object`, if present.
    pub fn object_str(&self, key: &str) -> Option<&str> {
        self.object.get(key).and_then(Value::as_str)
    }
}

/// Canonical object of a post-shaped item.
///
/// Adapters fill whatever their upstream offers; platform-specific fields
/// (tags, urls, source, ...) go to [`PostObject::extra`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
