//! Typed structural contracts.
//!
//! Each adapter declares a [`PlatformSchema`]: one [`SchemaNode`] tree per
//! verb it wants checked. The validator in [`validator`] interprets those
//! trees generically against the incoming job document, before anything
//! is routed to the adapter. A verb without a declared schema accepts any
//! shape.

mod validator;

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use strum::Display;

use crate::job::Verb;

pub use validator::{ValidationError, validate, validate_node};

/// Primitive JSON types a field can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FieldType {
    Object,
    String,
    Number,
    Integer,
    Boolean,
    Array,
    /// No type constraint.
    Any,
}

impl FieldType {
    /// Check whether `value` has this type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

/// Name of the JSON type of `value`, for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Sub-schema applied to every key of an object matching `pattern`.
#[derive(Debug, Clone)]
pub struct PatternProperty {
    pub pattern: Regex,
    pub schema: SchemaNode,
}

/// One node of a structural contract.
#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub field_type: FieldType,
    pub required: bool,
    pub properties: BTreeMap<String, SchemaNode>,
    pub pattern_properties: Vec<PatternProperty>,
    /// When `false`, keys matched by neither `properties` nor
    /// `pattern_properties` are rejected.
    pub additional_properties: bool,
    pub items: Option<Box<SchemaNode>>,
    pub min_items: Option<usize>,
    pub min_length: Option<usize>,
}

impl SchemaNode {
    pub fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            properties: BTreeMap::new(),
            pattern_properties: Vec::new(),
            additional_properties: true,
            items: None,
            min_items: None,
            min_length: None,
        }
    }

    pub fn object() -> Self {
        Self::of(FieldType::Object)
    }

    pub fn string() -> Self {
        Self::of(FieldType::String)
    }

    pub fn boolean() -> Self {
        Self::of(FieldType::Boolean)
    }

    pub fn any() -> Self {
        Self::of(FieldType::Any)
    }

    pub fn array(items: SchemaNode) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(FieldType::Array)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Reject properties that are not declared.
    pub fn closed(mut self) -> Self {
        self.additional_properties = false;
        self
    }

    /// Declare (or replace) a named property.
    pub fn property(mut self, name: impl Into<String>, node: SchemaNode) -> Self {
        self.properties.insert(name.into(), node);
        self
    }

    pub fn pattern_property(mut self, pattern: Regex, node: SchemaNode) -> Self {
        self.pattern_properties.push(PatternProperty {
            pattern,
            schema: node,
        });
        self
    }

    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    /// Look up a declared property.
    pub fn get(&self, name: &str) -> Option<&SchemaNode> {
        self.properties.get(name)
    }
}

/// Envelope shared by every job document.
///
/// Adapters start from this and tighten the parts their verbs care about,
/// typically `object` and `target`.
pub fn job_envelope() -> SchemaNode {
    let actor = SchemaNode::object()
        .required()
        .property("address", SchemaNode::string().required().min_length(1))
        .property("name", SchemaNode::string())
        .property("id", SchemaNode::any())
        .property("image", SchemaNode::string());

    let target = SchemaNode::object()
        .property("address", SchemaNode::string().required())
        .property("type", SchemaNode::string())
        .property("name", SchemaNode::string())
        .property("id", SchemaNode::any());

    SchemaNode::object()
        .closed()
        .property("rid", SchemaNode::any())
        .property("platform", SchemaNode::string())
        .property("verb", SchemaNode::string().required())
        .property("actor", actor)
        .property("target", SchemaNode::array(target))
        .property("object", SchemaNode::any())
        .property("status", SchemaNode::boolean())
}

/// Matches any non-empty key (one entry per actor address).
pub static ANY_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(".+").unwrap());

/// Contract of a `set` job registering credentials.
///
/// `object.credentials` maps actor addresses to entries shaped like `entry`.
pub fn credentials_set(entry: SchemaNode) -> SchemaNode {
    job_envelope().property(
        "object",
        SchemaNode::object().required().closed().property(
            "credentials",
            SchemaNode::object()
                .required()
                .closed()
                .pattern_property((*ANY_KEY).clone(), entry.required()),
        ),
    )
}

/// Per-verb structural contract of one platform. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct PlatformSchema {
    verbs: HashMap<Verb, SchemaNode>,
}

impl PlatformSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verb(mut self, verb: Verb, node: SchemaNode) -> Self {
        self.verbs.insert(verb, node);
        self
    }

    pub fn for_verb(&self, verb: Verb) -> Option<&SchemaNode> {
        self.verbs.get(&verb)
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    pub fn declares(&self, verb: Verb) -> bool {
        self.verbs.contains_key(&verb)
    }

    /// Schema of a single credential entry, taken from the `set` contract
    /// (`object.credentials.<address>`).
    pub fn credential_entry(&self) -> Option<&SchemaNode> {
        self.for_verb(Verb::Set)?
            .get("object")?
            .get("credentials")?
            .pattern_properties
            .first()
            .map(|p| &p.schema)
    }
}
