//! Generic validation of JSON documents against [`SchemaNode`] trees.

use serde_json::{Map, Value};
use thiserror::Error;

use super::{FieldType, PlatformSchema, SchemaNode, json_type_name};
use crate::job::Verb;

/// A document does not match its declared contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{path}: unknown property '{property}'")]
    UnknownProperty { path: String, property: String },
    #[error("{path}: missing required property '{property}'")]
    MissingProperty { path: String, property: String },
    #[error("{path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: FieldType,
        found: &'static str,
    },
    #[error("{path}: expected at least {min} item(s), found {found}")]
    TooFewItems {
        path: String,
        min: usize,
        found: usize,
    },
    #[error("{path}: must be at least {min} character(s) long")]
    TooShort { path: String, min: usize },
}

impl ValidationError {
    /// Path of the offending value (`job.actor.address`, ...).
    pub fn path(&self) -> &str {
        match self {
            Self::UnknownProperty { path, .. }
            | Self::MissingProperty { path, .. }
            | Self::TypeMismatch { path, .. }
            | Self::TooFewItems { path, .. }
            | Self::TooShort { path, .. } => path,
        }
    }
}

/// Validate a job document against the contract `schema` declares for `verb`.
///
/// A verb without a declared contract accepts any shape.
pub fn validate(schema: &PlatformSchema, verb: Verb, document: &Value) -> Result<(), ValidationError> {
    match schema.for_verb(verb) {
        Some(node) => validate_node(node, document, "job"),
        None => Ok(()),
    }
}

/// Validate `value` against a single node; `path` prefixes error locations.
pub fn validate_node(node: &SchemaNode, value: &Value, path: &str) -> Result<(), ValidationError> {
    if !node.field_type.matches(value) {
        return Err(ValidationError::TypeMismatch {
            path: path.to_string(),
            expected: node.field_type,
            found: json_type_name(value),
        });
    }

    match value {
        Value::Object(map) if node.field_type == FieldType::Object => {
            validate_object(node, map, path)
        }
        Value::Array(items) if node.field_type == FieldType::Array => {
            validate_array(node, items, path)
        }
        Value::String(s) => {
            if let Some(min) = node.min_length
                && s.chars().count() < min
            {
                return Err(ValidationError::TooShort {
                    path: path.to_string(),
                    min,
                });
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn validate_object(
    node: &SchemaNode,
    map: &Map<String, Value>,
    path: &str,
) -> Result<(), ValidationError> {
    // Explicit nulls count as absent.
    for (name, child) in &node.properties {
        match map.get(name) {
            Some(Value::Null) | None => {
                if child.required {
                    return Err(ValidationError::MissingProperty {
                        path: path.to_string(),
                        property: name.clone(),
                    });
                }
            }
            Some(v) => validate_node(child, v, &child_path(path, name))?,
        }
    }

    for (key, v) in map {
        if node.properties.contains_key(key) {
            continue;
        }

        if let Some(pp) = node
            .pattern_properties
            .iter()
            .find(|pp| pp.pattern.is_match(key))
        {
            validate_node(&pp.schema, v, &child_path(path, key))?;
            continue;
        }

        if !node.additional_properties {
            return Err(ValidationError::UnknownProperty {
                path: path.to_string(),
                property: key.clone(),
            });
        }
    }

    Ok(())
}

fn validate_array(node: &SchemaNode, items: &[Value], path: &str) -> Result<(), ValidationError> {
    if let Some(min) = node.min_items
        && items.len() < min
    {
        return Err(ValidationError::TooFewItems {
            path: path.to_string(),
            min,
            found: items.len(),
        });
    }

    if let Some(item_schema) = &node.items {
        for (i, item) in items.iter().enumerate() {
            validate_node(item_schema, item, &format!("{}[{}]", path, i))?;
        }
    }

    Ok(())
}

fn child_path(path: &str, key: &str) -> String {
    format!("{}.{}", path, key)
}
