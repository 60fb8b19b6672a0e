//! The operations document with embedded upload placeholders.
//!
//! `operations` arrives as arbitrary client-supplied JSON. It is converted
//! into [`Value`], a JSON tree with one extra variant holding an
//! [`Upload`] placeholder, so files can be substituted at the paths named
//! by the `map` field.
//!
//! Paths are dot-separated segments, e.g. `variables.files.0`. Array
//! segments must be in-range decimal indices; intermediate object segments
//! must name existing keys.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::Upload;

/// A JSON value that may hold upload placeholders.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Upload(Upload),
}

/// Reasons a path cannot be written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("segment {0} is empty")]
    EmptySegment(usize),

    #[error("segment '{0}' is not an array index")]
    NotAnIndex(String),

    #[error("index {index} is out of range for an array of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("key '{0}' does not exist")]
    MissingKey(String),

    #[error("segment '{0}' traverses a value that is not an object or array")]
    NotAContainer(String),
}

impl Value {
    /// Whether this is an object or an array.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    pub fn as_upload(&self) -> Option<&Upload> {
        match self {
            Value::Upload(upload) => Some(upload),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up the value at a dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                Value::Object(map) => map.get(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write `value` at a dotted path, replacing what was there.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), PathError> {
        if path.is_empty() {
            return Err(PathError::Empty);
        }
        let segments: Vec<&str> = path.split('.').collect();
        if let Some(pos) = segments.iter().position(|s| s.is_empty()) {
            return Err(PathError::EmptySegment(pos));
        }
        let (last, parents) = segments.split_last().ok_or(PathError::Empty)?;

        let mut current = self;
        for segment in parents {
            current = match current {
                Value::Array(items) => {
                    let len = items.len();
                    let index = parse_index(segment)?;
                    items
                        .get_mut(index)
                        .ok_or(PathError::IndexOutOfRange { index, len })?
                }
                Value::Object(map) => map
                    .get_mut(*segment)
                    .ok_or_else(|| PathError::MissingKey(segment.to_string()))?,
                _ => return Err(PathError::NotAContainer(segment.to_string())),
            };
        }

        match current {
            Value::Array(items) => {
                let len = items.len();
                let index = parse_index(last)?;
                let slot = items
                    .get_mut(index)
                    .ok_or(PathError::IndexOutOfRange { index, len })?;
                *slot = value;
            }
            Value::Object(map) => {
                map.insert(last.to_string(), value);
            }
            _ => return Err(PathError::NotAContainer(last.to_string())),
        }
        Ok(())
    }

    /// Every placeholder in the tree with its dotted path, depth first.
    ///
    /// A placeholder shared by several paths is listed once per path.
    pub fn uploads(&self) -> Vec<(String, &Upload)> {
        let mut found = Vec::new();
        collect_uploads(self, &mut String::new(), &mut found);
        found
    }

    /// Convert to plain JSON, rendering placeholders as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Upload(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

fn parse_index(segment: &str) -> Result<usize, PathError> {
    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PathError::NotAnIndex(segment.to_string()));
    }
    segment
        .parse()
        .map_err(|_| PathError::NotAnIndex(segment.to_string()))
}

fn collect_uploads<'a>(value: &'a Value, path: &mut String, found: &mut Vec<(String, &'a Upload)>) {
    match value {
        Value::Upload(upload) => found.push((path.clone(), upload)),
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                descend(&i.to_string(), child, path, found);
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                descend(key, child, path, found);
            }
        }
        _ => {}
    }
}

fn descend<'a>(
    segment: &str,
    child: &'a Value,
    path: &mut String,
    found: &mut Vec<(String, &'a Upload)>,
) {
    let restore = path.len();
    if !path.is_empty() {
        path.push('.');
    }
    path.push_str(segment);
    collect_uploads(child, path, found);
    path.truncate(restore);
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null | Value::Upload(_) => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}
