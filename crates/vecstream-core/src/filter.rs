//! Metadata predicate evaluation with dot-path field access.
//!
//! A filter is a flat map `{path → expected}`; entries combine with logical
//! AND. Paths walk nested objects with `.` separators; an integer segment
//! indexes into an array. A missing path is a no-match, never an error.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::StoreError;

/// A conjunction of `{dot-path → expected value}` conditions over a metadata
/// document.
///
/// Matching rules per condition:
/// - scalars and objects compare by structural equality;
/// - when the addressed field is an array, the condition holds if `expected`
///   equals the whole array **or** is a scalar contained in it (membership);
/// - a path that does not resolve fails the condition.
///
/// An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, Value>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object, e.g. `{"cat": "ai", "info.year": 2023}`.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        match value {
            Value::Object(map) => Ok(Self {
                conditions: map.into_iter().collect(),
            }),
            other => Err(StoreError::InvalidParameter(format!(
                "filter must be a JSON object, got {other}"
            ))),
        }
    }

    /// Add a condition, returning `self` for chaining.
    pub fn with(mut self, path: impl Into<String>, expected: Value) -> Self {
        self.conditions.insert(path.into(), expected);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Evaluate against a metadata document. All conditions must hold.
    pub fn matches(&self, metadata: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(path, expected)| match lookup_path(metadata, path) {
                Some(actual) => value_matches(actual, expected),
                None => false,
            })
    }
}

/// Walk `doc` along a dot-separated path. Objects are indexed by key, arrays
/// by integer segment. Returns `None` as soon as a segment fails to resolve.
fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// A single condition: structural equality, plus scalar membership when the
/// actual value is an array.
fn value_matches(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match actual {
        Value::Array(items) if !expected.is_array() => items.contains(expected),
        _ => false,
    }
}
