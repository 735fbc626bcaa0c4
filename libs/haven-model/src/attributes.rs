//! Namespaced Attribute Maps
//!
//! Models carry their mutable state as a flat map of `namespace:attribute`
//! keys to tagged values. Per-instance attributes (one value per alarm type,
//! per mode, ...) use an extra `:instance` suffix on the key, e.g.
//! `alert:alertstate:SMOKE`.

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Tagged attribute value
///
/// JSON-compatible value vocabulary for model attributes. Untagged serde
/// representation keeps the wire format plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Absent/null value
    Null,
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Text value (enum-like attributes use uppercase strings)
    Text(String),
    /// Ordered list of nested values. Tried before `Set` when deserializing,
    /// so a JSON array always comes back as a list with order and duplicates
    /// intact.
    List(Vec<AttributeValue>),
    /// Ordered set of strings; only ever constructed in process
    Set(BTreeSet<String>),
    /// Nested map
    Map(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Text accessor
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean accessor
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer accessor
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float accessor (integers widen)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Set accessor
    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            AttributeValue::Set(s) => Some(s),
            _ => None,
        }
    }

    /// List accessor
    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Map accessor
    pub fn as_map(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            AttributeValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// True when the value is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Int(i)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Float(f)
    }
}

impl From<BTreeSet<String>> for AttributeValue {
    fn from(s: BTreeSet<String>) -> Self {
        AttributeValue::Set(s)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(l: Vec<AttributeValue>) -> Self {
        AttributeValue::List(l)
    }
}

/// Build the key for a per-instance attribute, e.g.
/// `instanced("alert:alertstate", "SMOKE")` -> `alert:alertstate:SMOKE`
pub fn instanced(base: &str, instance: &str) -> String {
    format!("{}:{}", base, instance)
}

/// Namespaced attribute map
///
/// Deterministically ordered (BTreeMap) so commits and broadcasts are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap {
    entries: BTreeMap<String, AttributeValue>,
}

impl AttributeMap {
    /// Create an empty attribute map
    pub fn new() -> Self {
        Self::default()
    }

    /// Read an attribute
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries.get(key)
    }

    /// Read a per-instance attribute
    pub fn get_instanced(&self, base: &str, instance: &str) -> Option<&AttributeValue> {
        self.entries.get(&instanced(base, instance))
    }

    /// Read a required attribute
    pub fn require(&self, key: &str) -> Result<&AttributeValue> {
        self.entries
            .get(key)
            .ok_or_else(|| ModelError::AttributeMissing(key.to_string()))
    }

    /// Read a required text attribute
    pub fn require_text(&self, key: &str) -> Result<&str> {
        self.require(key)?
            .as_text()
            .ok_or_else(|| ModelError::AttributeType {
                key: key.to_string(),
                expected: "text",
            })
    }

    /// Write an attribute, returning the previous value
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Write a per-instance attribute
    pub fn set_instanced(
        &mut self,
        base: &str,
        instance: &str,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.entries.insert(instanced(base, instance), value.into())
    }

    /// Remove an attribute
    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.entries.remove(key)
    }

    /// Attribute presence check
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Builder-style insertion, for seeding models
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.entries.iter()
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no attributes are present
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, AttributeValue)> for AttributeMap {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for AttributeMap {
    type Item = (String, AttributeValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, AttributeValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
