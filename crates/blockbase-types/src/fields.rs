//! The open attribute bag carried by every block.
//!
//! Values form a closed set that maps 1:1 onto JSON. Anything outside that
//! set (today: non-finite floats, which `serde_json` would silently turn into
//! `null`) is rejected by [`FieldValue::validate`] before it reaches the
//! serializer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};

/// Named attribute values of a block. Keys are unique; order is irrelevant.
pub type Fields = BTreeMap<String, FieldValue>;

/// A single attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    /// Integers above `i64::MAX`.
    UInt(u64),
    Float(f64),
    String(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Check that the value (recursively) has a faithful JSON encoding.
    ///
    /// `path` names the value in error messages.
    pub fn validate(&self, path: &str) -> ValidationResult<()> {
        match self {
            FieldValue::Float(f) if !f.is_finite() => Err(ValidationError::unserializable(
                path,
                format!("non-finite number {f}"),
            )),
            FieldValue::List(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, v)| v.validate(&format!("{path}[{i}]"))),
            FieldValue::Map(map) => map
                .iter()
                .try_for_each(|(k, v)| v.validate(&format!("{path}.{k}"))),
            _ => Ok(()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Int(i) => u64::try_from(*i).ok(),
            FieldValue::UInt(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// Validate every value in a bag, naming the first offending key.
pub fn validate_fields(fields: &Fields) -> ValidationResult<()> {
    fields.iter().try_for_each(|(k, v)| v.validate(k))
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<i32> for FieldValue {
    fn from(i: i32) -> Self {
        FieldValue::Int(i64::from(i))
    }
}

impl From<u64> for FieldValue {
    fn from(u: u64) -> Self {
        i64::try_from(u).map_or(FieldValue::UInt(u), FieldValue::Int)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(items: Vec<T>) -> Self {
        FieldValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, FieldValue>> for FieldValue {
    fn from(map: BTreeMap<String, FieldValue>) -> Self {
        FieldValue::Map(map)
    }
}
