//! Tag and Field Parsing
//!
//! Tags are comma-separated tokens such as `host:web-1,canary`. Fields are
//! the `key:value` subset of them, with integer-looking values coerced to
//! integers.

use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Structured key-value pairs attached to log entries
pub type Fields = BTreeMap<String, Value>;

/// A field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Display string of an error
    Error(String),
}

impl Value {
    /// Wraps the display string of an error
    pub fn error(err: &dyn std::error::Error) -> Self {
        Value::Error(err.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(v) | Value::Error(v) => f.write_str(v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Str(v) | Value::Error(v) => serializer.serialize_str(v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            Value::Float(v) => Err(S::Error::custom(format_args!("unsupported float value {}", v))),
            Value::Bool(v) => serializer.serialize_bool(*v),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Splits `s` on commas into trimmed, non-empty tags
pub fn parse_tags(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `key:value` tags into fields.
///
/// Tags without a colon or with an empty key are skipped. A value that parses
/// as a whole `i64` becomes [`Value::Int`], so `zip:08540` yields `8540`.
/// Returns `None` when no valid pair is found.
pub fn parse_fields(s: &str) -> Option<Fields> {
    let fields: Fields = parse_tags(s)
        .iter()
        .filter_map(|tag| tag.split_once(':'))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, raw)| {
            let value = match raw.parse::<i64>() {
                Ok(n) => Value::Int(n),
                Err(_) => Value::Str(raw.to_string()),
            };
            (key.to_string(), value)
        })
        .collect();

    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}
