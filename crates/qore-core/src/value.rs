// SPDX-License-Identifier: Apache-2.0

//! Bind values, parameter keys and generated-key requests

use std::fmt;

use serde::{Deserialize, Serialize};

/// A value bound to a statement parameter or read from a cursor column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "'{}'", v),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Position (1-based) or name of a bind parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterKey {
    Index(usize),
    Name(String),
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{}", i),
            Self::Name(n) => f.write_str(n),
        }
    }
}

impl From<usize> for ParameterKey {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

impl From<&str> for ParameterKey {
    fn from(n: &str) -> Self {
        Self::Name(n.to_string())
    }
}

/// How the caller asked the driver to return auto-generated keys
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRequest {
    /// No generated keys requested
    #[default]
    None,
    /// Driver picks the generated columns
    Auto,
    /// Return the listed columns (1-based indexes)
    ColumnIndexes(Vec<usize>),
    /// Return the listed columns by name
    ColumnNames(Vec<String>),
}

impl KeyRequest {
    /// Returns true if the caller expects generated keys back
    pub fn requests_keys(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for KeyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("NO_GENERATED_KEYS"),
            Self::Auto => f.write_str("RETURN_GENERATED_KEYS"),
            Self::ColumnIndexes(cols) => {
                let cols: Vec<String> = cols.iter().map(|c| c.to_string()).collect();
                write!(f, "[{}]", cols.join(","))
            }
            Self::ColumnNames(cols) => write!(f, "[{}]", cols.join(",")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from("foo").to_string(), "'foo'");
        assert_eq!(Value::from(10).to_string(), "10");
        assert_eq!(Value::from(None::<i64>).to_string(), "NULL");
    }

    #[test]
    fn test_key_request() {
        assert!(!KeyRequest::None.requests_keys());
        assert!(KeyRequest::Auto.requests_keys());
        assert!(KeyRequest::ColumnNames(vec!["id".into()]).requests_keys());
        assert_eq!(KeyRequest::ColumnIndexes(vec![1, 2]).to_string(), "[1,2]");
    }

    #[test]
    fn test_parameter_key_display() {
        assert_eq!(ParameterKey::from(3).to_string(), "3");
        assert_eq!(ParameterKey::from("name").to_string(), "name");
    }
}
