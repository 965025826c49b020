//! Typed values bound into statements and read back from rows

use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::BTreeMap;

/// A value bound to one statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    /// Parameter left unset; the stored cell is not touched
    Unset,
    Null,
    Text(String),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Timestamp(NaiveDateTime),
    ListInt(Vec<i32>),
}

impl BoundValue {
    pub fn is_set(&self) -> bool {
        !matches!(self, Self::Unset)
    }

    pub fn is_null_or_unset(&self) -> bool {
        matches!(self, Self::Unset | Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::BigInt(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// JSON form of a key value read back from the cluster
    pub fn to_json(&self) -> Value {
        match self {
            Self::Unset | Self::Null => Value::Null,
            Self::Text(s) => Value::String(s.clone()),
            Self::Int(v) => Value::from(*v),
            Self::BigInt(v) => Value::from(*v),
            Self::Float(v) => Value::from(f64::from(*v)),
            Self::Double(v) => Value::from(*v),
            Self::Timestamp(ts) => Value::String(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
            Self::ListInt(items) => Value::from(items.clone()),
        }
    }

    /// Milliseconds since the Unix epoch, as stored by the cluster
    pub fn timestamp_millis(&self) -> Option<i64> {
        match self {
            Self::Timestamp(ts) => Some(ts.and_utc().timestamp_millis()),
            _ => None,
        }
    }
}

impl From<&str> for BoundValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for BoundValue {
    fn from(value: i64) -> Self {
        Self::BigInt(value)
    }
}

impl From<i32> for BoundValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

/// One result row, keyed by column name
pub type Row = BTreeMap<String, BoundValue>;
