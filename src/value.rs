//! Row values.
//!
//! A [Value] is what a single cell of a feature holds once it has been
//! canonicalized for its column: the value space mirrors what the on-object
//! MessagePack encoding can express. Temporal, interval and numeric columns
//! carry their canonical text form, which is why the helpers below render
//! `chrono` types and [Interval]s to text instead of adding variants.

mod interval;

use std::collections::BTreeMap;
use std::fmt;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::NaiveTime;
use chrono::Utc;

use crate::geometry::Geometry;
use crate::id::ColumnId;

pub use interval::Interval;
pub use interval::ParseIntervalError;

/// A feature's values keyed by column identity.
pub type Row = BTreeMap<ColumnId, Value>;

#[derive(Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Geometry(Geometry),
}

impl Value {
    /// `YYYY-MM-DD`
    pub fn date(date: NaiveDate) -> Self {
        Value::Text(date.format("%Y-%m-%d").to_string())
    }

    /// `hh:mm:ss[.fff]`, the fraction is left out when it is zero.
    pub fn time(time: NaiveTime) -> Self {
        Value::Text(time.format("%H:%M:%S%.f").to_string())
    }

    /// `YYYY-MM-DDThh:mm:ss[.fff]` without an offset.
    pub fn timestamp(timestamp: NaiveDateTime) -> Self {
        Value::Text(timestamp.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
    }

    /// `YYYY-MM-DDThh:mm:ss[.fff]Z`, for `timezone: UTC` columns.
    pub fn timestamp_utc(timestamp: DateTime<Utc>) -> Self {
        Value::Text(timestamp.format("%Y-%m-%dT%H:%M:%S%.fZ").to_string())
    }

    pub fn interval(interval: Interval) -> Self {
        Value::Text(interval.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_geometry(&self) -> Option<&Geometry> {
        match self {
            Value::Geometry(g) => Some(g),
            _ => None,
        }
    }

    /// A short name for the kind of value, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Geometry(_) => "geometry",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x:?})"),
            Value::Text(s) => write!(f, "Text({s:?})"),
            Value::Bytes(b) => write!(f, "Bytes({})", hex::encode(b)),
            Value::Geometry(g) => write!(f, "{g:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Geometry> for Value {
    fn from(g: Geometry) -> Self {
        Value::Geometry(g)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
