//! Per-type canonicalization of cell values.
//!
//! Every value is brought into exactly one textual or binary form before it
//! is encoded, so equal values always produce equal feature bytes. Values
//! that do not fit their column are rejected here and never reach the store.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::geometry::Geometry;
use crate::geometry::GeometryError;
use crate::geometry::GeometryKind;
use crate::schema::Column;
use crate::schema::DataType;
use crate::schema::FloatSize;
use crate::value::Interval;
use crate::value::Value;

static DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern is valid"));

static TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2}:\d{2}:\d{2})(?:\.(\d+))?$").expect("time pattern is valid")
});

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})[T ](\d{2}:\d{2}:\d{2})(?:\.(\d+))?(Z|[+-]\d{2}:?\d{2})?$")
        .expect("timestamp pattern is valid")
});

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?)(\d*)(?:\.(\d*))?$").expect("numeric pattern is valid")
});

/// Why a value does not fit its column.
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationReason {
    /// The row names a column the schema does not have.
    UnknownColumn,
    /// Primary-key values address the feature and cannot be null.
    NullPrimaryKey,
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    IntegerOutOfRange {
        value: i64,
        bits: u8,
    },
    FloatOutOfRange(f64),
    BadFormat {
        expected: &'static str,
        value: String,
    },
    /// A timestamp carried an offset its column cannot store.
    UnexpectedOffset(String),
    TooLong {
        length: u64,
        max: u64,
    },
    TooManyDigits {
        integer: u32,
        fraction: u32,
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Geometry(GeometryError),
    GeometryKind {
        expected: GeometryKind,
        found: GeometryKind,
    },
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownColumn => write!(f, "no such column"),
            Self::NullPrimaryKey => write!(f, "primary key value is null"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "expected {expected} value, got {found}")
            }
            Self::IntegerOutOfRange { value, bits } => {
                write!(f, "{value} does not fit in a {bits} bit integer")
            }
            Self::FloatOutOfRange(x) => write!(f, "{x} does not fit in a 32 bit float"),
            Self::BadFormat { expected, value } => write!(f, "{value:?} is not a valid {expected}"),
            Self::UnexpectedOffset(offset) => {
                write!(f, "timezone offset {offset:?} is not allowed for this column")
            }
            Self::TooLong { length, max } => {
                write!(f, "length {length} exceeds the maximum of {max}")
            }
            Self::TooManyDigits {
                integer,
                fraction,
                precision,
                scale,
            } => write!(
                f,
                "{integer} integer and {fraction} fraction digits do not fit numeric({}, {})",
                precision.map_or("*".to_owned(), |p| p.to_string()),
                scale.map_or("*".to_owned(), |s| s.to_string())
            ),
            Self::Geometry(e) => write!(f, "invalid geometry: {e}"),
            Self::GeometryKind { expected, found } => {
                write!(f, "expected {expected} geometry, got {found}")
            }
        }
    }
}

fn mismatch(expected: &'static str, value: &Value) -> ViolationReason {
    ViolationReason::TypeMismatch {
        expected,
        found: value.kind(),
    }
}

fn text<'a>(expected: &'static str, value: &'a Value) -> Result<&'a str, ViolationReason> {
    value.as_str().ok_or_else(|| mismatch(expected, value))
}

fn bad_format(expected: &'static str, value: &str) -> ViolationReason {
    ViolationReason::BadFormat {
        expected,
        value: value.to_owned(),
    }
}

/// Drops a fraction of seconds that is all zeros.
fn fraction(digits: Option<&str>) -> String {
    match digits {
        Some(d) if d.bytes().any(|b| b != b'0') => format!(".{d}"),
        _ => String::new(),
    }
}

/// Brings `value` into the canonical form for `column`. Null passes through.
pub fn canonicalize(column: &Column, value: &Value) -> Result<Value, ViolationReason> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match &column.data_type {
        DataType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err(mismatch("boolean", value)),
        },
        DataType::Integer { size } => {
            let i = value.as_i64().ok_or_else(|| mismatch("integer", value))?;
            let (min, max) = size.range();
            if i < min || i > max {
                return Err(ViolationReason::IntegerOutOfRange {
                    value: i,
                    bits: size.bits(),
                });
            }
            Ok(Value::Int(i))
        }
        DataType::Float { size } => {
            let x = value.as_f64().ok_or_else(|| mismatch("float", value))?;
            match size {
                FloatSize::F64 => Ok(Value::Float(x)),
                FloatSize::F32 => {
                    if x.is_finite() && x.abs() > f32::MAX as f64 {
                        return Err(ViolationReason::FloatOutOfRange(x));
                    }
                    Ok(Value::Float((x as f32).into()))
                }
            }
        }
        DataType::Date => {
            let s = text("date", value)?;
            if !DATE.is_match(s) {
                return Err(bad_format("date", s));
            }
            Ok(value.clone())
        }
        DataType::Time => {
            let s = text("time", value)?;
            let caps = TIME.captures(s).ok_or_else(|| bad_format("time", s))?;
            Ok(Value::Text(format!(
                "{}{}",
                &caps[1],
                fraction(caps.get(2).map(|m| m.as_str()))
            )))
        }
        DataType::Timestamp { utc } => {
            let s = text("timestamp", value)?;
            let caps = TIMESTAMP
                .captures(s)
                .ok_or_else(|| bad_format("timestamp", s))?;
            if let Some(offset) = caps.get(4) {
                let zero = matches!(offset.as_str(), "Z" | "+00:00" | "+0000" | "-00:00" | "-0000");
                if !(*utc && zero) {
                    return Err(ViolationReason::UnexpectedOffset(offset.as_str().to_owned()));
                }
            }
            Ok(Value::Text(format!(
                "{}T{}{}{}",
                &caps[1],
                &caps[2],
                fraction(caps.get(3).map(|m| m.as_str())),
                if *utc { "Z" } else { "" }
            )))
        }
        DataType::Interval => {
            let s = text("interval", value)?;
            let interval: Interval = s.parse().map_err(|_| bad_format("interval", s))?;
            Ok(Value::interval(interval))
        }
        DataType::Numeric { precision, scale } => numeric(value, *precision, *scale),
        DataType::Text { length } => {
            let s = text("text", value)?;
            if let Some(max) = length {
                let length = s.chars().count() as u64;
                if length > *max {
                    return Err(ViolationReason::TooLong { length, max: *max });
                }
            }
            Ok(value.clone())
        }
        DataType::Blob { length } => {
            let b = value.as_bytes().ok_or_else(|| mismatch("blob", value))?;
            if let Some(max) = length {
                let length = b.len() as u64;
                if length > *max {
                    return Err(ViolationReason::TooLong { length, max: *max });
                }
            }
            Ok(value.clone())
        }
        DataType::Geometry { kind, .. } => {
            let geometry = match value {
                Value::Geometry(g) => g.clone(),
                Value::Bytes(b) => Geometry::from_bytes(b).map_err(ViolationReason::Geometry)?,
                _ => return Err(mismatch("geometry", value)),
            };
            if !kind.accepts(&geometry) {
                return Err(ViolationReason::GeometryKind {
                    expected: *kind,
                    found: geometry.kind(),
                });
            }
            Ok(Value::Geometry(geometry))
        }
    }
}

fn numeric(
    value: &Value,
    precision: Option<u32>,
    scale: Option<u32>,
) -> Result<Value, ViolationReason> {
    let s = match value {
        Value::Int(i) => i.to_string(),
        Value::Text(s) => s.clone(),
        _ => return Err(mismatch("numeric", value)),
    };
    let caps = NUMERIC.captures(&s).ok_or_else(|| bad_format("numeric", &s))?;
    let integer = caps[2].trim_start_matches('0');
    let fraction = caps.get(3).map_or("", |m| m.as_str());
    if caps[2].is_empty() && fraction.is_empty() {
        return Err(bad_format("numeric", &s));
    }
    let zero = integer.is_empty() && fraction.bytes().all(|b| b == b'0');
    let negative = &caps[1] == "-" && !zero;

    let integer_digits = integer.len() as u32;
    let fraction_digits = fraction.len() as u32;
    let scale_limit = scale.or(precision.map(|_| 0));
    let fits = match (precision, scale_limit) {
        (Some(p), Some(s)) => {
            fraction_digits <= s && integer_digits <= p.saturating_sub(s)
        }
        (None, Some(s)) => fraction_digits <= s,
        _ => true,
    };
    if !fits {
        return Err(ViolationReason::TooManyDigits {
            integer: integer_digits,
            fraction: fraction_digits,
            precision,
            scale,
        });
    }

    let mut out = String::with_capacity(s.len());
    if negative {
        out.push('-');
    }
    out.push_str(if integer.is_empty() { "0" } else { integer });
    if !fraction.is_empty() {
        out.push('.');
        out.push_str(fraction);
    }
    Ok(Value::Text(out))
}
