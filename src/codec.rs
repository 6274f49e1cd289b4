//! Feature encoding.
//!
//! A feature is stored as the MessagePack array `[legend_key, [values...]]`.
//! `legend_key` is the hex key of the [Legend] the row was written with and
//! `values[i]` belongs to the legend's `i`th non-key column. Primary-key
//! values are not part of the payload: they are encoded into the feature's
//! filename by [crate::path] and handed back to [decode_feature].
//!
//! Decoding goes through the legend, so a feature written under an older
//! schema is presented in the shape of the current one without being
//! rewritten.

pub mod canonical;
pub(crate) mod msgpack;

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use crate::geometry::GeometryError;
use crate::hash::HashError;
use crate::id::ColumnId;
use crate::legend::Legend;
use crate::legend::LegendKey;
use crate::schema::Column;
use crate::schema::DataType;
use crate::schema::FloatSize;
use crate::schema::Schema;
use crate::value::Row;
use crate::value::Value;

pub use canonical::canonicalize;
pub use canonical::ViolationReason;
pub use msgpack::GEOMETRY_EXT;

/// A value that cannot be represented under its column's declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaViolation {
    /// Column name, or the column id when the schema has no such column.
    pub column: String,
    pub reason: ViolationReason,
}

impl SchemaViolation {
    fn new(column: &Column, reason: ViolationReason) -> Self {
        SchemaViolation {
            column: column.name.clone(),
            reason,
        }
    }

    fn unknown(id: ColumnId) -> Self {
        SchemaViolation {
            column: id.to_string(),
            reason: ViolationReason::UnknownColumn,
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "column {:?}: {}", self.column, self.reason)
    }
}

impl Error for SchemaViolation {}

/// Bytes that do not parse as the expected structure.
#[derive(Debug, Clone, PartialEq)]
pub enum MalformedError {
    Truncated,
    TrailingBytes(usize),
    UnexpectedMarker { expected: &'static str, marker: u8 },
    IntegerOverflow,
    InvalidUtf8,
    UnknownExtension(i8),
    Geometry(GeometryError),
    BadLegendKey(HashError),
    BadColumnId(String),
    HashMismatch { expected: LegendKey, actual: LegendKey },
    BadBase64,
    Length { expected: usize, found: usize },
}

impl fmt::Display for MalformedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "unexpected end of data"),
            Self::TrailingBytes(n) => write!(f, "{n} unexpected trailing bytes"),
            Self::UnexpectedMarker { expected, marker } => {
                write!(f, "expected {expected}, found marker 0x{marker:02x}")
            }
            Self::IntegerOverflow => write!(f, "integer does not fit in 64 signed bits"),
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Self::UnknownExtension(ext) => write!(f, "unknown extension type {ext}"),
            Self::Geometry(e) => write!(f, "bad geometry: {e}"),
            Self::BadLegendKey(e) => write!(f, "bad legend key: {e}"),
            Self::BadColumnId(id) => write!(f, "bad column id {id:?}"),
            Self::HashMismatch { expected, actual } => {
                write!(f, "content hash {actual} does not match key {expected}")
            }
            Self::BadBase64 => write!(f, "filename is not URL-safe base64"),
            Self::Length { expected, found } => {
                write!(f, "expected {expected} values, found {found}")
            }
        }
    }
}

impl Error for MalformedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Geometry(e) => Some(e),
            Self::BadLegendKey(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GeometryError> for MalformedError {
    fn from(e: GeometryError) -> Self {
        Self::Geometry(e)
    }
}

/// Error returned by [decode_feature]. `E` is the error of the legend
/// resolver.
#[derive(Debug)]
pub enum DecodeError<E> {
    Malformed(MalformedError),
    Legend(E),
}

impl<E: fmt::Display> fmt::Display for DecodeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed feature: {e}"),
            Self::Legend(e) => write!(f, "{e}"),
        }
    }
}

impl<E: Error + 'static> Error for DecodeError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Malformed(e) => Some(e),
            Self::Legend(e) => Some(e),
        }
    }
}

impl<E> From<MalformedError> for DecodeError<E> {
    fn from(e: MalformedError) -> Self {
        Self::Malformed(e)
    }
}

fn is_float32(column: &Column) -> bool {
    matches!(
        column.data_type,
        DataType::Float {
            size: FloatSize::F32
        }
    )
}

/// Canonicalizes the primary-key values of `row` in key order.
pub fn pk_values(schema: &Schema, row: &Row) -> Result<Vec<Value>, SchemaViolation> {
    schema
        .pk_columns()
        .into_iter()
        .map(|column| {
            let value = row.get(&column.id).unwrap_or(&Value::Null);
            if value.is_null() {
                return Err(SchemaViolation::new(column, ViolationReason::NullPrimaryKey));
            }
            canonicalize(column, value).map_err(|reason| SchemaViolation::new(column, reason))
        })
        .collect()
}

/// Encodes the non-key values of `row` in `legend` order.
///
/// `legend` must have been derived from `schema`. Values are canonicalized
/// first; missing values are stored as null.
pub fn encode_feature(
    schema: &Schema,
    legend: &Legend,
    row: &Row,
) -> Result<Vec<u8>, SchemaViolation> {
    if let Some(id) = row.keys().find(|id| schema.column_by_id(**id).is_none()) {
        return Err(SchemaViolation::unknown(*id));
    }
    let mut w = msgpack::Writer::new();
    w.array_len(2);
    w.str(&legend.key().to_hex());
    w.array_len(legend.value_ids().len());
    for id in legend.value_ids() {
        let column = schema
            .column_by_id(*id)
            .ok_or_else(|| SchemaViolation::unknown(*id))?;
        let value = row.get(id).unwrap_or(&Value::Null);
        let value =
            canonicalize(column, value).map_err(|reason| SchemaViolation::new(column, reason))?;
        w.value(&value, is_float32(column));
    }
    Ok(w.into_bytes())
}

/// Splits feature bytes into the legend key and the stored values.
pub fn parse_feature(bytes: &[u8]) -> Result<(LegendKey, Vec<Value>), MalformedError> {
    let mut r = msgpack::Reader::new(bytes);
    let len = r.array_len()?;
    if len != 2 {
        return Err(MalformedError::Length {
            expected: 2,
            found: len,
        });
    }
    let key = LegendKey::from_hex(r.str()?).map_err(MalformedError::BadLegendKey)?;
    let count = r.array_len()?;
    let values = (0..count)
        .map(|_| r.value())
        .collect::<Result<Vec<_>, _>>()?;
    r.finish()?;
    Ok((key, values))
}

/// Rebuilds a row from a legend and the stored values and presents it in
/// the shape of `schema`.
///
/// Every column of `schema` appears in the result; columns the legend does
/// not know are null. Stored values of columns that no longer exist are
/// dropped.
pub fn project(
    schema: &Schema,
    legend: &Legend,
    pk_values: &[Value],
    values: Vec<Value>,
) -> Result<Row, MalformedError> {
    if pk_values.len() != legend.pk_ids().len() {
        return Err(MalformedError::Length {
            expected: legend.pk_ids().len(),
            found: pk_values.len(),
        });
    }
    if values.len() != legend.value_ids().len() {
        return Err(MalformedError::Length {
            expected: legend.value_ids().len(),
            found: values.len(),
        });
    }
    let mut stored: HashMap<ColumnId, Value> = legend
        .pk_ids()
        .iter()
        .copied()
        .zip(pk_values.iter().cloned())
        .chain(legend.value_ids().iter().copied().zip(values))
        .collect();
    Ok(schema
        .column_ids()
        .map(|id| (id, stored.remove(&id).unwrap_or_default()))
        .collect())
}

/// Decodes feature bytes into a row of the current `schema`.
///
/// `pk_values` are the key values recovered from the feature's path.
/// `resolve` maps the stored legend key to its legend.
pub fn decode_feature<F, E>(
    schema: &Schema,
    pk_values: &[Value],
    bytes: &[u8],
    resolve: F,
) -> Result<Row, DecodeError<E>>
where
    F: FnOnce(LegendKey) -> Result<Legend, E>,
{
    let (key, values) = parse_feature(bytes)?;
    let legend = resolve(key).map_err(DecodeError::Legend)?;
    Ok(project(schema, &legend, pk_values, values)?)
}

/// Encodes a primary-key tuple as a MessagePack array.
pub fn encode_pk(values: &[Value]) -> Vec<u8> {
    let mut w = msgpack::Writer::new();
    w.array_len(values.len());
    for value in values {
        w.value(value, false);
    }
    w.into_bytes()
}

pub fn decode_pk(bytes: &[u8]) -> Result<Vec<Value>, MalformedError> {
    let mut r = msgpack::Reader::new(bytes);
    let len = r.array_len()?;
    let values = (0..len)
        .map(|_| r.value())
        .collect::<Result<Vec<_>, _>>()?;
    r.finish()?;
    Ok(values)
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;
    use crate::schema::IntSize;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new(ColumnId::random(), "fid", DataType::integer(IntSize::I64)).primary_key(0),
            Column::new(ColumnId::random(), "name", DataType::text()),
            Column::new(
                ColumnId::random(),
                "small",
                DataType::Integer { size: IntSize::I8 },
            ),
            Column::new(
                ColumnId::random(),
                "ratio",
                DataType::Float {
                    size: FloatSize::F32,
                },
            ),
        ])
        .unwrap()
    }

    fn decode(schema: &Schema, legend: &Legend, pk: &[Value], bytes: &[u8]) -> Row {
        decode_feature(schema, pk, bytes, |key| {
            assert_eq!(key, legend.key());
            Ok::<_, Infallible>(legend.clone())
        })
        .unwrap()
    }

    #[test]
    fn roundtrip() {
        let schema = schema();
        let legend = Legend::from_schema(&schema);
        let row = schema
            .row([
                ("fid", Value::Int(7)),
                ("name", "seven".into()),
                ("small", Value::Int(-3)),
                ("ratio", Value::Float(0.5)),
            ])
            .unwrap();
        let bytes = encode_feature(&schema, &legend, &row).unwrap();
        let pk = pk_values(&schema, &row).unwrap();
        assert_eq!(pk, vec![Value::Int(7)]);
        assert_eq!(decode(&schema, &legend, &pk, &bytes), row);
    }

    #[test]
    fn layout() {
        let schema = schema();
        let legend = Legend::from_schema(&schema);
        let row = schema
            .row([("fid", Value::Int(1)), ("small", Value::Int(5))])
            .unwrap();
        let bytes = encode_feature(&schema, &legend, &row).unwrap();
        let key = legend.key().to_hex();
        let mut expected = vec![0x92, 0xd9, 64];
        expected.extend_from_slice(key.as_bytes());
        // name: nil, small: fixint 5, ratio: nil
        expected.extend_from_slice(&[0x93, 0xc0, 0x05, 0xc0]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn float32_is_written_single_precision() {
        let schema = schema();
        let legend = Legend::from_schema(&schema);
        let row = schema
            .row([("fid", Value::Int(1)), ("ratio", Value::Float(1.5))])
            .unwrap();
        let bytes = encode_feature(&schema, &legend, &row).unwrap();
        assert_eq!(&bytes[bytes.len() - 5..], &[0xca, 0x3f, 0xc0, 0x00, 0x00]);
    }

    #[test]
    fn violations_are_reported() {
        let schema = schema();
        let legend = Legend::from_schema(&schema);
        let row = schema
            .row([("fid", Value::Int(1)), ("small", Value::Int(300))])
            .unwrap();
        let err = encode_feature(&schema, &legend, &row).unwrap_err();
        assert_eq!(err.column, "small");
        assert_eq!(
            err.reason,
            ViolationReason::IntegerOutOfRange {
                value: 300,
                bits: 8
            }
        );

        let mut row = Row::new();
        row.insert(ColumnId::random(), Value::Int(1));
        let err = encode_feature(&schema, &legend, &row).unwrap_err();
        assert_eq!(err.reason, ViolationReason::UnknownColumn);

        let row = schema.row([("name", "no key")]).unwrap();
        let err = pk_values(&schema, &row).unwrap_err();
        assert_eq!(err.reason, ViolationReason::NullPrimaryKey);
    }

    #[test]
    fn value_count_mismatch_is_malformed() {
        let schema = schema();
        let legend = Legend::from_schema(&schema);
        let mut bytes = vec![0x92, 0xd9, 64];
        bytes.extend_from_slice(legend.key().to_hex().as_bytes());
        bytes.extend_from_slice(&[0x91, 0xc0]);
        let err = decode_feature(&schema, &[Value::Int(1)], &bytes, |_| {
            Ok::<_, Infallible>(legend.clone())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Malformed(MalformedError::Length {
                expected: 3,
                found: 1
            })
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(parse_feature(&[]).is_err());
        assert!(parse_feature(&[0x92, 0x01, 0x90]).is_err());
        assert!(matches!(
            parse_feature(&[0x92, 0xa2, b'a', b'b', 0x90]),
            Err(MalformedError::BadLegendKey(_))
        ));
    }

    #[test]
    fn pk_encoding() {
        let pk = vec![Value::Int(77)];
        assert_eq!(encode_pk(&pk), vec![0x91, 0x4d]);
        assert_eq!(decode_pk(&encode_pk(&pk)).unwrap(), pk);

        let pk = vec![Value::from("a"), Value::Int(-1_000_000)];
        assert_eq!(decode_pk(&encode_pk(&pk)).unwrap(), pk);
        assert!(matches!(
            decode_pk(&[0x91, 0x4d, 0x00]),
            Err(MalformedError::TrailingBytes(1))
        ));
    }
}
