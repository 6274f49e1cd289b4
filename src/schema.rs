//! Table schemas.
//!
//! A [Schema] is an ordered list of [Column]s. Columns are identified by a
//! [ColumnId] that survives renames and reorders; names are only a label.
//! Schemas are immutable values: a schema change produces a new `Schema`.
//!
//! The JSON form stored as `meta/schema.json` is an array of column objects:
//!
//! ```json
//! [
//!   {"id": "…", "name": "fid", "dataType": "integer", "primaryKeyIndex": 0, "size": 64},
//!   {"id": "…", "name": "geom", "dataType": "geometry", "primaryKeyIndex": null,
//!    "geometryType": "POINT", "geometryCRS": "EPSG:4326"}
//! ]
//! ```

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;

use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value as JsonValue;

use crate::codec::SchemaViolation;
use crate::codec::ViolationReason;
use crate::geometry::GeometryKind;
use crate::id::ColumnId;
use crate::value::Row;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntSize {
    I8,
    I16,
    I32,
    I64,
}

impl IntSize {
    pub fn bits(self) -> u8 {
        match self {
            IntSize::I8 => 8,
            IntSize::I16 => 16,
            IntSize::I32 => 32,
            IntSize::I64 => 64,
        }
    }

    pub fn range(self) -> (i64, i64) {
        match self {
            IntSize::I8 => (i8::MIN.into(), i8::MAX.into()),
            IntSize::I16 => (i16::MIN.into(), i16::MAX.into()),
            IntSize::I32 => (i32::MIN.into(), i32::MAX.into()),
            IntSize::I64 => (i64::MIN, i64::MAX),
        }
    }

    fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            8 => Some(IntSize::I8),
            16 => Some(IntSize::I16),
            32 => Some(IntSize::I32),
            64 => Some(IntSize::I64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatSize {
    F32,
    F64,
}

impl FloatSize {
    pub fn bits(self) -> u8 {
        match self {
            FloatSize::F32 => 32,
            FloatSize::F64 => 64,
        }
    }
}

/// The declared type of a column together with its type-specific
/// constraints. `None` constraints are unconstrained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Boolean,
    Blob { length: Option<u64> },
    Date,
    Time,
    /// `utc` is set for `timezone: "UTC"` columns.
    Timestamp { utc: bool },
    Interval,
    Float { size: FloatSize },
    Integer { size: IntSize },
    Numeric { precision: Option<u32>, scale: Option<u32> },
    Text { length: Option<u64> },
    Geometry { kind: GeometryKind, crs: Option<String> },
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::Blob { .. } => "blob",
            DataType::Date => "date",
            DataType::Time => "time",
            DataType::Timestamp { .. } => "timestamp",
            DataType::Interval => "interval",
            DataType::Float { .. } => "float",
            DataType::Integer { .. } => "integer",
            DataType::Numeric { .. } => "numeric",
            DataType::Text { .. } => "text",
            DataType::Geometry { .. } => "geometry",
        }
    }

    pub fn integer(size: IntSize) -> Self {
        DataType::Integer { size }
    }

    pub fn text() -> Self {
        DataType::Text { length: None }
    }

    pub fn geometry(kind: GeometryKind, crs: Option<&str>) -> Self {
        DataType::Geometry {
            kind,
            crs: crs.map(str::to_owned),
        }
    }

    /// Pulls the attributes that belong to `data_type` out of `attributes`.
    /// Whatever is left over is not understood by this type.
    fn from_json(data_type: &str, attributes: &mut Map<String, JsonValue>) -> Result<Self, String> {
        let data_type = match data_type {
            "boolean" => DataType::Boolean,
            "blob" => DataType::Blob {
                length: take_u64(attributes, "length")?,
            },
            "date" => DataType::Date,
            "time" => DataType::Time,
            "interval" => DataType::Interval,
            "text" => DataType::Text {
                length: take_u64(attributes, "length")?,
            },
            "integer" => DataType::Integer {
                size: match take_u64(attributes, "size")? {
                    None => IntSize::I64,
                    Some(bits) => IntSize::from_bits(bits)
                        .ok_or_else(|| format!("size must be 8, 16, 32 or 64, got {bits}"))?,
                },
            },
            "float" => DataType::Float {
                size: match take_u64(attributes, "size")? {
                    None | Some(64) => FloatSize::F64,
                    Some(32) => FloatSize::F32,
                    Some(bits) => return Err(format!("size must be 32 or 64, got {bits}")),
                },
            },
            "numeric" => {
                let precision = take_u64(attributes, "precision")?;
                let scale = take_u64(attributes, "scale")?;
                let to_u32 = |v: Option<u64>| -> Result<Option<u32>, String> {
                    v.map(|v| u32::try_from(v).map_err(|_| format!("{v} is out of range")))
                        .transpose()
                };
                let (precision, scale) = (to_u32(precision)?, to_u32(scale)?);
                if let (Some(p), Some(s)) = (precision, scale) {
                    if s > p {
                        return Err(format!("scale {s} exceeds precision {p}"));
                    }
                }
                DataType::Numeric { precision, scale }
            }
            "timestamp" => DataType::Timestamp {
                utc: match attributes.remove("timezone") {
                    None | Some(JsonValue::Null) => false,
                    Some(JsonValue::String(tz)) if tz == "UTC" => true,
                    Some(v) => return Err(format!("timezone must be \"UTC\" or null, got {v}")),
                },
            },
            "geometry" => {
                let kind = match attributes.remove("geometryType") {
                    None | Some(JsonValue::Null) => GeometryKind::default(),
                    Some(JsonValue::String(s)) => s.parse().map_err(|e| format!("{e}"))?,
                    Some(v) => return Err(format!("geometryType must be a string, got {v}")),
                };
                let crs = match attributes.remove("geometryCRS") {
                    None | Some(JsonValue::Null) => None,
                    Some(JsonValue::String(s)) => Some(s),
                    Some(v) => return Err(format!("geometryCRS must be a string, got {v}")),
                };
                DataType::Geometry { kind, crs }
            }
            other => return Err(format!("unknown dataType {other:?}")),
        };
        Ok(data_type)
    }

    fn to_json(&self, attributes: &mut Map<String, JsonValue>) {
        match self {
            DataType::Boolean | DataType::Date | DataType::Time | DataType::Interval => {}
            DataType::Blob { length } | DataType::Text { length } => {
                if let Some(length) = length {
                    attributes.insert("length".into(), (*length).into());
                }
            }
            DataType::Timestamp { utc } => {
                if *utc {
                    attributes.insert("timezone".into(), "UTC".into());
                }
            }
            DataType::Float { size } => {
                attributes.insert("size".into(), size.bits().into());
            }
            DataType::Integer { size } => {
                attributes.insert("size".into(), size.bits().into());
            }
            DataType::Numeric { precision, scale } => {
                if let Some(precision) = precision {
                    attributes.insert("precision".into(), (*precision).into());
                }
                if let Some(scale) = scale {
                    attributes.insert("scale".into(), (*scale).into());
                }
            }
            DataType::Geometry { kind, crs } => {
                attributes.insert("geometryType".into(), kind.to_string().into());
                if let Some(crs) = crs {
                    attributes.insert("geometryCRS".into(), crs.clone().into());
                }
            }
        }
    }
}

fn take_u64(attributes: &mut Map<String, JsonValue>, key: &str) -> Result<Option<u64>, String> {
    match attributes.remove(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| format!("{key} must be a non-negative integer, got {v}")),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    pub data_type: DataType,
    pub primary_key_index: Option<u32>,
    /// Attributes this crate does not interpret, kept for round-tripping.
    pub extra: BTreeMap<String, JsonValue>,
}

impl Column {
    pub fn new(id: ColumnId, name: impl Into<String>, data_type: DataType) -> Self {
        Column {
            id,
            name: name.into(),
            data_type,
            primary_key_index: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn primary_key(mut self, index: u32) -> Self {
        self.primary_key_index = Some(index);
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key_index.is_some()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnJson {
    id: ColumnId,
    name: String,
    data_type: String,
    #[serde(default)]
    primary_key_index: Option<u32>,
    #[serde(flatten)]
    attributes: Map<String, JsonValue>,
}

#[derive(Debug)]
pub enum SchemaError {
    DuplicateName(String),
    DuplicateId(ColumnId),
    NonContiguousPrimaryKey(Vec<u32>),
    BadColumn { column: String, reason: String },
    Json(serde_json::Error),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "duplicate column name {name:?}"),
            Self::DuplicateId(id) => write!(f, "duplicate column id {id}"),
            Self::NonContiguousPrimaryKey(indexes) => write!(
                f,
                "primaryKeyIndex values must form 0..k-1, got [{}]",
                indexes.iter().join(", ")
            ),
            Self::BadColumn { column, reason } => write!(f, "column {column:?}: {reason}"),
            Self::Json(e) => write!(f, "malformed schema JSON: {e}"),
        }
    }
}

impl std::error::Error for SchemaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Result of [diff_column_identities].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityDiff {
    Unchanged,
    Changed,
}

/// Checks the structural invariants of a column list.
pub fn validate(columns: &[Column]) -> Result<(), SchemaError> {
    let mut names = HashSet::new();
    let mut ids = HashSet::new();
    for column in columns {
        if !names.insert(column.name.as_str()) {
            return Err(SchemaError::DuplicateName(column.name.clone()));
        }
        if !ids.insert(column.id) {
            return Err(SchemaError::DuplicateId(column.id));
        }
    }
    let indexes: Vec<u32> = columns
        .iter()
        .filter_map(|c| c.primary_key_index)
        .sorted()
        .collect();
    if indexes.iter().enumerate().any(|(i, &k)| k as usize != i) {
        return Err(SchemaError::NonContiguousPrimaryKey(indexes));
    }
    Ok(())
}

/// Compares only which columns exist and in which order, ignoring names,
/// types and constraints.
pub fn diff_column_identities(old: &Schema, new: &Schema) -> IdentityDiff {
    if old.column_ids().eq(new.column_ids()) {
        IdentityDiff::Unchanged
    } else {
        IdentityDiff::Changed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Result<Self, SchemaError> {
        validate(&columns)?;
        Ok(Schema { columns })
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, SchemaError> {
        let raw: Vec<ColumnJson> = serde_json::from_slice(bytes)?;
        let columns = raw
            .into_iter()
            .map(|c| {
                let mut attributes = c.attributes;
                let data_type = DataType::from_json(&c.data_type, &mut attributes).map_err(
                    |reason| SchemaError::BadColumn {
                        column: c.name.clone(),
                        reason,
                    },
                )?;
                Ok(Column {
                    id: c.id,
                    name: c.name,
                    data_type,
                    primary_key_index: c.primary_key_index,
                    extra: attributes.into_iter().collect(),
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;
        Schema::new(columns)
    }

    /// Pretty-printed JSON. Output is deterministic for a given schema, so
    /// unchanged schemas produce identical objects.
    ///
    /// Defaulted attributes are written out: an `integer` column read
    /// without `size` is written with `"size": 64`, and a geometry column
    /// without `geometryType` with `"GEOMETRY"`.
    pub fn to_json(&self) -> Vec<u8> {
        let raw: Vec<ColumnJson> = self
            .columns
            .iter()
            .map(|c| {
                let mut attributes: Map<String, JsonValue> =
                    c.extra.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                c.data_type.to_json(&mut attributes);
                ColumnJson {
                    id: c.id,
                    name: c.name.clone(),
                    data_type: c.data_type.name().to_owned(),
                    primary_key_index: c.primary_key_index,
                    attributes,
                }
            })
            .collect();
        serde_json::to_vec_pretty(&raw).expect("schema JSON serialization is infallible")
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_ids(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.columns.iter().map(|c| c.id)
    }

    pub fn column_by_id(&self, id: ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary-key columns in key order.
    pub fn pk_columns(&self) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key())
            .sorted_by_key(|c| c.primary_key_index)
            .collect()
    }

    pub fn non_pk_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_primary_key())
    }

    /// Distinct CRS identifiers referenced by geometry columns.
    pub fn crs_identifiers(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter_map(|c| match &c.data_type {
                DataType::Geometry { crs: Some(crs), .. } => Some(crs.as_str()),
                _ => None,
            })
            .unique()
            .collect()
    }

    /// Builds a row from `(column name, value)` pairs.
    pub fn row<I, N, V>(&self, values: I) -> Result<Row, SchemaViolation>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<Value>,
    {
        values
            .into_iter()
            .map(|(name, value)| {
                let name = name.as_ref();
                let column = self.column_by_name(name).ok_or_else(|| SchemaViolation {
                    column: name.to_owned(),
                    reason: ViolationReason::UnknownColumn,
                })?;
                Ok((column.id, value.into()))
            })
            .collect()
    }
}
