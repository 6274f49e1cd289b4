//! This module re-exports the most commonly used types and traits from the `featurestore` crate.
//! It is intended to be glob imported as `use featurestore::prelude::*;`.

pub use crate::codec::SchemaViolation;
pub use crate::codec::ViolationReason;
pub use crate::column_id;
pub use crate::dataset::Dataset;
pub use crate::dataset::DatasetError;
pub use crate::dataset::DatasetOptions;
pub use crate::geometry::Geometry;
pub use crate::geometry::GeometryKind;
pub use crate::geometry::GeometryType;
pub use crate::id::ColumnId;
pub use crate::legend::Legend;
pub use crate::legend::LegendKey;
pub use crate::path::Encoding;
pub use crate::path::PathStructure;
pub use crate::path::Scheme;
pub use crate::schema::Column;
pub use crate::schema::DataType;
pub use crate::schema::IntSize;
pub use crate::schema::Schema;
pub use crate::store::MemoryStore;
pub use crate::store::ObjectStoreBackend;
pub use crate::store::Store;
pub use crate::value::Interval;
pub use crate::value::Row;
pub use crate::value::Value;
