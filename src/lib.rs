//! Versioned storage for tabular and geospatial datasets.
//!
//! Every row of a table becomes its own small object in a content-addressed
//! object store, so the store's own history, diffing and merging work at row
//! granularity. This crate defines how those objects look:
//!
//! * [schema]: typed columns with stable [id::ColumnId]s.
//! * [legend]: content-addressed column orderings that let rows written
//!   under an old schema be read under a new one without rewriting them.
//! * [codec]: the canonical MessagePack encoding of a row, including the
//!   [geometry] binary format.
//! * [path]: the deterministic, reversible mapping from a primary key to a
//!   feature's location.
//! * [dataset]: ties all of the above to a [store::Store].
//!
//! ```
//! use featurestore::prelude::*;
//!
//! let schema = Schema::new(vec![
//!     Column::new(ColumnId::random(), "fid", DataType::integer(IntSize::I64)).primary_key(0),
//!     Column::new(ColumnId::random(), "name", DataType::text()),
//! ])
//! .unwrap();
//! let structure = PathStructure::recommended(&schema);
//! let dataset = Dataset::create(MemoryStore::new(), "places", schema, structure).unwrap();
//!
//! let row = dataset
//!     .schema()
//!     .row([("fid", Value::Int(77)), ("name", Value::from("X"))])
//!     .unwrap();
//! let key = dataset.write_feature(&row).unwrap();
//! assert_eq!(key, "places/.table-dataset/feature/A/A/A/B/kU0=");
//! assert_eq!(dataset.read_feature(&[Value::Int(77)]).unwrap(), row);
//! ```

pub mod codec;
pub mod dataset;
pub mod geometry;
pub mod hash;
pub mod id;
pub mod legend;
pub mod path;
pub mod prelude;
pub mod schema;
pub mod store;
pub mod value;

// Re-export dependencies that appear in the public API so consumers
// don't need to add them explicitly.
pub use bytes;
pub use object_store;
pub use url;
