//! Datasets on top of a [Store].
//!
//! A dataset named `roads` occupies the key prefix `roads/.table-dataset/`:
//!
//! ```text
//! roads/.table-dataset/
//!     meta/schema.json
//!     meta/path-structure.json
//!     meta/legend/<sha256>
//!     meta/crs/<identifier>.wkt
//!     meta/title
//!     meta/description
//!     feature/<segments>/<filename>
//! ```
//!
//! Writing a feature stores it under the current schema's legend. Reading
//! presents it in the shape of the current schema, whichever legend it was
//! written with, so [Dataset::change_schema] never touches features.

pub mod naming;

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use bytes::Bytes;
use rayon::prelude::*;

use crate::codec;
use crate::codec::DecodeError;
use crate::codec::MalformedError;
use crate::codec::SchemaViolation;
use crate::codec::ViolationReason;
use crate::legend::Legend;
use crate::legend::LegendError;
use crate::legend::LegendKey;
use crate::legend::LegendStore;
use crate::legend::DEFAULT_CACHE_CAPACITY;
use crate::path::PathError;
use crate::path::PathStructure;
use crate::path::FEATURE_DIR;
use crate::schema::diff_column_identities;
use crate::schema::Schema;
use crate::schema::SchemaError;
use crate::store::join_key;
use crate::store::Store;
use crate::store::StoreError;
use crate::value::Row;
use crate::value::Value;

pub use naming::check_no_case_collision;
pub use naming::validate_dataset_path;
pub use naming::NamingError;

/// Directory below a dataset path that holds the dataset objects.
pub const DATASET_DIRNAME: &str = ".table-dataset";

const SCHEMA: &str = "meta/schema.json";
const PATH_STRUCTURE: &str = "meta/path-structure.json";
const LEGEND_DIR: &str = "meta/legend";
const CRS_DIR: &str = "meta/crs";
const TITLE: &str = "meta/title";
const DESCRIPTION: &str = "meta/description";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetOptions {
    /// Number of resolved legends kept in memory.
    pub legend_cache_capacity: usize,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        DatasetOptions {
            legend_cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug)]
pub enum DatasetError {
    Naming(NamingError),
    AlreadyExists(String),
    NoSuchDataset(String),
    Schema(SchemaError),
    Violation(SchemaViolation),
    Path(PathError),
    /// Primary-key columns cannot change once features are stored under
    /// them; the dataset has to be re-encoded instead.
    PrimaryKeyChanged,
    /// Features are addressed by their primary key, so a dataset schema
    /// needs at least one key column.
    NoPrimaryKey,
    KeyLength {
        expected: usize,
        found: usize,
    },
    UnknownLegend(LegendKey),
    NotFound {
        pk: Vec<Value>,
    },
    MalformedEncoding {
        path: String,
        reason: MalformedError,
    },
    Store(StoreError),
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Naming(e) => write!(f, "invalid dataset path: {e}"),
            Self::AlreadyExists(path) => write!(f, "dataset {path:?} already exists"),
            Self::NoSuchDataset(path) => write!(f, "no dataset at {path:?}"),
            Self::Schema(e) => write!(f, "invalid schema: {e}"),
            Self::Violation(e) => write!(f, "schema violation: {e}"),
            Self::Path(e) => write!(f, "{e}"),
            Self::PrimaryKeyChanged => {
                write!(f, "primary key columns changed; the dataset must be re-encoded")
            }
            Self::NoPrimaryKey => write!(f, "schema has no primary key column"),
            Self::KeyLength { expected, found } => {
                write!(f, "expected {expected} primary key values, got {found}")
            }
            Self::UnknownLegend(key) => write!(f, "unknown legend {key}"),
            Self::NotFound { pk } => write!(f, "no feature with primary key {pk:?}"),
            Self::MalformedEncoding { path, reason } => {
                write!(f, "malformed object at {path}: {reason}")
            }
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl Error for DatasetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Naming(e) => Some(e),
            Self::Schema(e) => Some(e),
            Self::Violation(e) => Some(e),
            Self::Path(e) => Some(e),
            Self::MalformedEncoding { reason, .. } => Some(reason),
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NamingError> for DatasetError {
    fn from(e: NamingError) -> Self {
        Self::Naming(e)
    }
}

impl From<SchemaError> for DatasetError {
    fn from(e: SchemaError) -> Self {
        Self::Schema(e)
    }
}

impl From<SchemaViolation> for DatasetError {
    fn from(e: SchemaViolation) -> Self {
        Self::Violation(e)
    }
}

impl From<PathError> for DatasetError {
    fn from(e: PathError) -> Self {
        Self::Path(e)
    }
}

impl From<StoreError> for DatasetError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<LegendError> for DatasetError {
    fn from(e: LegendError) -> Self {
        match e {
            LegendError::Unknown(key) => Self::UnknownLegend(key),
            LegendError::Malformed { path, reason } => Self::MalformedEncoding { path, reason },
            LegendError::Store(e) => Self::Store(e),
        }
    }
}

/// Paths of all datasets in `store`.
pub fn list_datasets<S: Store + ?Sized>(store: &S) -> Result<Vec<String>, StoreError> {
    let suffix = format!("/{DATASET_DIRNAME}/{SCHEMA}");
    Ok(store
        .list("")?
        .into_iter()
        .filter_map(|key| key.strip_suffix(&suffix).map(str::to_owned))
        .collect())
}

fn check_has_primary_key(schema: &Schema) -> Result<(), DatasetError> {
    if schema.pk_columns().is_empty() {
        return Err(DatasetError::NoPrimaryKey);
    }
    Ok(())
}

pub struct Dataset<S> {
    store: S,
    path: String,
    root: String,
    schema: Schema,
    structure: PathStructure,
    legends: LegendStore<S>,
}

impl<S> fmt::Debug for Dataset<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("path", &self.path)
            .field("structure", &self.structure)
            .field("columns", &self.schema.len())
            .finish()
    }
}

impl<S: Store + Clone> Dataset<S> {
    pub fn create(
        store: S,
        path: &str,
        schema: Schema,
        structure: PathStructure,
    ) -> Result<Self, DatasetError> {
        Self::create_with_options(store, path, schema, structure, DatasetOptions::default())
    }

    /// Creates a new dataset at `path`. Fails if a dataset already exists at
    /// `path` or at a path differing from it only by case.
    pub fn create_with_options(
        store: S,
        path: &str,
        schema: Schema,
        structure: PathStructure,
        options: DatasetOptions,
    ) -> Result<Self, DatasetError> {
        validate_dataset_path(path)?;
        check_has_primary_key(&schema)?;
        structure.validate_for(&schema)?;
        let existing = list_datasets(&store)?;
        if existing.iter().any(|p| p == path) {
            return Err(DatasetError::AlreadyExists(path.to_owned()));
        }
        check_no_case_collision(existing.iter().map(String::as_str), path)?;

        let dataset = Self::new(store, path, schema, structure, options);
        dataset.put_meta(PATH_STRUCTURE, structure.to_json())?;
        dataset.legends.get_or_create(&dataset.schema)?;
        // The schema goes last: it is what marks the dataset as existing.
        dataset.put_meta(SCHEMA, dataset.schema.to_json())?;
        log::debug!("created dataset {path} with {structure:?}");
        dataset.warn_missing_crs()?;
        Ok(dataset)
    }

    pub fn open(store: S, path: &str) -> Result<Self, DatasetError> {
        Self::open_with_options(store, path, DatasetOptions::default())
    }

    pub fn open_with_options(
        store: S,
        path: &str,
        options: DatasetOptions,
    ) -> Result<Self, DatasetError> {
        let root = Self::root_of(path);
        let schema = store
            .get(&join_key([root.as_str(), SCHEMA]))?
            .ok_or_else(|| DatasetError::NoSuchDataset(path.to_owned()))?;
        let schema = Schema::from_json(&schema)?;
        let structure = match store.get(&join_key([root.as_str(), PATH_STRUCTURE]))? {
            Some(bytes) => PathStructure::from_json(&bytes)?,
            None => PathStructure::legacy(),
        };
        let dataset = Self::new(store, path, schema, structure, options);
        dataset.warn_missing_crs()?;
        Ok(dataset)
    }

    fn new(
        store: S,
        path: &str,
        schema: Schema,
        structure: PathStructure,
        options: DatasetOptions,
    ) -> Self {
        let root = Self::root_of(path);
        let legends = LegendStore::new(
            store.clone(),
            join_key([root.as_str(), LEGEND_DIR]),
            options.legend_cache_capacity,
        );
        Dataset {
            store,
            path: path.to_owned(),
            root,
            schema,
            structure,
            legends,
        }
    }

    fn root_of(path: &str) -> String {
        join_key([path, DATASET_DIRNAME])
    }
}

impl<S: Store> Dataset<S> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn path_structure(&self) -> &PathStructure {
        &self.structure
    }

    pub fn legends(&self) -> &LegendStore<S> {
        &self.legends
    }

    fn key(&self, relative: &str) -> String {
        join_key([self.root.as_str(), relative])
    }

    fn put_meta(&self, relative: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.store.put(&self.key(relative), Bytes::from(bytes))
    }

    fn get_text(&self, relative: &str) -> Result<Option<String>, DatasetError> {
        let key = self.key(relative);
        match self.store.get(&key)? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| DatasetError::MalformedEncoding {
                    path: key,
                    reason: MalformedError::InvalidUtf8,
                }),
        }
    }

    fn warn_missing_crs(&self) -> Result<(), DatasetError> {
        let defined = self.crs_identifiers()?;
        for crs in self.schema.crs_identifiers() {
            if !defined.iter().any(|d| d == crs) {
                log::warn!("dataset {}: no definition stored for CRS {crs}", self.path);
            }
        }
        Ok(())
    }

    /// Canonicalizes a primary-key tuple given by a caller.
    fn canonical_pk(&self, pk: &[Value]) -> Result<Vec<Value>, DatasetError> {
        let columns = self.schema.pk_columns();
        if columns.len() != pk.len() {
            return Err(DatasetError::KeyLength {
                expected: columns.len(),
                found: pk.len(),
            });
        }
        columns
            .into_iter()
            .zip(pk)
            .map(|(column, value)| {
                let canonical = if value.is_null() {
                    Err(ViolationReason::NullPrimaryKey)
                } else {
                    codec::canonicalize(column, value)
                };
                canonical.map_err(|reason| {
                    DatasetError::Violation(SchemaViolation {
                        column: column.name.clone(),
                        reason,
                    })
                })
            })
            .collect()
    }

    /// The store key of the feature with primary key `pk`.
    pub fn feature_key(&self, pk: &[Value]) -> Result<String, DatasetError> {
        let pk = self.canonical_pk(pk)?;
        Ok(self.key(&self.structure.feature_path(&pk)?))
    }

    fn encode(&self, legend: &Legend, row: &Row) -> Result<(String, Bytes), DatasetError> {
        let pk = codec::pk_values(&self.schema, row)?;
        let bytes = codec::encode_feature(&self.schema, legend, row)?;
        let key = self.key(&self.structure.feature_path(&pk)?);
        Ok((key, Bytes::from(bytes)))
    }

    /// Stores `row`, replacing any feature with the same primary key.
    /// Returns the feature's store key.
    pub fn write_feature(&self, row: &Row) -> Result<String, DatasetError> {
        let (_, legend) = self.legends.get_or_create(&self.schema)?;
        let (key, bytes) = self.encode(&legend, row)?;
        log::trace!("writing feature {key} ({} bytes)", bytes.len());
        self.store.put(&key, bytes)?;
        Ok(key)
    }

    /// Encodes and stores `rows` in parallel. Nothing is written unless every
    /// row is valid. Of several rows sharing a primary key the last one is
    /// stored, as if the rows were written one by one.
    ///
    /// Returns the number of features stored.
    pub fn write_features(&self, rows: &[Row]) -> Result<usize, DatasetError> {
        let (_, legend) = self.legends.get_or_create(&self.schema)?;
        let encoded = rows
            .par_iter()
            .map(|row| self.encode(&legend, row))
            .collect::<Result<Vec<_>, _>>()?;
        let mut latest: HashMap<String, Bytes> = HashMap::with_capacity(encoded.len());
        latest.extend(encoded);
        let written = latest.len();
        if written < rows.len() {
            log::debug!(
                "{} rows share a primary key with a later row",
                rows.len() - written
            );
        }
        latest
            .into_par_iter()
            .try_for_each(|(key, bytes)| self.store.put(&key, bytes))?;
        Ok(written)
    }

    fn read_at(&self, key: &str, pk: &[Value], bytes: &[u8]) -> Result<Row, DatasetError> {
        log::trace!("reading feature {key}");
        codec::decode_feature(&self.schema, pk, bytes, |legend| {
            self.legends.resolve(legend)
        })
        .map_err(|e| match e {
            DecodeError::Malformed(reason) => DatasetError::MalformedEncoding {
                path: key.to_owned(),
                reason,
            },
            DecodeError::Legend(e) => e.into(),
        })
    }

    pub fn read_feature(&self, pk: &[Value]) -> Result<Row, DatasetError> {
        let pk = self.canonical_pk(pk)?;
        let key = self.key(&self.structure.feature_path(&pk)?);
        let bytes = self
            .store
            .get(&key)?
            .ok_or_else(|| DatasetError::NotFound { pk: pk.clone() })?;
        self.read_at(&key, &pk, &bytes)
    }

    pub fn contains_feature(&self, pk: &[Value]) -> Result<bool, DatasetError> {
        let key = self.feature_key(pk)?;
        Ok(self.store.contains(&key)?)
    }

    /// Removes the feature with primary key `pk`. Returns whether it existed.
    pub fn delete_feature(&self, pk: &[Value]) -> Result<bool, DatasetError> {
        let key = self.feature_key(pk)?;
        if !self.store.contains(&key)? {
            return Ok(false);
        }
        self.store.delete(&key)?;
        log::trace!("deleted feature {key}");
        Ok(true)
    }

    /// Store keys of all features.
    pub fn feature_keys(&self) -> Result<Vec<String>, DatasetError> {
        Ok(self.store.list(&self.key(FEATURE_DIR))?)
    }

    pub fn feature_count(&self) -> Result<usize, DatasetError> {
        Ok(self.feature_keys()?.len())
    }

    /// All features, in key order of their paths.
    pub fn features(
        &self,
    ) -> Result<impl Iterator<Item = Result<Row, DatasetError>> + '_, DatasetError> {
        let keys = self.feature_keys()?;
        let prefix = format!("{}/", self.root);
        Ok(keys.into_iter().map(move |key| {
            let relative = key.strip_prefix(&prefix).unwrap_or(&key);
            let pk = self
                .structure
                .pk_from_path(relative)
                .map_err(|e| match e {
                    PathError::MalformedFilename(reason) => DatasetError::MalformedEncoding {
                        path: key.clone(),
                        reason,
                    },
                    e => e.into(),
                })?;
            let bytes = self
                .store
                .get(&key)?
                .ok_or_else(|| DatasetError::NotFound { pk: pk.clone() })?;
            self.read_at(&key, &pk, &bytes)
        }))
    }

    /// Replaces the current schema. Stored features are left as they are
    /// and read back in the new shape; a new legend is created by the next
    /// write if the column identities changed.
    pub fn change_schema(&mut self, schema: Schema) -> Result<(), DatasetError> {
        check_has_primary_key(&schema)?;
        self.structure.validate_for(&schema)?;
        let old_pk = self.schema.pk_columns();
        let new_pk = schema.pk_columns();
        let pk_changed = old_pk.len() != new_pk.len()
            || old_pk
                .iter()
                .zip(&new_pk)
                .any(|(a, b)| a.id != b.id || a.data_type != b.data_type);
        if pk_changed && self.feature_count()? > 0 {
            return Err(DatasetError::PrimaryKeyChanged);
        }
        let diff = diff_column_identities(&self.schema, &schema);
        self.put_meta(SCHEMA, schema.to_json())?;
        log::debug!(
            "dataset {}: schema changed ({} -> {} columns, identities {diff:?})",
            self.path,
            self.schema.len(),
            schema.len()
        );
        self.schema = schema;
        self.warn_missing_crs()
    }

    pub fn title(&self) -> Result<Option<String>, DatasetError> {
        self.get_text(TITLE)
    }

    pub fn set_title(&self, title: &str) -> Result<(), DatasetError> {
        Ok(self.put_meta(TITLE, title.as_bytes().to_vec())?)
    }

    pub fn description(&self) -> Result<Option<String>, DatasetError> {
        self.get_text(DESCRIPTION)
    }

    pub fn set_description(&self, description: &str) -> Result<(), DatasetError> {
        Ok(self.put_meta(DESCRIPTION, description.as_bytes().to_vec())?)
    }

    /// Stores the WKT definition of the CRS `identifier`, e.g. `EPSG:4326`.
    pub fn put_crs_definition(&self, identifier: &str, wkt: &str) -> Result<(), DatasetError> {
        let relative = format!("{CRS_DIR}/{identifier}.wkt");
        Ok(self.put_meta(&relative, wkt.as_bytes().to_vec())?)
    }

    pub fn crs_definition(&self, identifier: &str) -> Result<Option<String>, DatasetError> {
        self.get_text(&format!("{CRS_DIR}/{identifier}.wkt"))
    }

    /// Identifiers of all stored CRS definitions.
    pub fn crs_identifiers(&self) -> Result<Vec<String>, DatasetError> {
        Ok(self
            .store
            .list(&self.key(CRS_DIR))?
            .iter()
            .filter_map(|key| key.rsplit('/').next()?.strip_suffix(".wkt"))
            .map(str::to_owned)
            .collect())
    }
}
