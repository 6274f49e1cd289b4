//! Legends: content-addressed column orderings.
//!
//! A [Legend] records which columns a feature was written with and in which
//! order its values are stored. Key columns and value columns are kept
//! apart because key values live in the feature's path, not in its payload.
//!
//! The canonical bytes of a legend are the MessagePack array
//! `[[key column ids...], [value column ids...]]` with ids as hyphenated
//! UUID strings. The legend's key is the lower-case hex SHA-256 of those
//! bytes and it is stored under `meta/legend/<key>`. Legends are never
//! modified or deleted; writing the same legend twice is harmless.

use std::error::Error;
use std::fmt;

use bytes::Bytes;
use quick_cache::sync::Cache;

use crate::codec::msgpack;
use crate::codec::MalformedError;
use crate::hash::Hash;
use crate::hash::Sha256;
use crate::id::ColumnId;
use crate::schema::Schema;
use crate::store::join_key;
use crate::store::Store;
use crate::store::StoreError;

pub type LegendKey = Hash<Sha256>;

/// Default number of resolved legends kept in memory per dataset.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Legend {
    pk_ids: Vec<ColumnId>,
    value_ids: Vec<ColumnId>,
}

impl Legend {
    pub fn new(pk_ids: Vec<ColumnId>, value_ids: Vec<ColumnId>) -> Self {
        Legend { pk_ids, value_ids }
    }

    /// Key columns in key order, the remaining columns in schema order.
    pub fn from_schema(schema: &Schema) -> Self {
        Legend {
            pk_ids: schema.pk_columns().iter().map(|c| c.id).collect(),
            value_ids: schema.non_pk_columns().map(|c| c.id).collect(),
        }
    }

    pub fn pk_ids(&self) -> &[ColumnId] {
        &self.pk_ids
    }

    pub fn value_ids(&self) -> &[ColumnId] {
        &self.value_ids
    }

    pub fn column_ids(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.pk_ids.iter().chain(&self.value_ids).copied()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = msgpack::Writer::new();
        w.array_len(2);
        for ids in [&self.pk_ids, &self.value_ids] {
            w.array_len(ids.len());
            for id in ids {
                w.str(&id.to_string());
            }
        }
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MalformedError> {
        let mut r = msgpack::Reader::new(bytes);
        let len = r.array_len()?;
        if len != 2 {
            return Err(MalformedError::Length {
                expected: 2,
                found: len,
            });
        }
        let mut read_ids = || -> Result<Vec<ColumnId>, MalformedError> {
            let count = r.array_len()?;
            (0..count)
                .map(|_| {
                    let s = r.str()?;
                    s.parse()
                        .map_err(|_| MalformedError::BadColumnId(s.to_owned()))
                })
                .collect()
        };
        let pk_ids = read_ids()?;
        let value_ids = read_ids()?;
        r.finish()?;
        Ok(Legend { pk_ids, value_ids })
    }

    pub fn key(&self) -> LegendKey {
        LegendKey::digest(&self.to_bytes())
    }
}

#[derive(Debug)]
pub enum LegendError {
    /// No legend is stored under this key. The dataset is incomplete.
    Unknown(LegendKey),
    Malformed {
        path: String,
        reason: MalformedError,
    },
    Store(StoreError),
}

impl fmt::Display for LegendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(key) => write!(f, "unknown legend {key}"),
            Self::Malformed { path, reason } => write!(f, "malformed legend at {path}: {reason}"),
            Self::Store(e) => write!(f, "legend store: {e}"),
        }
    }
}

impl Error for LegendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unknown(_) => None,
            Self::Malformed { reason, .. } => Some(reason),
            Self::Store(e) => Some(e),
        }
    }
}

impl From<StoreError> for LegendError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// The legends of one dataset, stored below `<root>/meta/legend/`.
pub struct LegendStore<S> {
    store: S,
    dir: String,
    cache: Cache<LegendKey, Legend>,
}

impl<S> fmt::Debug for LegendStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegendStore")
            .field("dir", &self.dir)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl<S: Store> LegendStore<S> {
    /// `dir` is the directory holding the legend objects.
    pub fn new(store: S, dir: impl Into<String>, capacity: usize) -> Self {
        LegendStore {
            store,
            dir: dir.into(),
            cache: Cache::new(capacity.max(1)),
        }
    }

    pub fn path(&self, key: &LegendKey) -> String {
        join_key([self.dir.as_str(), &key.to_hex()])
    }

    /// Returns the legend of `schema`, storing it first if this dataset has
    /// never seen it.
    pub fn get_or_create(&self, schema: &Schema) -> Result<(LegendKey, Legend), LegendError> {
        let legend = Legend::from_schema(schema);
        let bytes = legend.to_bytes();
        let key = LegendKey::digest(&bytes);
        if self.cache.get(&key).is_none() {
            let created = self
                .store
                .put_if_absent(&self.path(&key), Bytes::from(bytes))?;
            if created {
                log::debug!("created legend {key} with {} columns", legend.column_ids().count());
            }
            self.cache.insert(key, legend.clone());
        }
        Ok((key, legend))
    }

    pub fn resolve(&self, key: LegendKey) -> Result<Legend, LegendError> {
        self.cache.get_or_insert_with(&key, || {
            let path = self.path(&key);
            let bytes = self.store.get(&path)?.ok_or(LegendError::Unknown(key))?;
            let actual = LegendKey::digest(&bytes);
            if actual != key {
                return Err(LegendError::Malformed {
                    path,
                    reason: MalformedError::HashMismatch {
                        expected: key,
                        actual,
                    },
                });
            }
            Legend::from_bytes(&bytes).map_err(|reason| LegendError::Malformed { path, reason })
        })
    }

    /// Keys of all stored legends.
    pub fn keys(&self) -> Result<Vec<LegendKey>, LegendError> {
        let mut keys = Vec::new();
        for path in self.store.list(&self.dir)? {
            let name = path.rsplit('/').next().unwrap_or(&path);
            let key = LegendKey::from_hex(name).map_err(|e| LegendError::Malformed {
                path: path.clone(),
                reason: MalformedError::BadLegendKey(e),
            })?;
            keys.push(key);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use crate::schema::DataType;
    use crate::schema::IntSize;
    use crate::store::MemoryStore;

    fn schema(names: [&str; 3]) -> Schema {
        Schema::new(vec![
            Column::new(
                crate::column_id!("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
                names[0],
                DataType::integer(IntSize::I64),
            )
            .primary_key(0),
            Column::new(
                crate::column_id!("BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB"),
                names[1],
                DataType::text(),
            ),
            Column::new(
                crate::column_id!("CCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC"),
                names[2],
                DataType::Boolean,
            ),
        ])
        .unwrap()
    }

    #[test]
    fn bytes_roundtrip() {
        let legend = Legend::from_schema(&schema(["a", "b", "c"]));
        assert_eq!(legend.pk_ids().len(), 1);
        assert_eq!(legend.value_ids().len(), 2);
        let back = Legend::from_bytes(&legend.to_bytes()).unwrap();
        assert_eq!(back, legend);
        assert_eq!(back.key(), legend.key());
    }

    #[test]
    fn key_ignores_names_and_types() {
        let a = Legend::from_schema(&schema(["a", "b", "c"]));
        let b = Legend::from_schema(&schema(["x", "y", "z"]));
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().to_hex().len(), 64);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = MemoryStore::new();
        let legends = LegendStore::new(store.clone(), "t/meta/legend", 4);
        let (k1, _) = legends.get_or_create(&schema(["a", "b", "c"])).unwrap();
        let (k2, _) = legends.get_or_create(&schema(["x", "y", "z"])).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(store.len(), 1);
        assert_eq!(legends.keys().unwrap(), vec![k1]);

        // A fresh store over the same objects resolves without the cache.
        let cold = LegendStore::new(store, "t/meta/legend", 4);
        let legend = cold.resolve(k1).unwrap();
        assert_eq!(legend.key(), k1);
    }

    #[test]
    fn resolve_failures() {
        let store = MemoryStore::new();
        let legends = LegendStore::new(store.clone(), "meta/legend", 4);
        let missing = LegendKey::digest(b"nothing");
        assert!(matches!(
            legends.resolve(missing),
            Err(LegendError::Unknown(k)) if k == missing
        ));

        let junk = b"not a legend";
        let key = LegendKey::digest(junk);
        store
            .put(&legends.path(&key), Bytes::from_static(junk))
            .unwrap();
        assert!(matches!(
            legends.resolve(key),
            Err(LegendError::Malformed { .. })
        ));

        let legend = Legend::from_schema(&schema(["a", "b", "c"]));
        let other = LegendKey::digest(b"other");
        store
            .put(&legends.path(&other), Bytes::from(legend.to_bytes()))
            .unwrap();
        assert!(matches!(
            legends.resolve(other),
            Err(LegendError::Malformed {
                reason: MalformedError::HashMismatch { .. },
                ..
            })
        ));
    }
}
