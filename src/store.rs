//! Key/value object storage underneath datasets.
//!
//! A dataset is nothing but a tree of small immutable-ish objects named by
//! `/`-separated keys. Anything that can get, put, delete and list such
//! objects can host datasets: the in-process [MemoryStore] for tests and
//! ephemeral work, or any [object_store] backend (local filesystem, S3, GCS,
//! Azure) through [ObjectStoreBackend].
//!
//! Keys never start or end with `/`. Listing is directory-like: `list("a/b")`
//! returns every key below `a/b/`, at any depth, but not `a/bc`.

pub mod memory;
pub mod objectstore;

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

pub use memory::MemoryStore;
pub use objectstore::ObjectStoreBackend;

#[derive(Debug)]
pub enum StoreError {
    /// The key cannot be expressed as an object path.
    InvalidKey(String),
    Backend(object_store::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey(key) => write!(f, "invalid object key {key:?}"),
            Self::Backend(e) => write!(f, "object store error: {e}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidKey(_) => None,
            Self::Backend(e) => Some(e),
        }
    }
}

impl From<object_store::Error> for StoreError {
    fn from(e: object_store::Error) -> Self {
        Self::Backend(e)
    }
}

/// Synchronous object storage.
///
/// Implementations are shared between threads, which is how
/// [crate::dataset::Dataset::write_features] encodes and writes in parallel.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Writes `bytes` under `key`, replacing any previous object.
    fn put(&self, key: &str, bytes: Bytes) -> Result<(), StoreError>;

    /// Writes `bytes` under `key` unless an object already exists there.
    /// Returns whether the write happened.
    ///
    /// Content-addressed objects use this: an existing object with the same
    /// name already has the same content.
    fn put_if_absent(&self, key: &str, bytes: Bytes) -> Result<bool, StoreError>;

    /// Removes `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All keys below the directory `prefix`, in lexicographic order.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        (**self).put(key, bytes)
    }

    fn put_if_absent(&self, key: &str, bytes: Bytes) -> Result<bool, StoreError> {
        (**self).put_if_absent(key, bytes)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list(prefix)
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        (**self).contains(key)
    }
}

/// Joins key segments with `/`, skipping empty ones.
pub fn join_key<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = String::new();
    for part in parts {
        let part = part.as_ref().trim_matches('/');
        if part.is_empty() {
            continue;
        }
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(part);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_skips_empty_segments() {
        assert_eq!(join_key(["a", "", "b/", "/c"]), "a/b/c");
        assert_eq!(join_key(["", "x"]), "x");
        assert_eq!(join_key::<[&str; 0], &str>([]), "");
    }
}
