use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::executor::block_on;
use futures::TryStreamExt;
use object_store::memory::InMemory;
use object_store::parse_url;
use object_store::path::Path;
use object_store::ObjectStore;
use object_store::PutMode;
use url::Url;

use super::Store;
use super::StoreError;

/// [Store] backed by an [`object_store`] compatible storage backend.
///
/// All data is stored in an external service (e.g. S3, local filesystem) via
/// the `object_store` crate. Keys are resolved relative to `prefix`.
#[derive(Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
}

impl fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("store", &self.store.to_string())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStoreBackend {
    /// Creates a store pointing at the object store described by `url`,
    /// e.g. `file:///srv/data`, `s3://bucket/prefix` or `memory:///`.
    pub fn with_url(url: &Url) -> Result<ObjectStoreBackend, object_store::Error> {
        let (store, prefix) = parse_url(url)?;
        Ok(ObjectStoreBackend {
            store: Arc::from(store),
            prefix,
        })
    }

    pub fn new(store: Arc<dyn ObjectStore>, prefix: Path) -> Self {
        ObjectStoreBackend { store, prefix }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), Path::default())
    }

    fn path(&self, key: &str) -> Result<Path, StoreError> {
        let key = Path::parse(key).map_err(|_| StoreError::InvalidKey(key.to_owned()))?;
        Ok(self.prefix.parts().chain(key.parts()).collect())
    }

    /// The key of `location` relative to this store's prefix.
    fn key(&self, location: &Path) -> Option<String> {
        let parts = location.prefix_match(&self.prefix)?;
        let parts: Vec<String> = parts.map(|p| p.as_ref().to_owned()).collect();
        Some(parts.join("/"))
    }
}

impl Store for ObjectStoreBackend {
    fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let path = self.path(key)?;
        let result = block_on(async { self.store.get(&path).await });
        match result {
            Ok(object) => Ok(Some(block_on(object.bytes())?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        let path = self.path(key)?;
        block_on(async { self.store.put(&path, bytes.into()).await })?;
        Ok(())
    }

    fn put_if_absent(&self, key: &str, bytes: Bytes) -> Result<bool, StoreError> {
        let path = self.path(key)?;
        let result = block_on(async {
            self.store
                .put_opts(&path, bytes.into(), PutMode::Create.into())
                .await
        });
        match result {
            Ok(_) => Ok(true),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path(key)?;
        match block_on(async { self.store.delete(&path).await }) {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let path = self.path(prefix)?;
        let scope = if path.parts().next().is_none() {
            None
        } else {
            Some(&path)
        };
        let metas: Vec<_> = block_on(self.store.list(scope).try_collect())?;
        let mut keys: Vec<String> = metas
            .iter()
            .filter_map(|meta| self.key(&meta.location))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
