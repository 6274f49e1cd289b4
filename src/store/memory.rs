use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use bytes::Bytes;

use super::Store;
use super::StoreError;

/// Simple in-memory implementation of [Store].
///
/// Useful for unit tests or ephemeral datasets where persistence is not
/// required. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(objects.get(key).cloned())
    }

    fn put(&self, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects.insert(key.to_owned(), bytes);
        Ok(())
    }

    fn put_if_absent(&self, key: &str, bytes: Bytes) -> Result<bool, StoreError> {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        if objects.contains_key(key) {
            return Ok(false);
        }
        objects.insert(key.to_owned(), bytes);
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return Ok(objects.keys().cloned().collect());
        }
        let dir = format!("{prefix}/");
        Ok(objects
            .range(dir.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&dir))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a/b").unwrap(), None);
        store.put("a/b", Bytes::from_static(b"1")).unwrap();
        assert_eq!(store.get("a/b").unwrap(), Some(Bytes::from_static(b"1")));
        store.delete("a/b").unwrap();
        store.delete("a/b").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn put_if_absent_keeps_first() {
        let store = MemoryStore::new();
        assert!(store.put_if_absent("k", Bytes::from_static(b"1")).unwrap());
        assert!(!store.put_if_absent("k", Bytes::from_static(b"2")).unwrap());
        assert_eq!(store.get("k").unwrap(), Some(Bytes::from_static(b"1")));
    }

    #[test]
    fn list_is_directory_scoped() {
        let store = MemoryStore::new();
        for key in ["a/b/c", "a/b/d/e", "a/bc", "z"] {
            store.put(key, Bytes::new()).unwrap();
        }
        assert_eq!(store.list("a/b").unwrap(), vec!["a/b/c", "a/b/d/e"]);
        assert_eq!(store.list("a/b/").unwrap(), vec!["a/b/c", "a/b/d/e"]);
        assert_eq!(store.list("").unwrap().len(), 4);
        assert!(store.list("nope").unwrap().is_empty());
    }

    #[test]
    fn clones_share_objects() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.put("k", Bytes::from_static(b"v")).unwrap();
        assert!(other.contains("k").unwrap());
    }
}
