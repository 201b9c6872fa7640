//! Durable key-value storage
//!
//! The durable cache tier and the persisted RPC configuration both sit on an
//! injected [`DurableStore`]. How it is opened is up to the caller: tests use
//! [`MemoryStore`], deployments use [`SledStore`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

use crate::error::AppResult;

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> AppResult<()>;

    async fn remove(&self, key: &str) -> AppResult<()>;

    /// All keys starting with `prefix`
    async fn keys(&self, prefix: &str) -> AppResult<Vec<String>>;

    /// Push buffered writes to the backing medium
    async fn flush(&self) -> AppResult<()>;
}

pub async fn read_json<T: DeserializeOwned>(
    store: &dyn DurableStore,
    key: &str,
) -> AppResult<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn write_json<T: Serialize + Sync>(
    store: &dyn DurableStore,
    key: &str,
    value: &T,
) -> AppResult<()> {
    store.put(key, serde_json::to_vec(value)?).await
}

/// Process-local store; contents vanish with the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> AppResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn flush(&self) -> AppResult<()> {
        Ok(())
    }
}

/// sled-backed store, one tree per logical store
pub struct SledStore {
    tree: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>, tree: &str) -> AppResult<Self> {
        let db = sled::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), tree, "Opened sled store");
        Self::from_db(&db, tree)
    }

    pub fn from_db(db: &sled::Db, tree: &str) -> AppResult<Self> {
        Ok(Self {
            tree: db.open_tree(tree)?,
        })
    }
}

#[async_trait]
impl DurableStore for SledStore {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> AppResult<()> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        self.tree.remove(key)?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (k, _) = item?;
            keys.push(String::from_utf8_lossy(&k).into_owned());
        }
        Ok(keys)
    }

    async fn flush(&self) -> AppResult<()> {
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_prefix_keys() {
        let store = MemoryStore::new();
        store.put("a/1", b"x".to_vec()).await.unwrap();
        store.put("a/2", b"y".to_vec()).await.unwrap();
        store.put("b/1", b"z".to_vec()).await.unwrap();

        let mut keys = store.keys("a/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a/1".to_string(), "a/2".to_string()]);

        store.remove("a/1").await.unwrap();
        assert_eq!(store.get("a/1").await.unwrap(), None);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_sled_store_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path(), "cache").unwrap();
        write_json(&store, "price/k", &vec![1u32, 2, 3]).await.unwrap();
        store.flush().await.unwrap();

        let back: Option<Vec<u32>> = read_json(&store, "price/k").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
        assert_eq!(store.keys("price/").await.unwrap(), vec!["price/k".to_string()]);
        assert!(store.keys("balance/").await.unwrap().is_empty());

        store.remove("price/k").await.unwrap();
        assert_eq!(store.get("price/k").await.unwrap(), None);
    }
}
