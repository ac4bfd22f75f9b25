//! In-memory key-value store
//!
//! Ordered map behind an async lock with a broadcast channel standing in for
//! an etcd watch. Every mutation bumps a store-wide revision.

use crate::error::StoreError;
use crate::store::{KeyValue, KvConnector, KvStore, WatchEvent};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const WATCH_CAPACITY: usize = 1024;

/// In-memory store with watch notifications
pub struct InMemoryKvStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    revision: AtomicU64,
    watchers: broadcast::Sender<WatchEvent>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        let (watchers, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
            watchers,
        }
    }

    /// Subscribe to every subsequent mutation
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.watchers.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, event: WatchEvent) {
        // No subscribers is not an error
        let _ = self.watchers.send(event);
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        let revision = self.next_revision();
        self.notify(WatchEvent::Put {
            key: key.to_string(),
            revision,
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        let revision = self.next_revision();
        self.notify(WatchEvent::Delete {
            key: key.to_string(),
            revision,
        });
        Ok(true)
    }

    async fn range(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn delete_range(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let doomed: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            entries.remove(key);
            let revision = self.next_revision();
            self.notify(WatchEvent::Delete {
                key: key.clone(),
                revision,
            });
        }
        Ok(doomed.len() as u64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Connector handing out one shared in-memory store.
///
/// The backing map is shared so every connection observes the same data,
/// which mirrors several clients talking to one etcd cluster.
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    store: Arc<InMemoryKvStore>,
}

impl InMemoryConnector {
    pub fn new(store: Arc<InMemoryKvStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<InMemoryKvStore> {
        self.store.clone()
    }
}

impl KvConnector for InMemoryConnector {
    fn connect(&self) -> Result<Arc<dyn KvStore>, StoreError> {
        Ok(self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryKvStore::new();
        store.put("/a/1", b"one".to_vec()).await.unwrap();

        assert_eq!(store.get("/a/1").await.unwrap(), Some(b"one".to_vec()));
        assert!(store.delete("/a/1").await.unwrap());
        assert!(!store.delete("/a/1").await.unwrap());
        assert_eq!(store.get("/a/1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_range_is_prefix_bounded_and_sorted() {
        let store = InMemoryKvStore::new();
        for key in ["/p/b", "/p/a", "/p2/a", "/o/z"] {
            store.put(key, key.as_bytes().to_vec()).await.unwrap();
        }

        let keys: Vec<String> = store
            .range("/p/")
            .await
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec!["/p/a", "/p/b"]);
    }

    #[tokio::test]
    async fn test_delete_range() {
        let store = InMemoryKvStore::new();
        for key in ["/p/a", "/p/b", "/p2/a"] {
            store.put(key, Vec::new()).await.unwrap();
        }

        assert_eq!(store.delete_range("/p/").await.unwrap(), 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_watch_sees_mutations_in_order() {
        let store = InMemoryKvStore::new();
        let mut watch = store.subscribe();

        store.put("/k", b"v".to_vec()).await.unwrap();
        store.delete("/k").await.unwrap();

        assert_eq!(
            watch.recv().await.unwrap(),
            WatchEvent::Put {
                key: "/k".into(),
                revision: 1
            }
        );
        assert_eq!(
            watch.recv().await.unwrap(),
            WatchEvent::Delete {
                key: "/k".into(),
                revision: 2
            }
        );
        assert_eq!(store.revision(), 2);
    }

    #[tokio::test]
    async fn test_connector_shares_backing_store() {
        let connector = InMemoryConnector::default();
        let first = connector.connect().unwrap();
        let second = connector.connect().unwrap();

        first.put("/shared", b"x".to_vec()).await.unwrap();
        assert!(second.get("/shared").await.unwrap().is_some());
    }
}
