//! Key-value store contract

use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

/// A stored key and its raw value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

/// Change notification emitted by a watched store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, revision: u64 },
    Delete { key: String, revision: u64 },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put { key, .. } | WatchEvent::Delete { key, .. } => key,
        }
    }
}

/// Minimal key-value store used by registries.
///
/// Single-key operations are atomic. Range results are sorted by key.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Every key starting with `prefix`
    async fn range(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError>;

    /// Delete every key starting with `prefix`, returning how many were removed
    async fn delete_range(&self, prefix: &str) -> Result<u64, StoreError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Opens store connections.
///
/// Workers that run in parallel each call `connect` and keep their own
/// handle; handles are never shared across workers.
pub trait KvConnector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn KvStore>, StoreError>;
}
