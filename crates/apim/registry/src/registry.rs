//! Namespaced registry over a key-value store

use crate::error::{RegistryError, Result};
use crate::key::KeyPrefix;
use crate::store::KvStore;
use apim_types::{DeclarativeResource, ResourceKind};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Registry of declarative resources under one key prefix
#[async_trait]
pub trait Registry: Send + Sync {
    /// Namespace owned by this registry
    fn key_prefix(&self) -> &KeyPrefix;

    /// Write a single resource
    async fn apply_resource(&self, resource: &DeclarativeResource) -> Result<()>;

    /// Make the namespace hold exactly `resources`.
    ///
    /// Every desired resource is written and every other key under the
    /// prefix is deleted. Resources that could not be written are returned;
    /// an empty result means the namespace has converged.
    async fn sync_resources_by_key_prefix(
        &self,
        resources: &[DeclarativeResource],
    ) -> Result<Vec<DeclarativeResource>>;

    /// Remove every key under the prefix, returning how many were deleted
    async fn delete_resources_by_key_prefix(&self) -> Result<u64>;

    /// Stream every resource of one kind under the prefix.
    ///
    /// Nothing is read until the stream is polled. Each call starts a fresh
    /// scan.
    fn iter_by_type(&self, kind: ResourceKind) -> BoxStream<'_, Result<DeclarativeResource>>;
}

/// Registry backed by any [`KvStore`]
pub struct KvRegistry {
    store: Arc<dyn KvStore>,
    prefix: KeyPrefix,
}

impl KvRegistry {
    pub fn new(store: Arc<dyn KvStore>, prefix: KeyPrefix) -> Self {
        Self { store, prefix }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    fn encode(&self, key: &str, resource: &DeclarativeResource) -> Result<Vec<u8>> {
        resource.to_document().map_err(|source| RegistryError::Encode {
            key: key.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Registry for KvRegistry {
    fn key_prefix(&self) -> &KeyPrefix {
        &self.prefix
    }

    async fn apply_resource(&self, resource: &DeclarativeResource) -> Result<()> {
        let key = self.prefix.key_for(resource);
        let document = self.encode(&key, resource)?;
        self.store.put(&key, document).await?;
        debug!(key = %key, "Applied resource");
        Ok(())
    }

    #[instrument(skip(self, resources), fields(prefix = %self.prefix, desired = resources.len()))]
    async fn sync_resources_by_key_prefix(
        &self,
        resources: &[DeclarativeResource],
    ) -> Result<Vec<DeclarativeResource>> {
        // 1. Snapshot what the namespace currently holds
        let existing: BTreeMap<String, Vec<u8>> = self
            .store
            .range(self.prefix.as_str())
            .await?
            .into_iter()
            .map(|kv| (kv.key, kv.value))
            .collect();

        // 2. Write desired resources, skipping unchanged documents
        let mut desired = BTreeSet::new();
        let mut failed = Vec::new();
        let mut written = 0usize;

        for resource in resources {
            let key = self.prefix.key_for(resource);
            desired.insert(key.clone());

            let document = match self.encode(&key, resource) {
                Ok(document) => document,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unencodable resource");
                    failed.push(resource.clone());
                    continue;
                }
            };

            if existing.get(&key) == Some(&document) {
                continue;
            }

            match self.store.put(&key, document).await {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to write resource");
                    failed.push(resource.clone());
                }
            }
        }

        // 3. Remove keys the desired set no longer names
        let mut deleted = 0usize;
        for key in existing.keys().filter(|key| !desired.contains(*key)) {
            self.store.delete(key).await?;
            deleted += 1;
        }

        info!(
            written = written,
            deleted = deleted,
            failed = failed.len(),
            "Synced resources"
        );

        Ok(failed)
    }

    #[instrument(skip(self), fields(prefix = %self.prefix))]
    async fn delete_resources_by_key_prefix(&self) -> Result<u64> {
        let deleted = self.store.delete_range(self.prefix.as_str()).await?;
        info!(deleted = deleted, "Deleted namespace");
        Ok(deleted)
    }

    fn iter_by_type(&self, kind: ResourceKind) -> BoxStream<'_, Result<DeclarativeResource>> {
        let prefix = self.prefix.kind_prefix(kind);

        stream::once(async move { self.store.range(&prefix).await })
            .flat_map(|scanned| match scanned {
                Ok(entries) => stream::iter(entries.into_iter().map(|kv| {
                    DeclarativeResource::from_document(&kv.value)
                        .map_err(|source| RegistryError::Decode { key: kv.key, source })
                }))
                .left_stream(),
                Err(e) => stream::iter(std::iter::once(Err(RegistryError::from(e)))).right_stream(),
            })
            .boxed()
    }
}
