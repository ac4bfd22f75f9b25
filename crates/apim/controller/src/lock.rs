//! Release lock keyed by gateway and stage
//!
//! Two releases of the same stage must never interleave their writes.
//! Different stages never contend.

use crate::error::{ControllerError, Result};
use apim_types::{GatewayId, StageId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// How long a caller is willing to wait for a held lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Retry until the configured attempts run out
    Blocking,
    /// Fail immediately when the lock is held
    NonBlocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    pub retry_times: u32,

    #[serde(with = "millis")]
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_times: 60,
            retry_interval: Duration::from_secs(1),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Mutual exclusion backend. `owner` makes unlock safe against a stale guard.
pub trait ReleaseLock: Send + Sync {
    /// Take the lock if free
    fn try_lock(&self, key: &str, owner: Uuid) -> bool;

    /// Release the lock if `owner` still holds it
    fn unlock(&self, key: &str, owner: Uuid);
}

/// Process-local lock table
#[derive(Default)]
pub struct InMemoryReleaseLock {
    held: DashMap<String, Uuid>,
}

impl InMemoryReleaseLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.held.contains_key(key)
    }
}

impl ReleaseLock for InMemoryReleaseLock {
    fn try_lock(&self, key: &str, owner: Uuid) -> bool {
        match self.held.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(owner);
                true
            }
        }
    }

    fn unlock(&self, key: &str, owner: Uuid) {
        self.held.remove_if(key, |_, holder| *holder == owner);
    }
}

pub fn lock_key(gateway_id: GatewayId, stage_id: StageId) -> String {
    format!("release:{}:{}", gateway_id.get(), stage_id.get())
}

/// Acquires release locks with a retry policy
#[derive(Clone)]
pub struct ReleaseLocker {
    backend: Arc<dyn ReleaseLock>,
    config: LockConfig,
}

impl ReleaseLocker {
    pub fn new(backend: Arc<dyn ReleaseLock>, config: LockConfig) -> Self {
        Self { backend, config }
    }

    pub async fn acquire(
        &self,
        gateway_id: GatewayId,
        stage_id: StageId,
        mode: LockMode,
    ) -> Result<ReleaseLockGuard> {
        let key = lock_key(gateway_id, stage_id);
        let owner = Uuid::new_v4();
        let attempts = match mode {
            LockMode::Blocking => self.config.retry_times + 1,
            LockMode::NonBlocking => 1,
        };

        for attempt in 1..=attempts {
            if self.backend.try_lock(&key, owner) {
                debug!(key = %key, attempt = attempt, "Release lock acquired");
                return Ok(ReleaseLockGuard {
                    backend: self.backend.clone(),
                    key,
                    owner,
                });
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.retry_interval).await;
            }
        }

        Err(ControllerError::LockTimeout(format!(
            "{key} is held by another release"
        )))
    }
}

/// Holds a release lock until dropped
pub struct ReleaseLockGuard {
    backend: Arc<dyn ReleaseLock>,
    key: String,
    owner: Uuid,
}

impl ReleaseLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ReleaseLockGuard {
    fn drop(&mut self) {
        self.backend.unlock(&self.key, self.owner);
        debug!(key = %self.key, "Release lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locker(retry_times: u32) -> (Arc<InMemoryReleaseLock>, ReleaseLocker) {
        let backend = Arc::new(InMemoryReleaseLock::new());
        let locker = ReleaseLocker::new(
            backend.clone(),
            LockConfig {
                retry_times,
                retry_interval: Duration::from_millis(10),
            },
        );
        (backend, locker)
    }

    #[tokio::test]
    async fn test_non_blocking_contention() {
        let (_, locker) = locker(3);
        let (gw, stage) = (GatewayId::new(1), StageId::new(3));

        let first = locker.acquire(gw, stage, LockMode::NonBlocking).await;
        let second = locker.acquire(gw, stage, LockMode::NonBlocking).await;

        assert!(first.is_ok());
        assert!(matches!(second, Err(ControllerError::LockTimeout(_))));

        drop(first);
        assert!(locker.acquire(gw, stage, LockMode::NonBlocking).await.is_ok());
    }

    #[tokio::test]
    async fn test_different_stages_do_not_contend() {
        let (_, locker) = locker(0);
        let _a = locker
            .acquire(GatewayId::new(1), StageId::new(3), LockMode::NonBlocking)
            .await
            .unwrap();
        assert!(locker
            .acquire(GatewayId::new(1), StageId::new(4), LockMode::NonBlocking)
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_waits_for_release() {
        let (backend, locker) = locker(5);
        let (gw, stage) = (GatewayId::new(1), StageId::new(3));
        let held = locker.acquire(gw, stage, LockMode::NonBlocking).await.unwrap();

        let waiter = {
            let locker = locker.clone();
            tokio::spawn(async move { locker.acquire(gw, stage, LockMode::Blocking).await })
        };
        tokio::time::sleep(Duration::from_millis(25)).await;
        drop(held);

        let guard = waiter.await.unwrap().unwrap();
        assert!(backend.is_locked(guard.key()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_times_out() {
        let (_, locker) = locker(2);
        let (gw, stage) = (GatewayId::new(1), StageId::new(3));
        let _held = locker.acquire(gw, stage, LockMode::NonBlocking).await.unwrap();

        let err = locker.acquire(gw, stage, LockMode::Blocking).await.err();
        assert!(matches!(err, Some(ControllerError::LockTimeout(_))));
    }

    #[test]
    fn test_stale_owner_cannot_unlock() {
        let backend = InMemoryReleaseLock::new();
        let owner = Uuid::new_v4();
        assert!(backend.try_lock("k", owner));
        backend.unlock("k", Uuid::new_v4());
        assert!(backend.is_locked("k"));
        backend.unlock("k", owner);
        assert!(!backend.is_locked("k"));
    }
}
