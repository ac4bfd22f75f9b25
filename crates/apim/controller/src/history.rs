//! Release history and publish event storage

use crate::error::{ControllerError, Result};
use apim_types::{
    EventStatus, GatewayId, PublishEvent, PublishEventId, PublishStep, ReleaseHistory,
    ReleaseHistoryId, ReleaseStatus, StageId,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Audit trail of release attempts.
///
/// Status changes go through [`ReleaseHistoryStore::transition`], which refuses
/// anything [`ReleaseStatus::can_transition_to`] does not allow. Events are
/// append-only and numbered by the store.
#[async_trait]
pub trait ReleaseHistoryStore: Send + Sync {
    async fn create(&self, history: ReleaseHistory) -> Result<ReleaseHistory>;

    async fn get(&self, id: ReleaseHistoryId) -> Result<Option<ReleaseHistory>>;

    async fn transition(
        &self,
        id: ReleaseHistoryId,
        status: ReleaseStatus,
        message: &str,
    ) -> Result<ReleaseHistory>;

    async fn append_event(
        &self,
        id: ReleaseHistoryId,
        step: PublishStep,
        status: EventStatus,
        detail: &str,
    ) -> Result<PublishEvent>;

    /// Events of one history in execution order
    async fn events(&self, id: ReleaseHistoryId) -> Result<Vec<PublishEvent>>;

    /// Histories of a stage, newest first
    async fn list_for_stage(
        &self,
        gateway_id: GatewayId,
        stage_id: StageId,
    ) -> Result<Vec<ReleaseHistory>>;
}

/// Serializable dump of a history store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    #[serde(default)]
    pub histories: Vec<ReleaseHistory>,

    #[serde(default)]
    pub events: Vec<PublishEvent>,
}

/// In-memory history store
#[derive(Default)]
pub struct InMemoryReleaseHistoryStore {
    histories: DashMap<ReleaseHistoryId, ReleaseHistory>,
    events: DashMap<ReleaseHistoryId, Vec<PublishEvent>>,
}

impl InMemoryReleaseHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: HistorySnapshot) -> Self {
        let store = Self::new();
        for history in snapshot.histories {
            store.histories.insert(history.id, history);
        }
        for event in snapshot.events {
            store.events.entry(event.history_id).or_default().push(event);
        }
        for mut events in store.events.iter_mut() {
            events.sort_by_key(|e| e.seq);
        }
        store
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        let mut histories: Vec<_> = self.histories.iter().map(|h| h.value().clone()).collect();
        histories.sort_by_key(|h| h.created_at);

        let mut events: Vec<PublishEvent> = self
            .events
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        events.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.seq.cmp(&b.seq))
        });

        HistorySnapshot { histories, events }
    }
}

#[async_trait]
impl ReleaseHistoryStore for InMemoryReleaseHistoryStore {
    async fn create(&self, history: ReleaseHistory) -> Result<ReleaseHistory> {
        self.histories.insert(history.id, history.clone());
        Ok(history)
    }

    async fn get(&self, id: ReleaseHistoryId) -> Result<Option<ReleaseHistory>> {
        Ok(self.histories.get(&id).map(|h| h.clone()))
    }

    async fn transition(
        &self,
        id: ReleaseHistoryId,
        status: ReleaseStatus,
        message: &str,
    ) -> Result<ReleaseHistory> {
        let mut history = self
            .histories
            .get_mut(&id)
            .ok_or_else(|| ControllerError::not_found("release history", id))?;

        if !history.status.can_transition_to(status) {
            return Err(ControllerError::InvalidTransition {
                history_id: id,
                from: history.status,
                to: status,
            });
        }

        history.status = status;
        history.message = message.to_string();
        history.updated_at = chrono::Utc::now();
        Ok(history.clone())
    }

    async fn append_event(
        &self,
        id: ReleaseHistoryId,
        step: PublishStep,
        status: EventStatus,
        detail: &str,
    ) -> Result<PublishEvent> {
        if !self.histories.contains_key(&id) {
            return Err(ControllerError::not_found("release history", id));
        }

        let mut events = self.events.entry(id).or_default();
        let event = PublishEvent {
            id: PublishEventId::generate(),
            history_id: id,
            seq: events.len() as u32 + 1,
            step,
            status,
            detail: detail.to_string(),
            created_at: chrono::Utc::now(),
        };
        events.push(event.clone());
        Ok(event)
    }

    async fn events(&self, id: ReleaseHistoryId) -> Result<Vec<PublishEvent>> {
        Ok(self.events.get(&id).map(|e| e.clone()).unwrap_or_default())
    }

    async fn list_for_stage(
        &self,
        gateway_id: GatewayId,
        stage_id: StageId,
    ) -> Result<Vec<ReleaseHistory>> {
        let mut histories: Vec<_> = self
            .histories
            .iter()
            .filter(|h| h.gateway_id == gateway_id && h.stage_id == stage_id)
            .map(|h| h.value().clone())
            .collect();
        histories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(histories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apim_types::PublishSource;

    fn history() -> ReleaseHistory {
        ReleaseHistory::new(
            GatewayId::new(1),
            StageId::new(3),
            None,
            PublishSource::VersionPublish,
            "admin",
        )
    }

    #[tokio::test]
    async fn test_transition_follows_status_rules() {
        let store = InMemoryReleaseHistoryStore::new();
        let created = store.create(history()).await.unwrap();

        let releasing = store
            .transition(created.id, ReleaseStatus::Releasing, "")
            .await
            .unwrap();
        assert_eq!(releasing.status, ReleaseStatus::Releasing);

        let done = store
            .transition(created.id, ReleaseStatus::Success, "ok")
            .await
            .unwrap();
        assert_eq!(done.message, "ok");

        let err = store
            .transition(created.id, ReleaseStatus::Releasing, "")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::InvalidTransition {
                from: ReleaseStatus::Success,
                to: ReleaseStatus::Releasing,
                ..
            }
        ));
        let stored = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReleaseStatus::Success);
    }

    #[tokio::test]
    async fn test_events_are_numbered_in_order() {
        let store = InMemoryReleaseHistoryStore::new();
        let created = store.create(history()).await.unwrap();

        store
            .append_event(
                created.id,
                PublishStep::ValidateConfiguration,
                EventStatus::Success,
                "",
            )
            .await
            .unwrap();
        store
            .append_event(
                created.id,
                PublishStep::ReleaseUpgrading,
                EventStatus::Failure,
                "boom",
            )
            .await
            .unwrap();

        let events = store.events(created.id).await.unwrap();
        let seqs: Vec<_> = events.iter().map(|e| (e.seq, e.step)).collect();
        assert_eq!(
            seqs,
            vec![
                (1, PublishStep::ValidateConfiguration),
                (2, PublishStep::ReleaseUpgrading)
            ]
        );
        assert_eq!(events[1].detail, "boom");
    }

    #[tokio::test]
    async fn test_event_for_unknown_history() {
        let store = InMemoryReleaseHistoryStore::new();
        let result = store
            .append_event(
                ReleaseHistoryId::generate(),
                PublishStep::ConfigUpdating,
                EventStatus::Success,
                "",
            )
            .await;
        assert!(matches!(result, Err(ControllerError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_snapshot_restores_events() {
        let store = InMemoryReleaseHistoryStore::new();
        let created = store.create(history()).await.unwrap();
        store
            .append_event(
                created.id,
                PublishStep::ReleaseRevoking,
                EventStatus::Success,
                "",
            )
            .await
            .unwrap();

        let restored = InMemoryReleaseHistoryStore::from_snapshot(store.snapshot());
        assert_eq!(restored.events(created.id).await.unwrap().len(), 1);
        assert_eq!(
            restored
                .list_for_stage(GatewayId::new(1), StageId::new(3))
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
