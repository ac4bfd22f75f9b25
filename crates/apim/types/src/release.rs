//! Release pointer, release history and publish events
//!
//! A [`Release`] is the active (gateway, stage) → resource version
//! association. Every publish or revoke attempt leaves a [`ReleaseHistory`]
//! and an ordered list of [`PublishEvent`]s behind for post-mortem.

use crate::{GatewayId, PublishEventId, ReleaseHistoryId, ResourceVersionId, StageId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Currently active release of a stage. At most one per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub gateway_id: GatewayId,
    pub stage_id: StageId,
    pub resource_version_id: ResourceVersionId,

    #[serde(default)]
    pub updated_by: String,

    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Audit record of one publish or revoke attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseHistory {
    pub id: ReleaseHistoryId,
    pub gateway_id: GatewayId,
    pub stage_id: StageId,

    /// Version being published; `None` for revokes and re-publishes that
    /// resolve the version from the current release
    pub resource_version_id: Option<ResourceVersionId>,

    pub source: PublishSource,
    pub operator: String,
    pub status: ReleaseStatus,

    #[serde(default)]
    pub message: String,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ReleaseHistory {
    pub fn new(
        gateway_id: GatewayId,
        stage_id: StageId,
        resource_version_id: Option<ResourceVersionId>,
        source: PublishSource,
        operator: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: ReleaseHistoryId::generate(),
            gateway_id,
            stage_id,
            resource_version_id,
            source,
            operator: operator.into(),
            status: ReleaseStatus::Pending,
            message: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Release history status.
///
/// Transitions are monotonic:
/// `Pending → Releasing → {Success, Failure}`, `Pending → Unreleased` for a
/// completed revoke, and `Pending → Failure` for attempts abandoned before
/// they started releasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    Pending,
    Releasing,
    Success,
    Failure,
    Unreleased,
}

impl ReleaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReleaseStatus::Success | ReleaseStatus::Failure | ReleaseStatus::Unreleased
        )
    }

    pub fn can_transition_to(&self, next: ReleaseStatus) -> bool {
        use ReleaseStatus::*;
        matches!(
            (self, next),
            (Pending, Releasing)
                | (Pending, Unreleased)
                | (Pending, Failure)
                | (Releasing, Success)
                | (Releasing, Failure)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Pending => "pending",
            ReleaseStatus::Releasing => "releasing",
            ReleaseStatus::Success => "success",
            ReleaseStatus::Failure => "failure",
            ReleaseStatus::Unreleased => "unreleased",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a release attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishSource {
    VersionPublish,
    GatewayEnable,
    GatewayDisable,
    StageUpdate,
    StageDisable,
    BackendUpdate,
    PluginBind,
    PluginUpdate,
    PluginUnbind,
    MicroGatewayRollingUpdate,
    CliSync,
}

impl PublishSource {
    /// Releases a person asked for directly. These fail fast on a
    /// conflicting release instead of queueing behind it.
    pub fn is_user_initiated(&self) -> bool {
        matches!(self, PublishSource::VersionPublish)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishSource::VersionPublish => "version_publish",
            PublishSource::GatewayEnable => "gateway_enable",
            PublishSource::GatewayDisable => "gateway_disable",
            PublishSource::StageUpdate => "stage_update",
            PublishSource::StageDisable => "stage_disable",
            PublishSource::BackendUpdate => "backend_update",
            PublishSource::PluginBind => "plugin_bind",
            PublishSource::PluginUpdate => "plugin_update",
            PublishSource::PluginUnbind => "plugin_unbind",
            PublishSource::MicroGatewayRollingUpdate => "micro_gateway_rolling_update",
            PublishSource::CliSync => "cli_sync",
        }
    }
}

impl fmt::Display for PublishSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discrete step of a release, recorded as a publish event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishStep {
    ValidateConfiguration,
    ReleaseUpgrading,
    ConfigUpdating,
    ReleaseRevoking,
}

impl PublishStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStep::ValidateConfiguration => "validate-configuration",
            PublishStep::ReleaseUpgrading => "release-upgrading",
            PublishStep::ConfigUpdating => "config-updating",
            PublishStep::ReleaseRevoking => "release-revoking",
        }
    }
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failure,
}

/// One step of a release history, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishEvent {
    pub id: PublishEventId,
    pub history_id: ReleaseHistoryId,

    /// Position in execution order, assigned by the history store
    pub seq: u32,

    pub step: PublishStep,
    pub status: EventStatus,

    #[serde(default)]
    pub detail: String,

    pub created_at: chrono::DateTime<chrono::Utc>,
}
