//! Release orchestration
//!
//! The orchestrator drives one release attempt end to end: it takes the
//! stage lock, walks the history through its status machine and records a
//! publish event per step. It is the only place where an error becomes a
//! `Failure` status, and the lock guard makes sure the stage is unlocked on
//! every exit path.

use crate::convertors::{convert_release, ConvertorConfig};
use crate::distributor::Distributor;
use crate::error::{ControllerError, Result};
use crate::history::ReleaseHistoryStore;
use crate::lock::{LockMode, ReleaseLocker};
use crate::release_data::{ReleaseData, ReleaseTarget};
use crate::repository::GatewayRepository;
use apim_types::{
    EventStatus, GatewayId, PublishStep, Release, ReleaseHistory, ReleaseHistoryId,
    ReleaseStatus, ResourceVersionId, StageId,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Publish a resource version to a stage
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub gateway_id: GatewayId,
    pub stage_id: StageId,

    /// `None` re-publishes the version the stage currently has released
    pub resource_version_id: Option<ResourceVersionId>,

    pub operator: String,
    pub lock_mode: LockMode,
}

/// Remove a stage's configuration from the fleet
#[derive(Debug, Clone)]
pub struct RevokeRequest {
    pub gateway_id: GatewayId,
    pub stage_id: StageId,
    pub operator: String,
    pub lock_mode: LockMode,
}

/// Runs publish and revoke attempts against a history record
#[derive(Clone)]
pub struct ReleaseOrchestrator {
    repo: Arc<dyn GatewayRepository>,
    history: Arc<dyn ReleaseHistoryStore>,
    locker: ReleaseLocker,
    distributor: Arc<dyn Distributor>,
    config: ConvertorConfig,
}

impl ReleaseOrchestrator {
    pub fn new(
        repo: Arc<dyn GatewayRepository>,
        history: Arc<dyn ReleaseHistoryStore>,
        locker: ReleaseLocker,
        distributor: Arc<dyn Distributor>,
        config: ConvertorConfig,
    ) -> Self {
        Self {
            repo,
            history,
            locker,
            distributor,
            config,
        }
    }

    /// Same orchestrator delivering through another distributor
    pub fn with_distributor(&self, distributor: Arc<dyn Distributor>) -> Self {
        Self {
            distributor,
            ..self.clone()
        }
    }

    pub fn history(&self) -> &Arc<dyn ReleaseHistoryStore> {
        &self.history
    }

    pub fn repository(&self) -> &Arc<dyn GatewayRepository> {
        &self.repo
    }

    /// Publish a stage.
    ///
    /// Returns the finalized history. A release that fails after the lock is
    /// taken still returns `Ok` with a `Failure` history; only a lock timeout
    /// or a history store error is returned as `Err`.
    #[instrument(skip(self, request), fields(
        history_id = %history_id,
        gateway_id = %request.gateway_id,
        stage_id = %request.stage_id,
    ))]
    pub async fn publish(
        &self,
        history_id: ReleaseHistoryId,
        request: &PublishRequest,
    ) -> Result<ReleaseHistory> {
        // 1. Lock the stage
        let _guard = match self
            .locker
            .acquire(request.gateway_id, request.stage_id, request.lock_mode)
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "Publish abandoned");
                self.history
                    .transition(history_id, ReleaseStatus::Failure, &e.to_string())
                    .await?;
                return Err(e);
            }
        };

        // 2. Start releasing
        self.history
            .transition(history_id, ReleaseStatus::Releasing, "")
            .await?;

        // 3. Run the steps and finalize
        match self.run_publish(history_id, request).await {
            Ok(message) => {
                info!(message = %message, "Release succeeded");
                self.history
                    .transition(history_id, ReleaseStatus::Success, &message)
                    .await
            }
            Err(e) => {
                error!(error = %e, "Release failed");
                self.history
                    .transition(history_id, ReleaseStatus::Failure, &e.to_string())
                    .await
            }
        }
    }

    async fn run_publish(
        &self,
        history_id: ReleaseHistoryId,
        request: &PublishRequest,
    ) -> Result<String> {
        let publish_id = history_id.to_string();

        let validated = self.validate(request).await;
        let data = self
            .record(history_id, PublishStep::ValidateConfiguration, validated)
            .await?;

        let distributed = match self.distributor.distribute(&data, Some(&publish_id)).await {
            Ok(outcome) if outcome.success => Ok(outcome.message),
            Ok(outcome) => Err(ControllerError::Distribution(outcome.message)),
            Err(e) => Err(e),
        };
        let message = self
            .record(history_id, PublishStep::ReleaseUpgrading, distributed)
            .await?;

        let release = Release {
            gateway_id: request.gateway_id,
            stage_id: request.stage_id,
            resource_version_id: data.resource_version().id,
            updated_by: request.operator.clone(),
            updated_at: chrono::Utc::now(),
        };
        let updated = self.repo.upsert_release(release).await;
        self.record(history_id, PublishStep::ConfigUpdating, updated)
            .await?;

        Ok(message)
    }

    /// Load the snapshot and make sure it converts
    async fn validate(&self, request: &PublishRequest) -> Result<ReleaseData> {
        let data = ReleaseData::load(
            self.repo.as_ref(),
            request.gateway_id,
            request.stage_id,
            request.resource_version_id,
        )
        .await?;

        if !data.stage().is_active() {
            return Err(ControllerError::Validation(format!(
                "stage {} is not active",
                data.stage().name
            )));
        }

        let converted = convert_release(&data, &self.config, true)?;
        info!(
            resource_version = %data.resource_version().version,
            resources = converted.len(),
            "Configuration validated"
        );
        Ok(data)
    }

    /// Revoke a stage.
    ///
    /// Same error contract as [`ReleaseOrchestrator::publish`]. A successful
    /// revoke ends `Unreleased` without passing through `Releasing`.
    #[instrument(skip(self, request), fields(
        history_id = %history_id,
        gateway_id = %request.gateway_id,
        stage_id = %request.stage_id,
    ))]
    pub async fn revoke(
        &self,
        history_id: ReleaseHistoryId,
        request: &RevokeRequest,
    ) -> Result<ReleaseHistory> {
        let _guard = match self
            .locker
            .acquire(request.gateway_id, request.stage_id, request.lock_mode)
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "Revoke abandoned");
                self.history
                    .transition(history_id, ReleaseStatus::Failure, &e.to_string())
                    .await?;
                return Err(e);
            }
        };

        let revoked = self.run_revoke(history_id, request).await;
        match self
            .record(history_id, PublishStep::ReleaseRevoking, revoked)
            .await
        {
            Ok(message) => {
                info!(message = %message, "Stage revoked");
                self.history
                    .transition(history_id, ReleaseStatus::Unreleased, &message)
                    .await
            }
            Err(e) => {
                error!(error = %e, "Revoke failed");
                self.history
                    .transition(history_id, ReleaseStatus::Failure, &e.to_string())
                    .await
            }
        }
    }

    async fn run_revoke(
        &self,
        history_id: ReleaseHistoryId,
        request: &RevokeRequest,
    ) -> Result<String> {
        let target =
            ReleaseTarget::load(self.repo.as_ref(), request.gateway_id, request.stage_id).await?;

        let outcome = self
            .distributor
            .revoke(&target, Some(&history_id.to_string()))
            .await?;
        if !outcome.success {
            return Err(ControllerError::Distribution(outcome.message));
        }

        self.repo.delete_release(request.stage_id).await?;
        Ok(outcome.message)
    }

    /// Append the event for a finished step and pass its result through
    async fn record<T>(
        &self,
        history_id: ReleaseHistoryId,
        step: PublishStep,
        result: Result<T>,
    ) -> Result<T> {
        let (status, detail) = match &result {
            Ok(_) => (EventStatus::Success, String::new()),
            Err(e) => (EventStatus::Failure, e.to_string()),
        };
        self.history
            .append_event(history_id, step, status, &detail)
            .await?;
        result
    }
}
