//! Release triggers and the background release worker

use crate::error::{ControllerError, Result};
use crate::lock::LockMode;
use crate::orchestrator::{PublishRequest, ReleaseOrchestrator, RevokeRequest};
use apim_types::{
    GatewayId, PublishSource, ReleaseHistory, ReleaseHistoryId, ResourceVersionId, StageId,
};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// A release queued for background execution
#[derive(Debug, Clone)]
pub enum ReleaseJob {
    Publish {
        history_id: ReleaseHistoryId,
        request: PublishRequest,
    },
    Revoke {
        history_id: ReleaseHistoryId,
        request: RevokeRequest,
    },
}

impl ReleaseJob {
    pub fn history_id(&self) -> ReleaseHistoryId {
        match self {
            ReleaseJob::Publish { history_id, .. } | ReleaseJob::Revoke { history_id, .. } => {
                *history_id
            }
        }
    }
}

fn lock_mode_for(source: PublishSource) -> LockMode {
    if source.is_user_initiated() {
        LockMode::NonBlocking
    } else {
        LockMode::Blocking
    }
}

/// Entry point for everything that wants a stage released
#[derive(Clone)]
pub struct ReleaseTrigger {
    orchestrator: ReleaseOrchestrator,
    jobs: mpsc::Sender<ReleaseJob>,
}

impl ReleaseTrigger {
    /// Create a trigger and the receiving end for a [`ReleaseWorker`]
    pub fn new(
        orchestrator: ReleaseOrchestrator,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ReleaseJob>) {
        let (jobs, receiver) = mpsc::channel(capacity);
        (Self { orchestrator, jobs }, receiver)
    }

    /// Publish a stage.
    ///
    /// With `is_sync` the pipeline runs inline and the finalized history is
    /// returned; otherwise the job is queued and the pending history returned
    /// right away.
    #[instrument(skip(self, operator, source), fields(source = %source))]
    pub async fn trigger_publish(
        &self,
        source: PublishSource,
        operator: &str,
        gateway_id: GatewayId,
        stage_id: StageId,
        resource_version_id: Option<ResourceVersionId>,
        is_sync: bool,
    ) -> Result<ReleaseHistory> {
        let history = self
            .orchestrator
            .history()
            .create(ReleaseHistory::new(
                gateway_id,
                stage_id,
                resource_version_id,
                source,
                operator,
            ))
            .await?;

        let request = PublishRequest {
            gateway_id,
            stage_id,
            resource_version_id,
            operator: operator.to_string(),
            lock_mode: lock_mode_for(source),
        };

        if is_sync {
            return self.orchestrator.publish(history.id, &request).await;
        }

        self.enqueue(ReleaseJob::Publish {
            history_id: history.id,
            request,
        })
        .await?;
        Ok(history)
    }

    /// Revoke a stage, with the same sync/async contract as publishing
    #[instrument(skip(self, operator, source), fields(source = %source))]
    pub async fn trigger_revoke(
        &self,
        source: PublishSource,
        operator: &str,
        gateway_id: GatewayId,
        stage_id: StageId,
        is_sync: bool,
    ) -> Result<ReleaseHistory> {
        let history = self
            .orchestrator
            .history()
            .create(ReleaseHistory::new(gateway_id, stage_id, None, source, operator))
            .await?;

        let request = RevokeRequest {
            gateway_id,
            stage_id,
            operator: operator.to_string(),
            lock_mode: lock_mode_for(source),
        };

        if is_sync {
            return self.orchestrator.revoke(history.id, &request).await;
        }

        self.enqueue(ReleaseJob::Revoke {
            history_id: history.id,
            request,
        })
        .await?;
        Ok(history)
    }

    async fn enqueue(&self, job: ReleaseJob) -> Result<()> {
        let history_id = job.history_id();
        self.jobs.send(job).await.map_err(|_| {
            ControllerError::Internal(format!("release worker stopped, {history_id} not queued"))
        })?;
        debug!(history_id = %history_id, "Release queued");
        Ok(())
    }
}

/// Executes queued releases, each as its own task
pub struct ReleaseWorker {
    orchestrator: ReleaseOrchestrator,
}

impl ReleaseWorker {
    pub fn new(orchestrator: ReleaseOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Run until every trigger is dropped and all spawned releases finished
    pub async fn run(self, mut jobs: mpsc::Receiver<ReleaseJob>) {
        info!("Release worker started");
        let mut running = JoinSet::new();

        loop {
            tokio::select! {
                Some(job) = jobs.recv() => {
                    let orchestrator = self.orchestrator.clone();
                    running.spawn(async move { execute(orchestrator, job).await });
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Release task panicked");
                    }
                }
                else => break,
            }
        }

        info!("Release worker stopped");
    }
}

async fn execute(orchestrator: ReleaseOrchestrator, job: ReleaseJob) {
    let history_id = job.history_id();
    let result = match &job {
        ReleaseJob::Publish { history_id, request } => {
            orchestrator.publish(*history_id, request).await
        }
        ReleaseJob::Revoke { history_id, request } => {
            orchestrator.revoke(*history_id, request).await
        }
    };

    match result {
        Ok(history) => {
            debug!(history_id = %history_id, status = %history.status, "Release job finished")
        }
        Err(e) => warn!(history_id = %history_id, error = %e, "Release job failed"),
    }
}
