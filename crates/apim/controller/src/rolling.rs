//! Fleet-wide rolling update
//!
//! Re-publishes every stage a micro-gateway serves, for example after the
//! proxy runtime was upgraded. Gateways are processed by a fixed pool of
//! workers, each with its own store connection. A failing gateway is
//! reported and the run continues.

use crate::distributor::CombineDistributor;
use crate::error::{ControllerError, Result};
use crate::lock::LockMode;
use crate::orchestrator::{PublishRequest, ReleaseOrchestrator};
use crate::repository::stage_served_by;
use apim_registry::KvConnector;
use apim_types::{
    Gateway, MicroGateway, MicroGatewayId, PublishSource, ReleaseHistory, ReleaseStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingUpdateConfig {
    /// Size of the worker pool
    pub workers: usize,

    /// Recorded on every release history the run creates
    pub operator: String,
}

impl Default for RollingUpdateConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            operator: "apim-rolling-update".into(),
        }
    }
}

/// Gateway names by result, in the order the gateways were listed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollingUpdateReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl RollingUpdateReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

type WorkQueue = Arc<Mutex<VecDeque<(usize, Gateway)>>>;

pub struct RollingUpdater {
    orchestrator: ReleaseOrchestrator,
    distributor: Arc<CombineDistributor>,
    connector: Arc<dyn KvConnector>,
    config: RollingUpdateConfig,
}

impl RollingUpdater {
    pub fn new(
        orchestrator: ReleaseOrchestrator,
        distributor: Arc<CombineDistributor>,
        connector: Arc<dyn KvConnector>,
        config: RollingUpdateConfig,
    ) -> Self {
        Self {
            orchestrator,
            distributor,
            connector,
            config,
        }
    }

    #[instrument(skip(self), fields(micro_gateway_id = %micro_gateway_id))]
    pub async fn run(&self, micro_gateway_id: MicroGatewayId) -> Result<RollingUpdateReport> {
        let repo = self.orchestrator.repository().clone();

        // 1. Resolve the topology
        let micro_gateway = repo
            .get_micro_gateway(micro_gateway_id)
            .await?
            .ok_or_else(|| ControllerError::not_found("micro-gateway", micro_gateway_id))?;
        let gateways = repo.list_gateways_bound_to(&micro_gateway).await?;
        let names: Vec<String> = gateways.iter().map(|g| g.name.clone()).collect();

        info!(
            micro_gateway = %micro_gateway.name,
            gateways = gateways.len(),
            workers = self.config.workers,
            "Rolling update started"
        );
        if gateways.is_empty() {
            return Ok(RollingUpdateReport::default());
        }

        // 2. Fan out over the worker pool
        let queue: WorkQueue = Arc::new(Mutex::new(gateways.into_iter().enumerate().collect()));
        let micro_gateway = Arc::new(micro_gateway);
        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers.clamp(1, names.len()) {
            let job = Worker {
                id: worker,
                orchestrator: self.orchestrator.clone(),
                distributor: self.distributor.clone(),
                connector: self.connector.clone(),
                micro_gateway: micro_gateway.clone(),
                operator: self.config.operator.clone(),
                queue: queue.clone(),
            };
            workers.spawn(job.run());
        }

        // 3. Collect per-gateway results
        let mut results: Vec<Option<bool>> = vec![None; names.len()];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(done) => {
                    for (index, ok) in done {
                        results[index] = Some(ok);
                    }
                }
                Err(e) => error!(error = %e, "Rolling update worker panicked"),
            }
        }

        // Anything left unprocessed counts as failed
        let mut report = RollingUpdateReport::default();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Some(true) => report.succeeded.push(name),
                _ => report.failed.push(name),
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = ?report.failed,
            "Rolling update finished"
        );
        Ok(report)
    }
}

struct Worker {
    id: usize,
    orchestrator: ReleaseOrchestrator,
    distributor: Arc<CombineDistributor>,
    connector: Arc<dyn KvConnector>,
    micro_gateway: Arc<MicroGateway>,
    operator: String,
    queue: WorkQueue,
}

impl Worker {
    async fn run(self) -> Vec<(usize, bool)> {
        let mut done = Vec::new();

        let store = match self.connector.connect() {
            Ok(store) => store,
            Err(e) => {
                error!(worker = self.id, error = %e, "Worker could not connect to the store");
                return done;
            }
        };
        let orchestrator = self
            .orchestrator
            .with_distributor(Arc::new(self.distributor.with_store(store)));

        loop {
            let next = self.queue.lock().await.pop_front();
            let Some((index, gateway)) = next else {
                break;
            };
            let ok = self.publish_gateway(&orchestrator, &gateway).await;
            done.push((index, ok));
        }
        done
    }

    /// Re-publish every released stage of `gateway` this micro-gateway serves
    async fn publish_gateway(
        &self,
        orchestrator: &ReleaseOrchestrator,
        gateway: &Gateway,
    ) -> bool {
        match self.try_publish_gateway(orchestrator, gateway).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(
                    worker = self.id,
                    gateway = %gateway.name,
                    error = %e,
                    "Gateway update failed"
                );
                false
            }
        }
    }

    async fn try_publish_gateway(
        &self,
        orchestrator: &ReleaseOrchestrator,
        gateway: &Gateway,
    ) -> Result<bool> {
        let repo = orchestrator.repository();
        let default_shared = repo.default_shared_micro_gateway().await?.map(|mg| mg.id);

        let mut ok = true;
        for stage in repo.list_stages(gateway.id).await? {
            if !stage_served_by(&stage, &self.micro_gateway, default_shared) {
                continue;
            }
            // Nothing released yet, nothing to roll
            if repo.get_release(stage.id).await?.is_none() {
                continue;
            }

            let history = orchestrator
                .history()
                .create(ReleaseHistory::new(
                    gateway.id,
                    stage.id,
                    None,
                    PublishSource::MicroGatewayRollingUpdate,
                    self.operator.clone(),
                ))
                .await?;
            let request = PublishRequest {
                gateway_id: gateway.id,
                stage_id: stage.id,
                resource_version_id: None,
                operator: self.operator.clone(),
                lock_mode: LockMode::Blocking,
            };

            let message = match orchestrator.publish(history.id, &request).await {
                Ok(finished) if finished.status == ReleaseStatus::Success => continue,
                Ok(finished) => finished.message,
                Err(e) => e.to_string(),
            };
            warn!(
                gateway = %gateway.name,
                stage = %stage.name,
                message = %message,
                "Stage update failed"
            );
            ok = false;
        }
        Ok(ok)
    }
}
