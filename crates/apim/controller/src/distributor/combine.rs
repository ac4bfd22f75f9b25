//! Topology-aware routing across distributors

use super::{DirectWriteDistributor, DistributeOutcome, Distributor, PackageDeployDistributor};
use crate::convertors::ConvertorConfig;
use crate::deploy::{ChartRepository, DeployTool};
use crate::error::{ControllerError, Result};
use crate::release_data::{ReleaseData, ReleaseTarget};
use crate::repository::GatewayRepository;
use apim_registry::KvStore;
use apim_types::MicroGateway;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// How configuration reaches one micro-gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionMethod {
    DirectWrite { include_global_config: bool },
    PackageDeploy { generate_chart: bool },
}

/// One routed branch of a release
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionTarget {
    pub micro_gateway: MicroGateway,
    pub method: DistributionMethod,
}

/// Routes a release to the micro-gateway(s) serving the stage
pub struct CombineDistributor {
    repo: Arc<dyn GatewayRepository>,
    store: Arc<dyn KvStore>,
    deploy_tool: Arc<dyn DeployTool>,
    chart_repository: Arc<dyn ChartRepository>,
    config: ConvertorConfig,
    operator: String,
}

impl CombineDistributor {
    pub fn new(
        repo: Arc<dyn GatewayRepository>,
        store: Arc<dyn KvStore>,
        deploy_tool: Arc<dyn DeployTool>,
        chart_repository: Arc<dyn ChartRepository>,
        config: ConvertorConfig,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            store,
            deploy_tool,
            chart_repository,
            config,
            operator: operator.into(),
        }
    }

    /// Same routing over a different store connection
    pub fn with_store(&self, store: Arc<dyn KvStore>) -> Self {
        Self {
            repo: self.repo.clone(),
            store,
            deploy_tool: self.deploy_tool.clone(),
            chart_repository: self.chart_repository.clone(),
            config: self.config.clone(),
            operator: self.operator.clone(),
        }
    }

    /// Decide which micro-gateways receive a stage and how.
    ///
    /// - No assigned micro-gateway: the default shared fleet, direct write,
    ///   without gateway-global configuration.
    /// - Assigned shared micro-gateway: direct write with global configuration.
    /// - Assigned dedicated managed micro-gateway: package deploy, reusing the
    ///   chart generated at provisioning time.
    /// - Assigned dedicated unmanaged micro-gateway: direct write into its own
    ///   namespace with global configuration.
    pub async fn plan(&self, target: &ReleaseTarget) -> Result<Vec<DistributionTarget>> {
        let planned = match &target.micro_gateway {
            None => {
                let shared = self
                    .repo
                    .default_shared_micro_gateway()
                    .await?
                    .ok_or_else(|| ControllerError::not_found("micro-gateway", "default shared"))?;
                DistributionTarget {
                    micro_gateway: shared,
                    method: DistributionMethod::DirectWrite {
                        include_global_config: false,
                    },
                }
            }
            Some(mg) if mg.is_shared => DistributionTarget {
                micro_gateway: mg.clone(),
                method: DistributionMethod::DirectWrite {
                    include_global_config: true,
                },
            },
            Some(mg) if mg.is_managed => DistributionTarget {
                micro_gateway: mg.clone(),
                method: DistributionMethod::PackageDeploy {
                    generate_chart: false,
                },
            },
            Some(mg) => DistributionTarget {
                micro_gateway: mg.clone(),
                method: DistributionMethod::DirectWrite {
                    include_global_config: true,
                },
            },
        };

        Ok(vec![planned])
    }

    pub fn distributor_for(&self, target: &DistributionTarget) -> Box<dyn Distributor> {
        match target.method {
            DistributionMethod::DirectWrite {
                include_global_config,
            } => Box::new(DirectWriteDistributor::new(
                self.repo.clone(),
                self.store.clone(),
                target.micro_gateway.clone(),
                self.config.clone(),
                include_global_config,
            )),
            DistributionMethod::PackageDeploy { generate_chart } => {
                Box::new(PackageDeployDistributor::new(
                    self.deploy_tool.clone(),
                    self.chart_repository.clone(),
                    target.micro_gateway.clone(),
                    self.config.clone(),
                    generate_chart,
                    self.operator.clone(),
                ))
            }
        }
    }

    /// Distribute to every planned target.
    ///
    /// Every branch runs even after another fails. The outcome succeeds only
    /// if all branches do; a branch error is returned once all have run.
    pub async fn distribute_to(
        &self,
        targets: &[DistributionTarget],
        data: &ReleaseData,
        publish_id: Option<&str>,
    ) -> Result<DistributeOutcome> {
        let mut branches = Vec::with_capacity(targets.len());
        for target in targets {
            let distributor = self.distributor_for(target);
            branches.push(distributor.distribute(data, publish_id).await);
        }
        aggregate(targets, branches)
    }

    /// Revoke from every planned target, with the same no-short-circuit rule
    pub async fn revoke_from(
        &self,
        targets: &[DistributionTarget],
        target: &ReleaseTarget,
        publish_id: Option<&str>,
    ) -> Result<DistributeOutcome> {
        let mut branches = Vec::with_capacity(targets.len());
        for planned in targets {
            let distributor = self.distributor_for(planned);
            branches.push(distributor.revoke(target, publish_id).await);
        }
        aggregate(targets, branches)
    }
}

fn aggregate(
    targets: &[DistributionTarget],
    branches: Vec<Result<DistributeOutcome>>,
) -> Result<DistributeOutcome> {
    let mut success = true;
    let mut messages = Vec::with_capacity(branches.len());
    let mut first_error = None;

    for (target, branch) in targets.iter().zip(branches) {
        match branch {
            Ok(outcome) => {
                if !outcome.success {
                    warn!(
                        micro_gateway = %target.micro_gateway.name,
                        message = %outcome.message,
                        "Branch failed"
                    );
                }
                success &= outcome.success;
                messages.push(outcome.message);
            }
            Err(e) => {
                warn!(
                    micro_gateway = %target.micro_gateway.name,
                    error = %e,
                    "Branch errored"
                );
                success = false;
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    Ok(DistributeOutcome {
        success,
        message: messages.join("; "),
    })
}

#[async_trait]
impl Distributor for CombineDistributor {
    #[instrument(skip(self, data), fields(
        gateway = %data.gateway().name,
        stage = %data.stage().name,
    ))]
    async fn distribute(
        &self,
        data: &ReleaseData,
        publish_id: Option<&str>,
    ) -> Result<DistributeOutcome> {
        let targets = self.plan(data.target()).await?;
        info!(branches = targets.len(), "Routing release");
        self.distribute_to(&targets, data, publish_id).await
    }

    #[instrument(skip(self, target), fields(
        gateway = %target.gateway.name,
        stage = %target.stage.name,
    ))]
    async fn revoke(
        &self,
        target: &ReleaseTarget,
        publish_id: Option<&str>,
    ) -> Result<DistributeOutcome> {
        let targets = self.plan(target).await?;
        self.revoke_from(&targets, target, publish_id).await
    }

    fn name(&self) -> &str {
        "combine"
    }
}
