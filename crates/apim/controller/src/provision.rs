//! Micro-gateway provisioning

use crate::deploy::{ChartPackage, ChartRepository, DeployRequest, DeployTool};
use crate::error::{ControllerError, DeployError, Result};
use crate::repository::GatewayRepository;
use apim_registry::KeyPrefix;
use apim_types::{
    DeployTarget, GatewayId, MicroGateway, MicroGatewayConfig, MicroGatewayId, MicroGatewayStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// How a micro-gateway comes into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateWay {
    /// Managed, deployed later through [`MicroGatewayProvisioner::deploy_pending`]
    NeedDeploy,
    /// Managed, chart generated and installed now
    Deploy,
    /// Operator-run instance that only receives configuration
    Relate,
}

impl CreateWay {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreateWay::NeedDeploy => "need_deploy",
            CreateWay::Deploy => "deploy",
            CreateWay::Relate => "relate",
        }
    }
}

impl fmt::Display for CreateWay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreateWay {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "need_deploy" => Ok(CreateWay::NeedDeploy),
            "deploy" => Ok(CreateWay::Deploy),
            "relate" => Ok(CreateWay::Relate),
            other => Err(ControllerError::Validation(format!(
                "unknown create way: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub gateway_id: GatewayId,
    pub name: String,

    #[serde(default)]
    pub is_shared: bool,

    pub create_way: CreateWay,
    pub config: MicroGatewayConfig,
}

/// Registers micro-gateways and installs the managed ones
pub struct MicroGatewayProvisioner {
    repo: Arc<dyn GatewayRepository>,
    deploy_tool: Arc<dyn DeployTool>,
    chart_repository: Arc<dyn ChartRepository>,
    operator: String,
}

impl MicroGatewayProvisioner {
    pub fn new(
        repo: Arc<dyn GatewayRepository>,
        deploy_tool: Arc<dyn DeployTool>,
        chart_repository: Arc<dyn ChartRepository>,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            deploy_tool,
            chart_repository,
            operator: operator.into(),
        }
    }

    #[instrument(skip(self, request), fields(
        name = %request.name,
        create_way = %request.create_way,
    ))]
    pub async fn provision(&self, request: ProvisionRequest) -> Result<MicroGateway> {
        // 1. Validate
        self.repo
            .get_gateway(request.gateway_id)
            .await?
            .ok_or_else(|| ControllerError::not_found("gateway", request.gateway_id))?;
        self.check_key_prefix(&request.config.key_prefix).await?;

        let (is_managed, status) = match request.create_way {
            CreateWay::Deploy => (true, MicroGatewayStatus::Installing),
            CreateWay::NeedDeploy => (true, MicroGatewayStatus::Pending),
            CreateWay::Relate => (false, MicroGatewayStatus::Installed),
        };
        if is_managed && request.config.deploy.is_none() {
            return Err(ControllerError::Validation(format!(
                "managed micro-gateway {} needs a deploy target",
                request.name
            )));
        }

        // 2. Register
        let micro_gateway = MicroGateway {
            id: MicroGatewayId::generate(),
            name: request.name,
            gateway_id: request.gateway_id,
            is_shared: request.is_shared,
            is_managed,
            status,
            config: request.config,
        };
        self.repo.upsert_micro_gateway(micro_gateway.clone()).await?;
        info!(micro_gateway_id = %micro_gateway.id, status = %status, "Micro-gateway registered");

        // 3. Install when asked to
        match request.create_way {
            CreateWay::Deploy => self.install(micro_gateway).await,
            CreateWay::NeedDeploy | CreateWay::Relate => Ok(micro_gateway),
        }
    }

    /// Install a managed micro-gateway registered with [`CreateWay::NeedDeploy`]
    #[instrument(skip(self), fields(micro_gateway_id = %id))]
    pub async fn deploy_pending(&self, id: MicroGatewayId) -> Result<MicroGateway> {
        let mut micro_gateway = self
            .repo
            .get_micro_gateway(id)
            .await?
            .ok_or_else(|| ControllerError::not_found("micro-gateway", id))?;

        if !micro_gateway.is_managed || micro_gateway.status != MicroGatewayStatus::Pending {
            return Err(ControllerError::Validation(format!(
                "micro-gateway {} is not awaiting deployment (status {})",
                micro_gateway.name, micro_gateway.status
            )));
        }

        micro_gateway.status = MicroGatewayStatus::Installing;
        self.repo.upsert_micro_gateway(micro_gateway.clone()).await?;
        self.install(micro_gateway).await
    }

    /// Namespaces of two micro-gateways must never nest
    async fn check_key_prefix(&self, key_prefix: &str) -> Result<()> {
        if key_prefix.trim_matches('/').is_empty() {
            return Err(ControllerError::Validation(
                "micro-gateway key prefix must not be empty".into(),
            ));
        }

        let candidate = KeyPrefix::new(key_prefix);
        for existing in self.repo.list_micro_gateways().await? {
            let taken = KeyPrefix::new(&existing.config.key_prefix);
            if taken.contains(candidate.as_str()) || candidate.contains(taken.as_str()) {
                return Err(ControllerError::Validation(format!(
                    "key prefix {candidate} overlaps micro-gateway {} ({taken})",
                    existing.name
                )));
            }
        }
        Ok(())
    }

    async fn install(&self, mut micro_gateway: MicroGateway) -> Result<MicroGateway> {
        let result = self.push_and_install(&micro_gateway).await;

        micro_gateway.status = match result {
            Ok(()) => MicroGatewayStatus::Installed,
            Err(_) => MicroGatewayStatus::Abnormal,
        };
        self.repo.upsert_micro_gateway(micro_gateway.clone()).await?;

        match result {
            Ok(()) => {
                info!(name = %micro_gateway.name, "Micro-gateway installed");
                Ok(micro_gateway)
            }
            Err(e) => {
                error!(name = %micro_gateway.name, error = %e, "Micro-gateway install failed");
                Err(e)
            }
        }
    }

    async fn push_and_install(&self, micro_gateway: &MicroGateway) -> Result<()> {
        let target: &DeployTarget = micro_gateway.config.deploy.as_ref().ok_or_else(|| {
            ControllerError::Validation(format!(
                "micro-gateway {} has no deploy target",
                micro_gateway.name
            ))
        })?;

        // The chart is generated once here; releases reuse it
        let chart = self
            .chart_repository
            .push_chart(&ChartPackage {
                name: target.chart_name.clone(),
                version: target.chart_version.clone(),
                app_version: micro_gateway.config.edition.clone(),
                default_values: json!({
                    "microGateway": {
                        "id": micro_gateway.id.as_uuid().to_string(),
                        "name": micro_gateway.name,
                        "keyPrefix": micro_gateway.config.key_prefix,
                    },
                }),
            })
            .await?;

        let request = DeployRequest {
            chart_name: chart.name,
            chart_version: chart.version,
            release_name: target.release_name.clone(),
            namespace: target.namespace.clone(),
            cluster_id: target.cluster_id.clone(),
            values: json!({}),
            operator: self.operator.clone(),
        };
        let result = self.deploy_tool.install_or_upgrade(&request).await?;
        if !result.committed {
            return Err(DeployError::Rejected(result.message).into());
        }
        Ok(())
    }
}
