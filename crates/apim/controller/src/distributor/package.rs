//! Package-deploy distribution for dedicated managed micro-gateways

use super::{DistributeOutcome, Distributor};
use crate::convertors::{convert_release, ConvertedRelease, ConvertorConfig};
use crate::deploy::{ChartPackage, ChartRef, ChartRepository, DeployRequest, DeployTool};
use crate::error::{ControllerError, Result};
use crate::release_data::{ReleaseData, ReleaseTarget};
use apim_types::{DeployTarget, Gateway, MicroGateway, Stage};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Renders a values document and upgrades the micro-gateway's chart release
pub struct PackageDeployDistributor {
    deploy_tool: Arc<dyn DeployTool>,
    chart_repository: Arc<dyn ChartRepository>,
    micro_gateway: MicroGateway,
    config: ConvertorConfig,
    generate_chart: bool,
    operator: String,
}

impl PackageDeployDistributor {
    pub fn new(
        deploy_tool: Arc<dyn DeployTool>,
        chart_repository: Arc<dyn ChartRepository>,
        micro_gateway: MicroGateway,
        config: ConvertorConfig,
        generate_chart: bool,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            deploy_tool,
            chart_repository,
            micro_gateway,
            config,
            generate_chart,
            operator: operator.into(),
        }
    }

    pub fn generates_chart(&self) -> bool {
        self.generate_chart
    }

    fn deploy_target(&self) -> Result<&DeployTarget> {
        self.micro_gateway.config.deploy.as_ref().ok_or_else(|| {
            ControllerError::Validation(format!(
                "micro-gateway {} has no deploy target",
                self.micro_gateway.name
            ))
        })
    }

    fn values(
        &self,
        gateway: &Gateway,
        stage: &Stage,
        converted: Option<&ConvertedRelease>,
        publish_id: Option<&str>,
    ) -> Result<Value> {
        let resources = match converted {
            Some(converted) => converted
                .iter()
                .map(serde_json::to_value)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ControllerError::Internal(format!("failed to render values: {e}")))?,
            None => Vec::new(),
        };

        let mut stages = serde_json::Map::new();
        stages.insert(
            stage.name.clone(),
            json!({
                "id": stage.id.get(),
                "enabled": converted.is_some(),
                "resources": resources,
            }),
        );

        Ok(json!({
            "gateway": { "id": gateway.id.get(), "name": gateway.name },
            "microGateway": {
                "id": self.micro_gateway.id.as_uuid().to_string(),
                "name": self.micro_gateway.name,
                "keyPrefix": self.micro_gateway.config.key_prefix,
            },
            "stages": stages,
            "releaseTaskId": publish_id,
        }))
    }

    async fn chart(&self, target: &DeployTarget) -> std::result::Result<ChartRef, String> {
        if !self.generate_chart {
            return Ok(ChartRef {
                name: target.chart_name.clone(),
                version: target.chart_version.clone(),
            });
        }

        let package = ChartPackage {
            name: target.chart_name.clone(),
            version: target.chart_version.clone(),
            app_version: self.micro_gateway.config.edition.clone(),
            default_values: json!({}),
        };
        self.chart_repository
            .push_chart(&package)
            .await
            .map_err(|e| e.to_string())
    }

    /// Upgrade the release installed at provisioning time. Values are scoped
    /// under `stages.<name>` so one stage never overwrites another.
    /// Delivery problems become a failed outcome carrying the deploy tool's
    /// message.
    async fn deploy(&self, values: Value) -> Result<DistributeOutcome> {
        let target = self.deploy_target()?;

        let chart = match self.chart(target).await {
            Ok(chart) => chart,
            Err(message) => {
                warn!(error = %message, "Chart push failed");
                return Ok(DistributeOutcome::failed(message));
            }
        };

        let request = DeployRequest {
            chart_name: chart.name,
            chart_version: chart.version,
            release_name: target.release_name.clone(),
            namespace: target.namespace.clone(),
            cluster_id: target.cluster_id.clone(),
            values,
            operator: self.operator.clone(),
        };

        match self.deploy_tool.install_or_upgrade(&request).await {
            Ok(result) if result.committed => {
                info!(
                    release = %request.release_name,
                    revision = result.revision,
                    "Chart release upgraded"
                );
                Ok(DistributeOutcome::ok(format!(
                    "{}: release {} at revision {}",
                    self.micro_gateway.name, request.release_name, result.revision
                )))
            }
            Ok(result) => {
                warn!(
                    release = %request.release_name,
                    message = %result.message,
                    "Release not committed"
                );
                Ok(DistributeOutcome::failed(result.message))
            }
            Err(e) => {
                warn!(release = %request.release_name, error = %e, "Deploy tool call failed");
                Ok(DistributeOutcome::failed(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Distributor for PackageDeployDistributor {
    #[instrument(skip(self, data), fields(
        micro_gateway = %self.micro_gateway.name,
        gateway = %data.gateway().name,
        stage = %data.stage().name,
        publish_id = publish_id.unwrap_or("-"),
    ))]
    async fn distribute(
        &self,
        data: &ReleaseData,
        publish_id: Option<&str>,
    ) -> Result<DistributeOutcome> {
        let converted = convert_release(data, &self.config, true)?;
        let values = self.values(data.gateway(), data.stage(), Some(&converted), publish_id)?;
        self.deploy(values).await
    }

    /// Redeploy with the stage disabled; the micro-gateway itself stays
    #[instrument(skip(self, target), fields(
        micro_gateway = %self.micro_gateway.name,
        gateway = %target.gateway.name,
        stage = %target.stage.name,
    ))]
    async fn revoke(
        &self,
        target: &ReleaseTarget,
        publish_id: Option<&str>,
    ) -> Result<DistributeOutcome> {
        let values = self.values(&target.gateway, &target.stage, None, publish_id)?;
        self.deploy(values).await
    }

    fn name(&self) -> &str {
        "package-deploy"
    }
}
