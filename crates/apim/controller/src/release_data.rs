//! Release data: an immutable snapshot of everything one release needs
//!
//! Loaded once per release attempt so a concurrent edit of the relational
//! state can never produce a half-old, half-new set of resources. Derived
//! views are computed on first use and kept for the life of the snapshot.

use crate::error::{ControllerError, Result};
use crate::repository::GatewayRepository;
use apim_types::{
    AccessStrategyBinding, Backend, BackendConfigSpec, BackendId, Gateway, GatewayAuthConfig,
    GatewayId, GatewayJwt, MicroGateway, PluginBinding, PluginConfig, PluginScope, ResourceId,
    ResourceVersion, ResourceVersionId, Stage, StageId,
};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::warn;

/// Where a stage's configuration lives: what a revoke needs to know
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseTarget {
    pub gateway: Gateway,
    pub stage: Stage,

    /// Explicitly assigned micro-gateway, `None` for the default shared fleet
    pub micro_gateway: Option<MicroGateway>,
}

impl ReleaseTarget {
    pub async fn load(
        repo: &dyn GatewayRepository,
        gateway_id: GatewayId,
        stage_id: StageId,
    ) -> Result<Self> {
        let gateway = repo
            .get_gateway(gateway_id)
            .await?
            .ok_or_else(|| ControllerError::not_found("gateway", gateway_id))?;

        let stage = repo
            .get_stage(stage_id)
            .await?
            .filter(|stage| stage.gateway_id == gateway_id)
            .ok_or_else(|| ControllerError::not_found("stage", stage_id))?;

        let micro_gateway = match stage.micro_gateway_id {
            Some(id) => Some(
                repo.get_micro_gateway(id)
                    .await?
                    .ok_or_else(|| ControllerError::not_found("micro-gateway", id))?,
            ),
            None => None,
        };

        Ok(Self {
            gateway,
            stage,
            micro_gateway,
        })
    }
}

/// Immutable snapshot of a stage's configuration at one resource version
#[derive(Debug)]
pub struct ReleaseData {
    target: ReleaseTarget,
    resource_version: ResourceVersion,
    backends: Vec<Backend>,
    raw_backend_configs: Vec<(BackendId, BackendConfigSpec)>,
    jwt: Option<GatewayJwt>,
    auth_config: GatewayAuthConfig,
    plugin_bindings: Vec<PluginBinding>,
    access_strategies: Vec<AccessStrategyBinding>,

    stage_plugins: OnceLock<Vec<PluginConfig>>,
    resource_plugins: OnceLock<BTreeMap<ResourceId, Vec<PluginConfig>>>,
    backend_configs: OnceLock<BTreeMap<BackendId, BackendConfigSpec>>,
}

impl ReleaseData {
    /// Read a stage's configuration.
    ///
    /// Without an explicit `resource_version_id` the version the stage
    /// currently has released is used.
    pub async fn load(
        repo: &dyn GatewayRepository,
        gateway_id: GatewayId,
        stage_id: StageId,
        resource_version_id: Option<ResourceVersionId>,
    ) -> Result<Self> {
        let target = ReleaseTarget::load(repo, gateway_id, stage_id).await?;

        let version_id = match resource_version_id {
            Some(id) => id,
            None => {
                repo.get_release(stage_id)
                    .await?
                    .filter(|release| release.gateway_id == gateway_id)
                    .ok_or_else(|| ControllerError::not_found("release", stage_id))?
                    .resource_version_id
            }
        };

        let resource_version = repo
            .get_resource_version(version_id)
            .await?
            .filter(|version| version.gateway_id == gateway_id)
            .ok_or_else(|| ControllerError::not_found("resource version", version_id))?;

        let backends = repo.list_backends(gateway_id).await?;
        let raw_backend_configs = repo
            .list_backend_configs(stage_id)
            .await?
            .into_iter()
            .map(|config| (config.backend_id, config.config))
            .collect();

        let jwt = repo.get_jwt(gateway_id).await?;
        let auth_config = repo.get_auth_config(gateway_id).await?.unwrap_or_default();
        let plugin_bindings = repo.list_plugin_bindings(gateway_id).await?;
        let access_strategies = repo.list_access_strategy_bindings(gateway_id).await?;

        Ok(Self {
            target,
            resource_version,
            backends,
            raw_backend_configs,
            jwt,
            auth_config,
            plugin_bindings,
            access_strategies,
            stage_plugins: OnceLock::new(),
            resource_plugins: OnceLock::new(),
            backend_configs: OnceLock::new(),
        })
    }

    pub fn target(&self) -> &ReleaseTarget {
        &self.target
    }

    pub fn gateway(&self) -> &Gateway {
        &self.target.gateway
    }

    pub fn stage(&self) -> &Stage {
        &self.target.stage
    }

    pub fn micro_gateway(&self) -> Option<&MicroGateway> {
        self.target.micro_gateway.as_ref()
    }

    pub fn resource_version(&self) -> &ResourceVersion {
        &self.resource_version
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn backend(&self, id: BackendId) -> Option<&Backend> {
        self.backends.iter().find(|backend| backend.id == id)
    }

    pub fn jwt(&self) -> Option<&GatewayJwt> {
        self.jwt.as_ref()
    }

    pub fn auth_config(&self) -> &GatewayAuthConfig {
        &self.auth_config
    }

    /// Backend configs of this stage, keyed by backend
    pub fn backend_configs(&self) -> &BTreeMap<BackendId, BackendConfigSpec> {
        self.backend_configs
            .get_or_init(|| self.raw_backend_configs.iter().cloned().collect())
    }

    /// Plugins bound to the stage, access strategies folded in
    pub fn stage_plugins(&self) -> &[PluginConfig] {
        self.stage_plugins.get_or_init(|| {
            merge_plugins(
                PluginScope::Stage(self.stage().id),
                &self.plugin_bindings,
                &self.access_strategies,
            )
        })
    }

    /// Plugins bound to one resource of the version, access strategies folded in
    pub fn resource_plugins(&self, resource_id: ResourceId) -> &[PluginConfig] {
        self.resource_plugins
            .get_or_init(|| {
                self.resource_version
                    .resources
                    .iter()
                    .map(|resource| {
                        let plugins = merge_plugins(
                            PluginScope::Resource(resource.id),
                            &self.plugin_bindings,
                            &self.access_strategies,
                        );
                        (resource.id, plugins)
                    })
                    .collect()
            })
            .get(&resource_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Plugins of one scope, sorted by name.
///
/// A legacy access strategy is translated to its equivalent plugin. When a
/// plugin binding of that type already exists on the scope, the binding
/// wins and the strategy is dropped.
fn merge_plugins(
    scope: PluginScope,
    bindings: &[PluginBinding],
    strategies: &[AccessStrategyBinding],
) -> Vec<PluginConfig> {
    let mut merged: BTreeMap<String, PluginConfig> = bindings
        .iter()
        .filter(|binding| binding.scope == scope)
        .map(|binding| {
            (
                binding.plugin_type.clone(),
                PluginConfig {
                    name: binding.plugin_type.clone(),
                    config: binding.config.clone(),
                },
            )
        })
        .collect();

    for strategy in strategies.iter().filter(|s| s.scope == scope) {
        let Some(plugin) = strategy.to_plugin_config() else {
            warn!(
                binding_id = %strategy.id,
                strategy = ?strategy.strategy_type,
                "Access strategy has no plugin equivalent, dropped"
            );
            continue;
        };

        if merged.contains_key(&plugin.name) {
            warn!(
                binding_id = %strategy.id,
                plugin = %plugin.name,
                "Plugin binding overrides access strategy of the same type"
            );
            continue;
        }
        merged.insert(plugin.name.clone(), plugin);
    }

    merged.into_values().collect()
}
