//! Gateway repository: the relational desired state
//!
//! The control plane only reads gateway configuration. The few mutations
//! here (release pointer, stage binding, micro-gateway records) are the ones
//! the release pipeline and operational commands own.

use crate::error::Result;
use apim_types::{
    AccessStrategyBinding, Backend, BackendConfig, Gateway, GatewayAuthConfig, GatewayId,
    GatewayJwt, MicroGateway, MicroGatewayId, PluginBinding, Release, ResourceVersion,
    ResourceVersionId, Stage, StageId,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read access to gateway configuration plus release bookkeeping
#[async_trait]
pub trait GatewayRepository: Send + Sync {
    async fn get_gateway(&self, id: GatewayId) -> Result<Option<Gateway>>;

    async fn list_active_gateways(&self) -> Result<Vec<Gateway>>;

    async fn get_stage(&self, id: StageId) -> Result<Option<Stage>>;

    async fn list_stages(&self, gateway_id: GatewayId) -> Result<Vec<Stage>>;

    async fn update_stage(&self, stage: Stage) -> Result<()>;

    async fn list_backends(&self, gateway_id: GatewayId) -> Result<Vec<Backend>>;

    async fn list_backend_configs(&self, stage_id: StageId) -> Result<Vec<BackendConfig>>;

    async fn get_resource_version(&self, id: ResourceVersionId)
        -> Result<Option<ResourceVersion>>;

    async fn get_release(&self, stage_id: StageId) -> Result<Option<Release>>;

    async fn upsert_release(&self, release: Release) -> Result<()>;

    /// Returns whether a release existed
    async fn delete_release(&self, stage_id: StageId) -> Result<bool>;

    async fn get_jwt(&self, gateway_id: GatewayId) -> Result<Option<GatewayJwt>>;

    async fn get_auth_config(&self, gateway_id: GatewayId) -> Result<Option<GatewayAuthConfig>>;

    async fn list_plugin_bindings(&self, gateway_id: GatewayId) -> Result<Vec<PluginBinding>>;

    async fn list_access_strategy_bindings(
        &self,
        gateway_id: GatewayId,
    ) -> Result<Vec<AccessStrategyBinding>>;

    async fn get_micro_gateway(&self, id: MicroGatewayId) -> Result<Option<MicroGateway>>;

    async fn list_micro_gateways(&self) -> Result<Vec<MicroGateway>>;

    async fn upsert_micro_gateway(&self, micro_gateway: MicroGateway) -> Result<()>;

    /// The shared fleet serving every stage without an explicit assignment
    async fn default_shared_micro_gateway(&self) -> Result<Option<MicroGateway>>;

    /// Active gateways with at least one active stage served by `micro_gateway`
    async fn list_gateways_bound_to(&self, micro_gateway: &MicroGateway) -> Result<Vec<Gateway>> {
        let default_id = self.default_shared_micro_gateway().await?.map(|mg| mg.id);

        let mut bound = Vec::new();
        for gateway in self.list_active_gateways().await? {
            let stages = self.list_stages(gateway.id).await?;
            if stages
                .iter()
                .any(|stage| stage_served_by(stage, micro_gateway, default_id))
            {
                bound.push(gateway);
            }
        }
        Ok(bound)
    }
}

/// Whether an active stage is served by `micro_gateway`.
///
/// Unassigned stages belong to the default shared fleet.
pub fn stage_served_by(
    stage: &Stage,
    micro_gateway: &MicroGateway,
    default_shared: Option<MicroGatewayId>,
) -> bool {
    if !stage.is_active() {
        return false;
    }
    match stage.micro_gateway_id {
        Some(id) => id == micro_gateway.id,
        None => default_shared == Some(micro_gateway.id),
    }
}

/// Serializable dump of a repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    #[serde(default)]
    pub gateways: Vec<Gateway>,

    #[serde(default)]
    pub stages: Vec<Stage>,

    #[serde(default)]
    pub backends: Vec<Backend>,

    #[serde(default)]
    pub backend_configs: Vec<BackendConfig>,

    #[serde(default)]
    pub resource_versions: Vec<ResourceVersion>,

    #[serde(default)]
    pub releases: Vec<Release>,

    #[serde(default)]
    pub jwts: Vec<GatewayJwt>,

    #[serde(default)]
    pub auth_configs: BTreeMap<GatewayId, GatewayAuthConfig>,

    #[serde(default)]
    pub plugin_bindings: Vec<PluginBinding>,

    #[serde(default)]
    pub access_strategy_bindings: Vec<AccessStrategyBinding>,

    #[serde(default)]
    pub micro_gateways: Vec<MicroGateway>,

    /// Shared fleet used by stages without an assignment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_micro_gateway_id: Option<MicroGatewayId>,
}

/// In-memory gateway repository
pub struct InMemoryGatewayRepository {
    gateways: DashMap<GatewayId, Gateway>,
    stages: DashMap<StageId, Stage>,
    backends: DashMap<GatewayId, Vec<Backend>>,
    backend_configs: DashMap<StageId, Vec<BackendConfig>>,
    resource_versions: DashMap<ResourceVersionId, ResourceVersion>,
    releases: DashMap<StageId, Release>,
    jwts: DashMap<GatewayId, GatewayJwt>,
    auth_configs: DashMap<GatewayId, GatewayAuthConfig>,
    plugin_bindings: DashMap<GatewayId, Vec<PluginBinding>>,
    access_strategy_bindings: DashMap<GatewayId, Vec<AccessStrategyBinding>>,
    micro_gateways: DashMap<MicroGatewayId, MicroGateway>,
    default_micro_gateway_id: Option<MicroGatewayId>,
}

impl InMemoryGatewayRepository {
    pub fn new() -> Self {
        Self {
            gateways: DashMap::new(),
            stages: DashMap::new(),
            backends: DashMap::new(),
            backend_configs: DashMap::new(),
            resource_versions: DashMap::new(),
            releases: DashMap::new(),
            jwts: DashMap::new(),
            auth_configs: DashMap::new(),
            plugin_bindings: DashMap::new(),
            access_strategy_bindings: DashMap::new(),
            micro_gateways: DashMap::new(),
            default_micro_gateway_id: None,
        }
    }

    pub fn from_snapshot(snapshot: RepositorySnapshot) -> Self {
        let mut repo = Self::new();
        repo.default_micro_gateway_id = snapshot.default_micro_gateway_id;

        for gateway in snapshot.gateways {
            repo.insert_gateway(gateway);
        }
        for stage in snapshot.stages {
            repo.insert_stage(stage);
        }
        for backend in snapshot.backends {
            repo.insert_backend(backend);
        }
        for config in snapshot.backend_configs {
            repo.insert_backend_config(config);
        }
        for version in snapshot.resource_versions {
            repo.insert_resource_version(version);
        }
        for release in snapshot.releases {
            repo.releases.insert(release.stage_id, release);
        }
        for jwt in snapshot.jwts {
            repo.jwts.insert(jwt.gateway_id, jwt);
        }
        for (gateway_id, auth) in snapshot.auth_configs {
            repo.auth_configs.insert(gateway_id, auth);
        }
        for binding in snapshot.plugin_bindings {
            repo.insert_plugin_binding(binding);
        }
        for binding in snapshot.access_strategy_bindings {
            repo.insert_access_strategy_binding(binding);
        }
        for micro_gateway in snapshot.micro_gateways {
            repo.micro_gateways.insert(micro_gateway.id, micro_gateway);
        }
        repo
    }

    /// Dump every record, ordered by id for stable output
    pub fn snapshot(&self) -> RepositorySnapshot {
        let mut gateways: Vec<Gateway> = self.gateways.iter().map(|e| e.value().clone()).collect();
        gateways.sort_by_key(|g| g.id);

        let mut stages: Vec<Stage> = self.stages.iter().map(|e| e.value().clone()).collect();
        stages.sort_by_key(|s| s.id);

        let mut backends: Vec<Backend> = self
            .backends
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        backends.sort_by_key(|b| b.id);

        let mut backend_configs: Vec<BackendConfig> = self
            .backend_configs
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        backend_configs.sort_by_key(|c| (c.stage_id, c.backend_id));

        let mut resource_versions: Vec<ResourceVersion> = self
            .resource_versions
            .iter()
            .map(|e| e.value().clone())
            .collect();
        resource_versions.sort_by_key(|v| v.id);

        let mut releases: Vec<Release> = self.releases.iter().map(|e| e.value().clone()).collect();
        releases.sort_by_key(|r| r.stage_id);

        let mut jwts: Vec<GatewayJwt> = self.jwts.iter().map(|e| e.value().clone()).collect();
        jwts.sort_by_key(|j| j.gateway_id);

        let auth_configs = self
            .auth_configs
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        let mut plugin_bindings: Vec<PluginBinding> = self
            .plugin_bindings
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        plugin_bindings.sort_by_key(|b| b.id);

        let mut access_strategy_bindings: Vec<AccessStrategyBinding> = self
            .access_strategy_bindings
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        access_strategy_bindings.sort_by_key(|b| b.id);

        let mut micro_gateways: Vec<MicroGateway> = self
            .micro_gateways
            .iter()
            .map(|e| e.value().clone())
            .collect();
        micro_gateways.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        RepositorySnapshot {
            gateways,
            stages,
            backends,
            backend_configs,
            resource_versions,
            releases,
            jwts,
            auth_configs,
            plugin_bindings,
            access_strategy_bindings,
            micro_gateways,
            default_micro_gateway_id: self.default_micro_gateway_id,
        }
    }

    pub fn with_default_micro_gateway(mut self, id: MicroGatewayId) -> Self {
        self.default_micro_gateway_id = Some(id);
        self
    }

    pub fn insert_gateway(&self, gateway: Gateway) {
        self.gateways.insert(gateway.id, gateway);
    }

    pub fn insert_stage(&self, stage: Stage) {
        self.stages.insert(stage.id, stage);
    }

    pub fn insert_backend(&self, backend: Backend) {
        let mut backends = self.backends.entry(backend.gateway_id).or_default();
        backends.retain(|b| b.id != backend.id);
        backends.push(backend);
    }

    /// One config per (backend, stage); a second insert replaces the first
    pub fn insert_backend_config(&self, config: BackendConfig) {
        let mut configs = self.backend_configs.entry(config.stage_id).or_default();
        configs.retain(|c| c.backend_id != config.backend_id);
        configs.push(config);
    }

    pub fn insert_resource_version(&self, version: ResourceVersion) {
        self.resource_versions.insert(version.id, version);
    }

    pub fn set_jwt(&self, jwt: GatewayJwt) {
        self.jwts.insert(jwt.gateway_id, jwt);
    }

    pub fn set_auth_config(&self, gateway_id: GatewayId, auth: GatewayAuthConfig) {
        self.auth_configs.insert(gateway_id, auth);
    }

    /// Scope and plugin type are unique together; rebinding replaces
    pub fn insert_plugin_binding(&self, binding: PluginBinding) {
        let mut bindings = self.plugin_bindings.entry(binding.gateway_id).or_default();
        bindings.retain(|b| !(b.scope == binding.scope && b.plugin_type == binding.plugin_type));
        bindings.push(binding);
    }

    pub fn insert_access_strategy_binding(&self, binding: AccessStrategyBinding) {
        let mut bindings = self
            .access_strategy_bindings
            .entry(binding.gateway_id)
            .or_default();
        bindings
            .retain(|b| !(b.scope == binding.scope && b.strategy_type == binding.strategy_type));
        bindings.push(binding);
    }
}

impl Default for InMemoryGatewayRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayRepository for InMemoryGatewayRepository {
    async fn get_gateway(&self, id: GatewayId) -> Result<Option<Gateway>> {
        Ok(self.gateways.get(&id).map(|g| g.clone()))
    }

    async fn list_active_gateways(&self) -> Result<Vec<Gateway>> {
        let mut gateways: Vec<Gateway> = self
            .gateways
            .iter()
            .filter(|g| g.is_active())
            .map(|g| g.value().clone())
            .collect();
        gateways.sort_by_key(|g| g.id);
        Ok(gateways)
    }

    async fn get_stage(&self, id: StageId) -> Result<Option<Stage>> {
        Ok(self.stages.get(&id).map(|s| s.clone()))
    }

    async fn list_stages(&self, gateway_id: GatewayId) -> Result<Vec<Stage>> {
        let mut stages: Vec<Stage> = self
            .stages
            .iter()
            .filter(|s| s.gateway_id == gateway_id)
            .map(|s| s.value().clone())
            .collect();
        stages.sort_by_key(|s| s.id);
        Ok(stages)
    }

    async fn update_stage(&self, stage: Stage) -> Result<()> {
        self.stages.insert(stage.id, stage);
        Ok(())
    }

    async fn list_backends(&self, gateway_id: GatewayId) -> Result<Vec<Backend>> {
        let mut backends = self
            .backends
            .get(&gateway_id)
            .map(|b| b.clone())
            .unwrap_or_default();
        backends.sort_by_key(|b| b.id);
        Ok(backends)
    }

    async fn list_backend_configs(&self, stage_id: StageId) -> Result<Vec<BackendConfig>> {
        let mut configs = self
            .backend_configs
            .get(&stage_id)
            .map(|c| c.clone())
            .unwrap_or_default();
        configs.sort_by_key(|c| c.backend_id);
        Ok(configs)
    }

    async fn get_resource_version(
        &self,
        id: ResourceVersionId,
    ) -> Result<Option<ResourceVersion>> {
        Ok(self.resource_versions.get(&id).map(|v| v.clone()))
    }

    async fn get_release(&self, stage_id: StageId) -> Result<Option<Release>> {
        Ok(self.releases.get(&stage_id).map(|r| r.clone()))
    }

    async fn upsert_release(&self, release: Release) -> Result<()> {
        self.releases.insert(release.stage_id, release);
        Ok(())
    }

    async fn delete_release(&self, stage_id: StageId) -> Result<bool> {
        Ok(self.releases.remove(&stage_id).is_some())
    }

    async fn get_jwt(&self, gateway_id: GatewayId) -> Result<Option<GatewayJwt>> {
        Ok(self.jwts.get(&gateway_id).map(|j| j.clone()))
    }

    async fn get_auth_config(&self, gateway_id: GatewayId) -> Result<Option<GatewayAuthConfig>> {
        Ok(self.auth_configs.get(&gateway_id).map(|a| a.clone()))
    }

    async fn list_plugin_bindings(&self, gateway_id: GatewayId) -> Result<Vec<PluginBinding>> {
        let mut bindings = self
            .plugin_bindings
            .get(&gateway_id)
            .map(|b| b.clone())
            .unwrap_or_default();
        bindings.sort_by_key(|b| b.id);
        Ok(bindings)
    }

    async fn list_access_strategy_bindings(
        &self,
        gateway_id: GatewayId,
    ) -> Result<Vec<AccessStrategyBinding>> {
        let mut bindings = self
            .access_strategy_bindings
            .get(&gateway_id)
            .map(|b| b.clone())
            .unwrap_or_default();
        bindings.sort_by_key(|b| b.id);
        Ok(bindings)
    }

    async fn get_micro_gateway(&self, id: MicroGatewayId) -> Result<Option<MicroGateway>> {
        Ok(self.micro_gateways.get(&id).map(|m| m.clone()))
    }

    async fn list_micro_gateways(&self) -> Result<Vec<MicroGateway>> {
        let mut micro_gateways: Vec<MicroGateway> = self
            .micro_gateways
            .iter()
            .map(|m| m.value().clone())
            .collect();
        micro_gateways.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(micro_gateways)
    }

    async fn upsert_micro_gateway(&self, micro_gateway: MicroGateway) -> Result<()> {
        self.micro_gateways.insert(micro_gateway.id, micro_gateway);
        Ok(())
    }

    async fn default_shared_micro_gateway(&self) -> Result<Option<MicroGateway>> {
        Ok(self
            .default_micro_gateway_id
            .and_then(|id| self.micro_gateways.get(&id).map(|m| m.clone())))
    }
}
