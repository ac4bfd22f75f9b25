//! Direct-write distribution: sync resources straight into a registry

use super::{DistributeOutcome, Distributor};
use crate::convertors::{convert_release, ConvertorConfig};
use crate::error::Result;
use crate::release_data::{ReleaseData, ReleaseTarget};
use crate::repository::{stage_served_by, GatewayRepository};
use apim_registry::{KeyPrefix, KvRegistry, KvStore, Registry};
use apim_types::{DeclarativeResource, Gateway, MicroGateway, Stage};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const GLOBAL_SEGMENT: &str = "_global";

/// Writes a stage's resources into the micro-gateway's key namespace.
///
/// Stage resources live under `{prefix}{gateway}/{stage}/`, gateway-global
/// resources under `{prefix}{gateway}/_global/`. The global namespace is
/// removed with the last stage of the gateway this micro-gateway serves.
pub struct DirectWriteDistributor {
    repo: Arc<dyn GatewayRepository>,
    store: Arc<dyn KvStore>,
    micro_gateway: MicroGateway,
    config: ConvertorConfig,
    include_gateway_global_config: bool,
}

impl DirectWriteDistributor {
    pub fn new(
        repo: Arc<dyn GatewayRepository>,
        store: Arc<dyn KvStore>,
        micro_gateway: MicroGateway,
        config: ConvertorConfig,
        include_gateway_global_config: bool,
    ) -> Self {
        Self {
            repo,
            store,
            micro_gateway,
            config,
            include_gateway_global_config,
        }
    }

    pub fn includes_global_config(&self) -> bool {
        self.include_gateway_global_config
    }

    pub fn stage_prefix(&self, gateway: &Gateway, stage: &Stage) -> KeyPrefix {
        KeyPrefix::new(&self.micro_gateway.config.key_prefix)
            .join(&gateway.name)
            .join(&stage.name)
    }

    pub fn global_prefix(&self, gateway: &Gateway) -> KeyPrefix {
        KeyPrefix::new(&self.micro_gateway.config.key_prefix)
            .join(&gateway.name)
            .join(GLOBAL_SEGMENT)
    }

    fn registry(&self, prefix: KeyPrefix) -> KvRegistry {
        KvRegistry::new(self.store.clone(), prefix)
    }

    /// Whether another active stage of the gateway is still served here
    async fn serves_other_stage(&self, target: &ReleaseTarget) -> Result<bool> {
        let default_id = self
            .repo
            .default_shared_micro_gateway()
            .await?
            .map(|mg| mg.id);
        Ok(self
            .repo
            .list_stages(target.gateway.id)
            .await?
            .iter()
            .any(|stage| {
                stage.id != target.stage.id
                    && stage_served_by(stage, &self.micro_gateway, default_id)
            }))
    }
}

fn describe_failed(failed: &[DeclarativeResource]) -> String {
    failed
        .iter()
        .map(|resource| resource.key_suffix())
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl Distributor for DirectWriteDistributor {
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
        // 1. Convert
        let converted = convert_release(data, &self.config, self.include_gateway_global_config)?;

        // 2. Sync the stage namespace
        let stage_registry = self.registry(self.stage_prefix(data.gateway(), data.stage()));
        let failed = stage_registry
            .sync_resources_by_key_prefix(&converted.stage_resources)
            .await?;
        if !failed.is_empty() {
            warn!(failed = failed.len(), "Stage resources not fully written");
            return Ok(DistributeOutcome::failed(format!(
                "{}: failed to write {}",
                self.micro_gateway.name,
                describe_failed(&failed)
            )));
        }

        // 3. Sync gateway-global configuration
        if self.include_gateway_global_config {
            let global_registry = self.registry(self.global_prefix(data.gateway()));
            let failed = global_registry
                .sync_resources_by_key_prefix(&converted.global_resources)
                .await?;
            if !failed.is_empty() {
                warn!(failed = failed.len(), "Global resources not fully written");
                return Ok(DistributeOutcome::failed(format!(
                    "{}: failed to write {}",
                    self.micro_gateway.name,
                    describe_failed(&failed)
                )));
            }
        }

        info!(resources = converted.len(), "Distributed by direct write");
        Ok(DistributeOutcome::ok(format!(
            "{}: {} resources written",
            self.micro_gateway.name,
            converted.len()
        )))
    }

    #[instrument(skip(self, target), fields(
        micro_gateway = %self.micro_gateway.name,
        gateway = %target.gateway.name,
        stage = %target.stage.name,
        publish_id = publish_id.unwrap_or("-"),
    ))]
    async fn revoke(
        &self,
        target: &ReleaseTarget,
        publish_id: Option<&str>,
    ) -> Result<DistributeOutcome> {
        // 1. Clear the stage namespace
        let registry = self.registry(self.stage_prefix(&target.gateway, &target.stage));
        let mut deleted = match registry.delete_resources_by_key_prefix().await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(error = %e, "Failed to revoke stage namespace");
                return Ok(DistributeOutcome::failed(format!(
                    "{}: {}",
                    self.micro_gateway.name, e
                )));
            }
        };

        // 2. Clear gateway-global configuration once no stage needs it
        if self.include_gateway_global_config && !self.serves_other_stage(target).await? {
            let registry = self.registry(self.global_prefix(&target.gateway));
            match registry.delete_resources_by_key_prefix().await {
                Ok(global) => {
                    info!(deleted = global, "Gateway-global namespace cleared");
                    deleted += global;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to clear gateway-global namespace");
                    return Ok(DistributeOutcome::failed(format!(
                        "{}: {}",
                        self.micro_gateway.name, e
                    )));
                }
            }
        }

        info!(deleted = deleted, "Revoked by direct write");
        Ok(DistributeOutcome::ok(format!(
            "{}: {} resources removed",
            self.micro_gateway.name, deleted
        )))
    }

    fn name(&self) -> &str {
        "direct-write"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convertors::fixtures;
    use crate::repository::InMemoryGatewayRepository;
    use apim_registry::InMemoryKvStore;
    use apim_types::{
        GatewayId, MicroGatewayConfig, MicroGatewayId, MicroGatewayStatus, StageId, StageStatus,
    };

    fn shared_fleet() -> MicroGateway {
        MicroGateway {
            id: MicroGatewayId::generate(),
            name: "shared".into(),
            gateway_id: GatewayId::new(100),
            is_shared: true,
            is_managed: true,
            status: MicroGatewayStatus::Installed,
            config: MicroGatewayConfig {
                key_prefix: "/apim/shared".into(),
                ..Default::default()
            },
        }
    }

    fn writer(
        repo: Arc<InMemoryGatewayRepository>,
        store: Arc<InMemoryKvStore>,
        fleet: MicroGateway,
        include_global: bool,
    ) -> DirectWriteDistributor {
        DirectWriteDistributor::new(repo, store, fleet, Default::default(), include_global)
    }

    async fn keys(store: &InMemoryKvStore, prefix: &str) -> Vec<String> {
        store
            .range(prefix)
            .await
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect()
    }

    #[tokio::test]
    async fn test_distribute_writes_stage_namespace_only() {
        let store = Arc::new(InMemoryKvStore::new());
        let repo = Arc::new(fixtures::repository(vec![fixtures::host("10.0.0.1:8080")]));
        let data = fixtures::load(&repo).await;
        let distributor = writer(repo, store.clone(), shared_fleet(), false);

        let outcome = distributor.distribute(&data, Some("p1")).await.unwrap();
        assert!(outcome.success, "{}", outcome.message);

        assert_eq!(
            keys(&store, "/apim/shared/").await,
            vec![
                "/apim/shared/demo/prod/route/3-11",
                "/apim/shared/demo/prod/route/3-12",
                "/apim/shared/demo/prod/service/3-1",
                "/apim/shared/demo/prod/stage/stage-3",
            ]
        );
    }

    #[tokio::test]
    async fn test_distribute_with_global_config() {
        let store = Arc::new(InMemoryKvStore::new());
        let repo = Arc::new(fixtures::repository(vec![fixtures::host("10.0.0.1:8080")]));
        let data = fixtures::load(&repo).await;
        let distributor = writer(repo, store.clone(), shared_fleet(), true);

        distributor.distribute(&data, None).await.unwrap();
        assert!(keys(&store, "/apim/shared/demo/_global/")
            .await
            .contains(&"/apim/shared/demo/_global/gateway_config/gateway-1".to_string()));
    }

    #[tokio::test]
    async fn test_revoke_of_last_stage_clears_global_namespace() {
        let store = Arc::new(InMemoryKvStore::new());
        let repo = Arc::new(fixtures::repository(vec![fixtures::host("10.0.0.1:8080")]));
        let data = fixtures::load(&repo).await;
        let distributor = writer(repo, store.clone(), shared_fleet(), true);
        distributor.distribute(&data, None).await.unwrap();

        let outcome = distributor.revoke(data.target(), None).await.unwrap();
        assert!(outcome.success);
        assert!(keys(&store, "/apim/shared/demo/prod/").await.is_empty());
        assert!(keys(&store, "/apim/shared/demo/_global/").await.is_empty());
    }

    #[tokio::test]
    async fn test_revoke_keeps_global_namespace_for_served_stage() {
        let store = Arc::new(InMemoryKvStore::new());
        let repo = Arc::new(fixtures::repository(vec![fixtures::host("10.0.0.1:8080")]));
        let fleet = shared_fleet();
        let mut staging = repo.get_stage(StageId::new(3)).await.unwrap().unwrap();
        staging.id = StageId::new(4);
        staging.name = "staging".into();
        staging.micro_gateway_id = Some(fleet.id);
        repo.insert_stage(staging.clone());

        let data = fixtures::load(&repo).await;
        let distributor = writer(repo.clone(), store.clone(), fleet, true);
        distributor.distribute(&data, None).await.unwrap();

        distributor.revoke(data.target(), None).await.unwrap();
        assert!(keys(&store, "/apim/shared/demo/prod/").await.is_empty());
        assert!(!keys(&store, "/apim/shared/demo/_global/").await.is_empty());

        // An inactive stage no longer holds the namespace
        staging.status = StageStatus::Inactive;
        repo.insert_stage(staging);
        distributor.revoke(data.target(), None).await.unwrap();
        assert!(keys(&store, "/apim/shared/demo/_global/").await.is_empty());
    }

    #[tokio::test]
    async fn test_conversion_error_propagates() {
        let store = Arc::new(InMemoryKvStore::new());
        let repo = Arc::new(fixtures::repository(Vec::new()));
        let data = fixtures::load(&repo).await;
        let distributor = writer(repo, store.clone(), shared_fleet(), false);

        assert!(distributor.distribute(&data, None).await.is_err());
        assert!(store.is_empty().await);
    }
}
