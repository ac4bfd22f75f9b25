#![allow(dead_code)]

use apim_controller::{
    CombineDistributor, ConvertorConfig, GatewayRepository, InMemoryChartRepository,
    InMemoryDeployTool, InMemoryGatewayRepository, InMemoryReleaseHistoryStore,
    InMemoryReleaseLock, LockConfig, ReleaseJob, ReleaseLocker, ReleaseOrchestrator,
    ReleaseTrigger,
};
use apim_registry::{InMemoryConnector, InMemoryKvStore, KvStore};
use apim_types::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const SHARED_PREFIX: &str = "/apim/shared";

/// A control plane wired entirely in memory, with a default shared fleet
pub struct World {
    pub repo: Arc<InMemoryGatewayRepository>,
    pub store: Arc<InMemoryKvStore>,
    pub deploy_tool: Arc<InMemoryDeployTool>,
    pub charts: Arc<InMemoryChartRepository>,
    pub history: Arc<InMemoryReleaseHistoryStore>,
    pub lock: Arc<InMemoryReleaseLock>,
    pub shared: MicroGateway,
}

pub struct SeededGateway {
    pub gateway_id: GatewayId,
    pub stage_id: StageId,
    pub backend_id: BackendId,
    pub version_id: ResourceVersionId,
    pub name: String,
}

pub fn host(host: &str) -> BackendHost {
    BackendHost {
        scheme: "http".into(),
        host: host.into(),
        weight: 100,
    }
}

pub fn micro_gateway(name: &str, is_shared: bool, is_managed: bool) -> MicroGateway {
    MicroGateway {
        id: MicroGatewayId::generate(),
        name: name.into(),
        gateway_id: GatewayId::new(999),
        is_shared,
        is_managed,
        status: MicroGatewayStatus::Installed,
        config: MicroGatewayConfig {
            key_prefix: format!("/apim/{name}"),
            deploy: is_managed.then(|| DeployTarget {
                cluster_id: "cluster-1".into(),
                namespace: "apim".into(),
                release_name: name.into(),
                chart_name: "micro-gateway".into(),
                chart_version: "1.4.0".into(),
            }),
            http_url: None,
            edition: "3.13".into(),
        },
    }
}

impl World {
    pub async fn new() -> Self {
        let mut shared = micro_gateway("shared", true, true);
        shared.config.key_prefix = SHARED_PREFIX.into();
        Self::with_repository(
            InMemoryGatewayRepository::new().with_default_micro_gateway(shared.id),
            shared,
        )
        .await
    }

    /// A world whose default shared fleet id points at nothing
    pub async fn without_default_fleet() -> Self {
        let mut shared = micro_gateway("shared", true, true);
        shared.config.key_prefix = SHARED_PREFIX.into();
        Self::with_repository(InMemoryGatewayRepository::new(), shared).await
    }

    async fn with_repository(repo: InMemoryGatewayRepository, shared: MicroGateway) -> Self {
        let repo = Arc::new(repo);
        repo.upsert_micro_gateway(shared.clone())
            .await
            .expect("micro-gateway should be stored");
        Self {
            repo,
            store: Arc::new(InMemoryKvStore::new()),
            deploy_tool: Arc::new(InMemoryDeployTool::new()),
            charts: Arc::new(InMemoryChartRepository::new()),
            history: Arc::new(InMemoryReleaseHistoryStore::new()),
            lock: Arc::new(InMemoryReleaseLock::new()),
            shared,
        }
    }

    /// Gateway `name` with stage `prod`, backend `users` and one resource.
    ///
    /// Ids derive from `n`: gateway `n`, stage `n*10+1`, backend `n*10+2`,
    /// version `n*100`, resource `n*1000`.
    pub fn add_gateway(&self, n: i64, name: &str, hosts: Vec<BackendHost>) -> SeededGateway {
        let gateway_id = GatewayId::new(n);
        let stage_id = StageId::new(n * 10 + 1);
        let backend_id = BackendId::new(n * 10 + 2);
        let version_id = ResourceVersionId::new(n * 100);

        self.repo.insert_gateway(Gateway {
            id: gateway_id,
            name: name.into(),
            tenant_id: "default".into(),
            status: GatewayStatus::Active,
            maintainers: vec!["admin".into()],
        });
        self.repo.insert_stage(Stage {
            id: stage_id,
            gateway_id,
            name: "prod".into(),
            description: String::new(),
            status: StageStatus::Active,
            micro_gateway_id: None,
            vars: BTreeMap::new(),
        });
        self.repo.insert_backend(Backend {
            id: backend_id,
            gateway_id,
            name: "users".into(),
            description: String::new(),
        });
        self.set_hosts(stage_id, backend_id, hosts);
        self.repo.insert_resource_version(ResourceVersion {
            id: version_id,
            gateway_id,
            version: semver::Version::new(1, 0, 0),
            title: "initial".into(),
            created_at: chrono::Utc::now(),
            created_by: "admin".into(),
            resources: vec![ResourceDefinition {
                id: ResourceId::new(n * 1000),
                name: "get_user".into(),
                method: "GET".into(),
                path: "/users/{id}/".into(),
                match_subpath: false,
                backend_id,
                upstream_path: None,
                timeout: None,
                enable_websocket: false,
            }],
        });

        SeededGateway {
            gateway_id,
            stage_id,
            backend_id,
            version_id,
            name: name.into(),
        }
    }

    /// Another active stage of a seeded gateway, its backend pointed at `hosts`
    pub fn add_stage(
        &self,
        seeded: &SeededGateway,
        id: i64,
        name: &str,
        hosts: Vec<BackendHost>,
    ) -> StageId {
        let stage_id = StageId::new(id);
        self.repo.insert_stage(Stage {
            id: stage_id,
            gateway_id: seeded.gateway_id,
            name: name.into(),
            description: String::new(),
            status: StageStatus::Active,
            micro_gateway_id: None,
            vars: BTreeMap::new(),
        });
        self.set_hosts(stage_id, seeded.backend_id, hosts);
        stage_id
    }

    pub fn set_hosts(&self, stage_id: StageId, backend_id: BackendId, hosts: Vec<BackendHost>) {
        self.repo.insert_backend_config(BackendConfig {
            backend_id,
            stage_id,
            config: BackendConfigSpec {
                load_balance: LoadBalance::RoundRobin,
                timeout: BackendTimeout::default(),
                hosts,
                hash_on_header: None,
            },
        });
    }

    pub async fn assign(&self, stage_id: StageId, micro_gateway: &MicroGateway) {
        let mut stage = self
            .repo
            .get_stage(stage_id)
            .await
            .expect("stage lookup should work")
            .expect("stage should exist");
        stage.micro_gateway_id = Some(micro_gateway.id);
        self.repo.insert_stage(stage);
    }

    pub async fn add_micro_gateway(&self, micro_gateway: MicroGateway) -> MicroGateway {
        self.repo
            .upsert_micro_gateway(micro_gateway.clone())
            .await
            .expect("micro-gateway should be stored");
        micro_gateway
    }

    /// Point the stage at a version without running a release
    pub async fn seed_release(&self, seeded: &SeededGateway) {
        self.repo
            .upsert_release(Release {
                gateway_id: seeded.gateway_id,
                stage_id: seeded.stage_id,
                resource_version_id: seeded.version_id,
                updated_by: "seed".into(),
                updated_at: chrono::Utc::now(),
            })
            .await
            .expect("release should be stored");
    }

    pub fn combine(&self) -> CombineDistributor {
        CombineDistributor::new(
            self.repo.clone(),
            self.store.clone(),
            self.deploy_tool.clone(),
            self.charts.clone(),
            ConvertorConfig::default(),
            "admin",
        )
    }

    pub fn locker(&self) -> ReleaseLocker {
        ReleaseLocker::new(
            self.lock.clone(),
            LockConfig {
                retry_times: 3,
                retry_interval: Duration::from_millis(10),
            },
        )
    }

    pub fn orchestrator(&self) -> ReleaseOrchestrator {
        ReleaseOrchestrator::new(
            self.repo.clone(),
            self.history.clone(),
            self.locker(),
            Arc::new(self.combine()),
            ConvertorConfig::default(),
        )
    }

    pub fn trigger(&self) -> (ReleaseTrigger, mpsc::Receiver<ReleaseJob>) {
        ReleaseTrigger::new(self.orchestrator(), 16)
    }

    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector::new(self.store.clone())
    }

    pub async fn keys(&self, prefix: &str) -> Vec<String> {
        self.store
            .range(prefix)
            .await
            .expect("range should work")
            .into_iter()
            .map(|kv| kv.key)
            .collect()
    }
}
