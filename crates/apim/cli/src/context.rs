//! Control-plane wiring shared by every command

use crate::config::{CliConfig, RegistryBackend};
use crate::error::{CliError, CliResult};
use crate::state::StateFile;
use apim_controller::{
    ChartRepository, CombineDistributor, ControllerError, ConvertorConfig, DeployTool,
    GatewayRepository, HttpDeployTool, InMemoryChartRepository, InMemoryDeployTool,
    InMemoryGatewayRepository, InMemoryReleaseHistoryStore, InMemoryReleaseLock, ReleaseLocker,
    ReleaseOrchestrator, ReleaseTrigger, RollingUpdater,
};
use apim_registry::{EtcdConnector, InMemoryConnector, InMemoryKvStore, KvConnector, KvStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Handles built once per invocation and passed to commands
pub struct Context {
    pub config: CliConfig,
    pub repo: Arc<InMemoryGatewayRepository>,
    pub history: Arc<InMemoryReleaseHistoryStore>,
    pub connector: Arc<dyn KvConnector>,
    pub store: Arc<dyn KvStore>,
    memory_store: Option<Arc<InMemoryKvStore>>,
    lock: Arc<InMemoryReleaseLock>,
    deploy_tool: Arc<dyn DeployTool>,
    chart_repository: Arc<dyn ChartRepository>,
    convertor: ConvertorConfig,
}

impl Context {
    pub async fn build(config: CliConfig) -> CliResult<Self> {
        let convertor = config
            .release
            .convertor()
            .map_err(|e| CliError::Config(format!("Invalid runtime version: {}", e)))?;

        // 1. Stored gateway data and history
        let state = StateFile::load(&config.state_file)?;
        let repo = Arc::new(InMemoryGatewayRepository::from_snapshot(
            state.repository.clone(),
        ));
        let history = Arc::new(InMemoryReleaseHistoryStore::from_snapshot(
            state.history.clone(),
        ));

        // 2. Registry store
        let mut memory_store = None;
        let connector: Arc<dyn KvConnector> = match config.registry.backend {
            RegistryBackend::Memory => {
                let store = Arc::new(InMemoryKvStore::new());
                state.restore_registry(store.as_ref()).await?;
                memory_store = Some(store.clone());
                Arc::new(InMemoryConnector::new(store))
            }
            RegistryBackend::Etcd => Arc::new(EtcdConnector::new(
                config.registry.endpoint.clone(),
                Duration::from_secs(config.registry.timeout_secs),
            )),
        };
        let store = connector.connect()?;
        info!(backend = store.name(), "Registry connected");

        // 3. Deploy API
        let deploy_tool: Arc<dyn DeployTool>;
        let chart_repository: Arc<dyn ChartRepository>;
        match &config.deploy.api_url {
            Some(url) => {
                let timeout = Duration::from_secs(config.deploy.timeout_secs);
                let tool = Arc::new(
                    HttpDeployTool::new(url.clone(), timeout).map_err(ControllerError::from)?,
                );
                deploy_tool = tool.clone();
                chart_repository = tool;
            }
            None => {
                warn!("No deploy API configured, package deploys are recorded in memory only");
                deploy_tool = Arc::new(InMemoryDeployTool::new());
                chart_repository = Arc::new(InMemoryChartRepository::new());
            }
        }

        Ok(Self {
            config,
            repo,
            history,
            connector,
            store,
            memory_store,
            lock: Arc::new(InMemoryReleaseLock::new()),
            deploy_tool,
            chart_repository,
            convertor,
        })
    }

    pub fn convertor(&self) -> &ConvertorConfig {
        &self.convertor
    }

    pub fn operator(&self) -> &str {
        &self.config.release.operator
    }

    pub fn combine(&self) -> CombineDistributor {
        CombineDistributor::new(
            self.repo.clone(),
            self.store.clone(),
            self.deploy_tool.clone(),
            self.chart_repository.clone(),
            self.convertor.clone(),
            self.operator(),
        )
    }

    pub fn orchestrator(&self) -> ReleaseOrchestrator {
        let locker = ReleaseLocker::new(self.lock.clone(), self.config.release.lock());
        ReleaseOrchestrator::new(
            self.repo.clone(),
            self.history.clone(),
            locker,
            Arc::new(self.combine()),
            self.convertor.clone(),
        )
    }

    /// Trigger for synchronous releases; nothing consumes the queue
    pub fn trigger(&self) -> ReleaseTrigger {
        let (trigger, _jobs) = ReleaseTrigger::new(self.orchestrator(), 1);
        trigger
    }

    pub fn rolling_updater(&self) -> RollingUpdater {
        RollingUpdater::new(
            self.orchestrator(),
            Arc::new(self.combine()),
            self.connector.clone(),
            self.config.release.rolling_update(),
        )
    }

    pub fn repository(&self) -> &dyn GatewayRepository {
        self.repo.as_ref()
    }

    /// Persist gateway data, history and the memory registry
    pub async fn save(&self) -> CliResult<()> {
        let mut state = StateFile {
            repository: self.repo.snapshot(),
            history: self.history.snapshot(),
            ..StateFile::default()
        };
        if let Some(store) = &self.memory_store {
            state.capture_registry(store.as_ref()).await?;
        }
        state.save(&self.config.state_file)
    }
}
