//! APIM Controller - Release orchestration for the micro-gateway fleet
//!
//! A release turns a stage's committed configuration into declarative
//! resources and delivers them to whichever micro-gateways serve the stage.
//!
//! ## Pipeline
//!
//! ```text
//! ReleaseData ─► convertors ─► CombineDistributor ─┬─► DirectWriteDistributor ─► Registry
//!                                                  └─► PackageDeployDistributor ─► DeployTool
//! ```
//!
//! [`ReleaseOrchestrator`] wraps the pipeline in a per-stage lock and records
//! a [`apim_types::ReleaseHistory`] with one publish event per step.
//! [`ReleaseTrigger`] runs releases inline or queues them for a
//! [`ReleaseWorker`]; [`RollingUpdater`] re-publishes a whole fleet.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod convertors;
pub mod deploy;
pub mod distributor;
pub mod error;
pub mod history;
pub mod lock;
pub mod orchestrator;
pub mod provision;
pub mod release_data;
pub mod repository;
pub mod rolling;
pub mod trigger;

// Re-exports
pub use convertors::{convert_release, ConvertedRelease, Convertor, ConvertorConfig};
pub use deploy::{
    ChartPackage, ChartRef, ChartRepository, DeployRequest, DeployResult, DeployTool,
    HttpDeployTool, InMemoryChartRepository, InMemoryDeployTool,
};
pub use distributor::{
    CombineDistributor, DirectWriteDistributor, DistributeOutcome, DistributionMethod,
    DistributionTarget, Distributor, PackageDeployDistributor,
};
pub use error::{ControllerError, DeployError, Result};
pub use history::{HistorySnapshot, InMemoryReleaseHistoryStore, ReleaseHistoryStore};
pub use lock::{
    InMemoryReleaseLock, LockConfig, LockMode, ReleaseLock, ReleaseLockGuard, ReleaseLocker,
};
pub use orchestrator::{PublishRequest, ReleaseOrchestrator, RevokeRequest};
pub use provision::{CreateWay, MicroGatewayProvisioner, ProvisionRequest};
pub use release_data::{ReleaseData, ReleaseTarget};
pub use repository::{
    stage_served_by, GatewayRepository, InMemoryGatewayRepository, RepositorySnapshot,
};
pub use rolling::{RollingUpdateConfig, RollingUpdateReport, RollingUpdater};
pub use trigger::{ReleaseJob, ReleaseTrigger, ReleaseWorker};
