//! APIM Types - Core types for the gateway control plane
//!
//! The control plane turns a gateway's committed relational configuration
//! (stages, backends, resource versions, plugin bindings) into declarative
//! resource documents and hands them to the micro-gateway fleet.
//!
//! ## Key Concepts
//!
//! - **Gateway / Stage / Backend**: the relational desired state, read-only here
//! - **MicroGateway**: a proxy fleet instance that receives configuration
//! - **ResourceVersion**: immutable snapshot of a gateway's route definitions
//! - **DeclarativeResource**: the runtime document written to a registry
//! - **ReleaseHistory / PublishEvent**: audit trail of publish and revoke attempts

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod declarative;
pub mod gateway;
pub mod ids;
pub mod micro_gateway;
pub mod plugin;
pub mod release;
pub mod resource;

// Re-export main types
pub use declarative::{
    DeclarativeResource, GatewayConfigSpec, ParseResourceKindError, PluginEntry,
    PluginMetadataSpec, ResourceKind, ResourceMetadata, ResourceSpec, RouteSpec, ServiceNode,
    ServiceSpec, StageSpec, UpstreamTimeout,
};
pub use gateway::{
    Backend, BackendConfig, BackendConfigError, BackendConfigSpec, BackendHost, BackendTimeout,
    Gateway, GatewayAuthConfig, GatewayJwt, GatewayStatus, LoadBalance, Stage, StageStatus,
};
pub use ids::{
    BackendId, GatewayId, MicroGatewayId, PluginBindingId, PublishEventId, ReleaseHistoryId,
    ResourceId, ResourceVersionId, StageId,
};
pub use micro_gateway::{
    DeployTarget, MicroGateway, MicroGatewayConfig, MicroGatewayStatus,
    ParseMicroGatewayStatusError,
};
pub use plugin::{
    AccessStrategyBinding, AccessStrategyType, PluginBinding, PluginConfig, PluginScope,
};
pub use release::{
    EventStatus, PublishEvent, PublishSource, PublishStep, Release, ReleaseHistory, ReleaseStatus,
};
pub use resource::{ResourceDefinition, ResourceVersion};
