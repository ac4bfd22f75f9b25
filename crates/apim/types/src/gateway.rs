//! Gateway-side relational records
//!
//! These are read-only snapshots of what the management layer has committed.
//! The control plane never edits them except for the few operational fields
//! touched by `apimctl` (stage status and micro-gateway binding).

use crate::{BackendId, GatewayId, MicroGatewayId, StageId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A tenant-scoped API gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    /// Immutable identifier
    pub id: GatewayId,

    /// Unique gateway name
    pub name: String,

    /// Owning tenant
    #[serde(default)]
    pub tenant_id: String,

    /// Activation status
    #[serde(default)]
    pub status: GatewayStatus,

    /// Maintainers, informational only
    #[serde(default)]
    pub maintainers: Vec<String>,
}

impl Gateway {
    pub fn is_active(&self) -> bool {
        self.status == GatewayStatus::Active
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    #[default]
    Active,
    Inactive,
}

/// A named deployment environment of a gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub gateway_id: GatewayId,
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: StageStatus,

    /// Micro-gateway explicitly assigned to this stage, if any.
    /// Unassigned stages are served by the default shared fleet.
    #[serde(default)]
    pub micro_gateway_id: Option<MicroGatewayId>,

    /// Environment variables exposed to route templates
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl Stage {
    pub fn is_active(&self) -> bool {
        self.status == StageStatus::Active
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Active,
    Inactive,
}

/// A logical upstream service of a gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    pub id: BackendId,
    pub gateway_id: GatewayId,
    pub name: String,

    #[serde(default)]
    pub description: String,
}

/// Per-stage connection parameters of a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub backend_id: BackendId,
    pub stage_id: StageId,
    pub config: BackendConfigSpec,
}

/// Connection parameters for one backend on one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfigSpec {
    #[serde(default)]
    pub load_balance: LoadBalance,

    #[serde(default)]
    pub timeout: BackendTimeout,

    #[serde(default)]
    pub hosts: Vec<BackendHost>,

    /// Header used to compute the hash when `load_balance` is `chash`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_on_header: Option<String>,
}

impl BackendConfigSpec {
    /// Structural validation of the hosts list.
    ///
    /// An empty list is reported separately by the service convertor, since
    /// it is the one situation where the backend simply cannot be reached.
    pub fn validate(&self) -> Result<(), BackendConfigError> {
        for host in &self.hosts {
            if host.host.trim().is_empty() {
                return Err(BackendConfigError::EmptyHost);
            }
            if !matches!(host.scheme.as_str(), "http" | "https" | "grpc" | "grpcs") {
                return Err(BackendConfigError::InvalidScheme(host.scheme.clone()));
            }
            if self.load_balance == LoadBalance::WeightedRoundRobin && host.weight == 0 {
                return Err(BackendConfigError::ZeroWeight(host.host.clone()));
            }
        }

        if self.load_balance == LoadBalance::Chash && self.hash_on_header.is_none() {
            return Err(BackendConfigError::MissingHashKey);
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalance {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    Chash,
    LeastConn,
}

impl LoadBalance {
    /// Balancer name understood by the proxy runtime
    pub fn runtime_name(&self) -> &'static str {
        match self {
            LoadBalance::RoundRobin | LoadBalance::WeightedRoundRobin => "roundrobin",
            LoadBalance::Chash => "chash",
            LoadBalance::LeastConn => "least_conn",
        }
    }
}

/// Upstream timeouts in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTimeout {
    pub connect: u32,
    pub send: u32,
    pub read: u32,
}

impl Default for BackendTimeout {
    fn default() -> Self {
        Self {
            connect: 60,
            send: 60,
            read: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHost {
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// `host[:port]`
    pub host: String,

    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_weight() -> u32 {
    100
}

/// Backend configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendConfigError {
    #[error("host cannot be empty")]
    EmptyHost,

    #[error("unsupported scheme: {0}")]
    InvalidScheme(String),

    #[error("host {0} has zero weight under weighted round robin")]
    ZeroWeight(String),

    #[error("chash load balancing requires hash_on_header")]
    MissingHashKey,
}

/// Signing key material of a gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayJwt {
    pub gateway_id: GatewayId,

    /// PEM encoded private key used by the proxy to sign backend JWTs
    pub private_key: String,

    /// PEM encoded public key handed to backends for verification
    pub public_key: String,

    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
}

fn default_jwt_algorithm() -> String {
    "RS512".to_string()
}

/// Gateway level authentication behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayAuthConfig {
    /// Accept credentials passed in query/body parameters
    #[serde(default)]
    pub allow_auth_from_params: bool,

    /// Strip credential parameters before proxying
    #[serde(default = "default_true")]
    pub allow_delete_sensitive_params: bool,

    /// Sensitive keys that must be forwarded untouched
    #[serde(default)]
    pub unfiltered_sensitive_keys: Vec<String>,

    /// Free-form user authentication settings
    #[serde(default)]
    pub user_conf: serde_json::Value,
}

fn default_true() -> bool {
    true
}
