//! Micro-gateway (proxy fleet instance) types

use crate::{GatewayId, MicroGatewayId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A proxy fleet instance that enforces distributed configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroGateway {
    pub id: MicroGatewayId,
    pub name: String,

    /// Gateway that owns this instance. Shared instances are owned by the
    /// platform gateway but serve every tenant.
    pub gateway_id: GatewayId,

    /// Serves many gateways from one namespace
    #[serde(default)]
    pub is_shared: bool,

    /// Deployed and lifecycle-controlled by this platform
    #[serde(default)]
    pub is_managed: bool,

    #[serde(default)]
    pub status: MicroGatewayStatus,

    pub config: MicroGatewayConfig,
}

impl MicroGateway {
    /// Dedicated instances serve exactly one gateway
    pub fn is_dedicated(&self) -> bool {
        !self.is_shared
    }
}

/// Connection and deployment metadata of a micro-gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MicroGatewayConfig {
    /// Registry namespace owned exclusively by this instance
    pub key_prefix: String,

    /// Cluster package target for managed instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeployTarget>,

    /// Public entry URL of the proxy fleet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_url: Option<String>,

    /// Proxy runtime edition, informational
    #[serde(default)]
    pub edition: String,
}

/// Where and how a managed micro-gateway is deployed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTarget {
    pub cluster_id: String,
    pub namespace: String,
    pub release_name: String,
    pub chart_name: String,
    pub chart_version: String,
}

/// Micro-gateway lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicroGatewayStatus {
    #[default]
    Pending,
    Installing,
    Installed,
    Updated,
    Abnormal,
}

impl MicroGatewayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MicroGatewayStatus::Pending => "pending",
            MicroGatewayStatus::Installing => "installing",
            MicroGatewayStatus::Installed => "installed",
            MicroGatewayStatus::Updated => "updated",
            MicroGatewayStatus::Abnormal => "abnormal",
        }
    }

    /// Whether the instance is up and can receive configuration
    pub fn is_serving(&self) -> bool {
        matches!(
            self,
            MicroGatewayStatus::Installed | MicroGatewayStatus::Updated
        )
    }
}

impl fmt::Display for MicroGatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown micro-gateway status: {0}")]
pub struct ParseMicroGatewayStatusError(String);

impl FromStr for MicroGatewayStatus {
    type Err = ParseMicroGatewayStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(MicroGatewayStatus::Pending),
            "installing" => Ok(MicroGatewayStatus::Installing),
            "installed" => Ok(MicroGatewayStatus::Installed),
            "updated" => Ok(MicroGatewayStatus::Updated),
            "abnormal" => Ok(MicroGatewayStatus::Abnormal),
            other => Err(ParseMicroGatewayStatusError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            MicroGatewayStatus::Pending,
            MicroGatewayStatus::Installing,
            MicroGatewayStatus::Installed,
            MicroGatewayStatus::Updated,
            MicroGatewayStatus::Abnormal,
        ] {
            assert_eq!(status.as_str().parse::<MicroGatewayStatus>(), Ok(status));
        }
        assert!("broken".parse::<MicroGatewayStatus>().is_err());
    }

    #[test]
    fn test_serving_statuses() {
        assert!(MicroGatewayStatus::Installed.is_serving());
        assert!(!MicroGatewayStatus::Installing.is_serving());
    }
}
