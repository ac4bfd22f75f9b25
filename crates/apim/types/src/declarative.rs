//! Declarative resource documents consumed by the micro-gateway fleet
//!
//! Every document has a stable kind and id; together they form the registry
//! key suffix `{kind}/{id}`. The kind is derived from the spec variant, so a
//! document can never claim one kind while carrying another kind's payload.

use crate::GatewayAuthConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A typed runtime resource ready to be written to a registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclarativeResource {
    pub id: String,
    pub metadata: ResourceMetadata,

    #[serde(flatten)]
    pub spec: ResourceSpec,
}

impl DeclarativeResource {
    pub fn new(id: impl Into<String>, metadata: ResourceMetadata, spec: ResourceSpec) -> Self {
        Self {
            id: id.into(),
            metadata,
            spec,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// `{kind}/{id}`, appended to a registry key prefix
    pub fn key_suffix(&self) -> String {
        format!("{}/{}", self.kind(), self.id)
    }

    /// Serialized document as stored in the registry
    pub fn to_document(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_document(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub name: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ResourceMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Kinds of declarative resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Stage,
    Service,
    Route,
    PluginMetadata,
    GatewayConfig,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Stage,
        ResourceKind::Service,
        ResourceKind::Route,
        ResourceKind::PluginMetadata,
        ResourceKind::GatewayConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Stage => "stage",
            ResourceKind::Service => "service",
            ResourceKind::Route => "route",
            ResourceKind::PluginMetadata => "plugin_metadata",
            ResourceKind::GatewayConfig => "gateway_config",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind: {0}")]
pub struct ParseResourceKindError(String);

impl FromStr for ResourceKind {
    type Err = ParseResourceKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseResourceKindError(s.to_string()))
    }
}

/// Payload of a declarative resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec", rename_all = "snake_case")]
pub enum ResourceSpec {
    Stage(StageSpec),
    Service(ServiceSpec),
    Route(RouteSpec),
    PluginMetadata(PluginMetadataSpec),
    GatewayConfig(GatewayConfigSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Stage(_) => ResourceKind::Stage,
            ResourceSpec::Service(_) => ResourceKind::Service,
            ResourceSpec::Route(_) => ResourceKind::Route,
            ResourceSpec::PluginMetadata(_) => ResourceKind::PluginMetadata,
            ResourceSpec::GatewayConfig(_) => ResourceKind::GatewayConfig,
        }
    }
}

/// A plugin attached to a stage or route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEntry {
    pub name: String,

    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Every route of the stage is served below this prefix
    pub path_prefix: String,

    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Balancer understood by the runtime (`roundrobin`, `chash`, ...)
    pub load_balance: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_on_header: Option<String>,

    pub scheme: String,
    pub nodes: Vec<ServiceNode>,
    pub timeout: UpstreamTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTimeout {
    pub connect: u32,
    pub send: u32,
    pub read: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub name: String,
    pub uris: Vec<String>,

    /// Empty means every method
    #[serde(default)]
    pub methods: Vec<String>,

    pub service_id: String,
    pub stage_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<UpstreamTimeout>,

    #[serde(default)]
    pub enable_websocket: bool,

    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

/// Gateway-level metadata of a plugin type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadataSpec {
    pub plugin: String,

    #[serde(default)]
    pub config: Value,
}

/// Gateway-global configuration: signing keys and auth behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfigSpec {
    pub gateway_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_public_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_private_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_algorithm: Option<String>,

    #[serde(default)]
    pub auth: GatewayAuthConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_route() -> DeclarativeResource {
        DeclarativeResource::new(
            "3-12",
            ResourceMetadata::new("demo.prod.get_user").with_label("gateway", "demo"),
            ResourceSpec::Route(RouteSpec {
                name: "get_user".into(),
                uris: vec!["/prod/users/*".into()],
                methods: vec!["GET".into()],
                service_id: "3-1".into(),
                stage_id: "stage-3".into(),
                upstream_path: None,
                timeout: None,
                enable_websocket: false,
                plugins: Vec::new(),
            }),
        )
    }

    #[test]
    fn test_key_suffix_uses_kind_and_id() {
        assert_eq!(sample_route().key_suffix(), "route/3-12");
    }

    #[test]
    fn test_document_carries_kind_next_to_id() {
        let doc: Value = serde_json::from_slice(&sample_route().to_document().unwrap()).unwrap();
        assert_eq!(doc["kind"], "route");
        assert_eq!(doc["id"], "3-12");
        assert_eq!(doc["spec"]["service_id"], "3-1");
    }

    #[test]
    fn test_document_decodes_back() {
        let resource = sample_route();
        let bytes = resource.to_document().unwrap();
        assert_eq!(DeclarativeResource::from_document(&bytes).unwrap(), resource);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("plugin_metadata".parse(), Ok(ResourceKind::PluginMetadata));
        assert!("upstream".parse::<ResourceKind>().is_err());
    }
}
