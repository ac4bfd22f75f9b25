//! Resource versions: immutable snapshots of a gateway's route definitions

use crate::{BackendId, GatewayId, ResourceId, ResourceVersionId};
use serde::{Deserialize, Serialize};

/// An immutable, versioned snapshot of a gateway's resources.
/// Created on publish and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceVersion {
    pub id: ResourceVersionId,
    pub gateway_id: GatewayId,

    /// Semantic version assigned at publish time
    pub version: semver::Version,

    #[serde(default)]
    pub title: String,

    pub created_at: chrono::DateTime<chrono::Utc>,

    #[serde(default)]
    pub created_by: String,

    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
}

/// A single route definition inside a resource version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub id: ResourceId,
    pub name: String,

    /// HTTP method, `ANY` matches every method
    pub method: String,

    /// Request path, may contain `{param}` segments
    pub path: String,

    /// Also match every path below `path`
    #[serde(default)]
    pub match_subpath: bool,

    pub backend_id: BackendId,

    /// Path sent to the backend; defaults to the request path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_path: Option<String>,

    /// Per-resource read timeout override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,

    #[serde(default)]
    pub enable_websocket: bool,
}

impl ResourceDefinition {
    /// Methods matched by the route; `ANY` expands to nothing (match all)
    pub fn methods(&self) -> Vec<String> {
        if self.method.eq_ignore_ascii_case("ANY") {
            Vec::new()
        } else {
            vec![self.method.to_ascii_uppercase()]
        }
    }
}
