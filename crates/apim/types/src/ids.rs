//! Strongly-typed identifiers for APIM entities
//!
//! Relational entities (gateways, stages, backends, resources) carry the
//! integer primary keys of the upstream management database. Entities owned
//! by the control plane itself (micro-gateways, release histories, publish
//! events) are UUID-based. All of them are newtypes for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! relational_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Raw database key, used when composing registry ids
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

relational_id!(
    /// Identifier of a gateway
    GatewayId,
    "gateway"
);
relational_id!(
    /// Identifier of a stage (deployment environment) of a gateway
    StageId,
    "stage"
);
relational_id!(
    /// Identifier of a logical backend service
    BackendId,
    "backend"
);
relational_id!(
    /// Identifier of a resource (route) definition
    ResourceId,
    "resource"
);
relational_id!(
    /// Identifier of an immutable resource version
    ResourceVersionId,
    "version"
);
relational_id!(
    /// Identifier of a plugin or access-strategy binding
    PluginBindingId,
    "binding"
);

/// Unique identifier for a micro-gateway (proxy fleet instance)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MicroGatewayId(Uuid);

impl MicroGatewayId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for MicroGatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "micro-gateway:{}", self.0)
    }
}

/// Unique identifier for a release history record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseHistoryId(Uuid);

impl ReleaseHistoryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ReleaseHistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "release:{}", self.0)
    }
}

/// Unique identifier for a publish event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishEventId(Uuid);

impl PublishEventId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PublishEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event:{}", self.0)
    }
}
