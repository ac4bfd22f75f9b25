//! Convertors: release data to declarative resources
//!
//! Convertors are pure and synchronous. The same snapshot and config always
//! produce the same resources in the same order, so a resync of an
//! unchanged stage writes nothing.

mod global;
mod protocol;
mod service;
mod stage;

pub use global::GlobalConfigConvertor;
pub use protocol::{HttpRouteConvertor, ProtocolConvertor};
pub use service::{service_id, ServiceConvertor};
pub use stage::{stage_resource_id, StageConvertor};

use crate::error::Result;
use crate::release_data::ReleaseData;
use apim_types::{DeclarativeResource, ResourceMetadata, UpstreamTimeout};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Turns release data into declarative resources
pub trait Convertor {
    fn convert(&self) -> Result<Vec<DeclarativeResource>>;
}

/// Settings shared by all convertors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertorConfig {
    /// Proxy runtime version; gates which baseline plugins are emitted
    pub runtime_version: Version,

    /// Prefix of the labels stamped on every resource
    pub labels_prefix: String,

    /// Upstream timeout used when a backend config does not set one
    pub default_timeout_secs: u32,
}

impl Default for ConvertorConfig {
    fn default() -> Self {
        Self {
            runtime_version: Version::new(3, 13, 0),
            labels_prefix: "gateway.apim.io".to_string(),
            default_timeout_secs: 60,
        }
    }
}

impl ConvertorConfig {
    pub(crate) fn metadata(&self, data: &ReleaseData, name: impl Into<String>) -> ResourceMetadata {
        ResourceMetadata::new(name)
            .with_label(format!("{}/gateway", self.labels_prefix), &data.gateway().name)
            .with_label(format!("{}/stage", self.labels_prefix), &data.stage().name)
    }

    pub(crate) fn uniform_timeout(&self, secs: u32) -> UpstreamTimeout {
        let secs = if secs == 0 {
            self.default_timeout_secs
        } else {
            secs
        };
        UpstreamTimeout {
            connect: secs,
            send: secs,
            read: secs,
        }
    }
}

/// A plugin every stage carries, emitted only on runtimes that ship it
#[derive(Debug)]
pub(crate) struct BaselinePlugin {
    pub name: &'static str,
    pub min_version: Version,
}

pub(crate) static BASELINE_PLUGINS: [BaselinePlugin; 7] = [
    BaselinePlugin {
        name: "opentelemetry",
        min_version: Version::new(3, 2, 0),
    },
    BaselinePlugin {
        name: "request-id",
        min_version: Version::new(3, 0, 0),
    },
    BaselinePlugin {
        name: "auth-verify",
        min_version: Version::new(3, 2, 0),
    },
    BaselinePlugin {
        name: "jwt",
        min_version: Version::new(3, 2, 0),
    },
    BaselinePlugin {
        name: "delete-sensitive",
        min_version: Version::new(3, 2, 0),
    },
    BaselinePlugin {
        name: "concurrency-limit",
        min_version: Version::new(3, 13, 0),
    },
    BaselinePlugin {
        name: "permission",
        min_version: Version::new(3, 2, 0),
    },
];

pub(crate) fn baseline_plugins(
    config: &ConvertorConfig,
) -> impl Iterator<Item = &'static BaselinePlugin> + '_ {
    BASELINE_PLUGINS
        .iter()
        .filter(move |plugin| config.runtime_version >= plugin.min_version)
}

/// Resources produced for one release
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertedRelease {
    /// Written to the stage namespace
    pub stage_resources: Vec<DeclarativeResource>,

    /// Written to the gateway-global namespace; empty unless requested
    pub global_resources: Vec<DeclarativeResource>,
}

impl ConvertedRelease {
    pub fn len(&self) -> usize {
        self.stage_resources.len() + self.global_resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeclarativeResource> {
        self.stage_resources.iter().chain(self.global_resources.iter())
    }
}

/// Run every convertor over a snapshot: stage, services, routes and,
/// when `include_global`, the gateway-global configuration.
pub fn convert_release(
    data: &ReleaseData,
    config: &ConvertorConfig,
    include_global: bool,
) -> Result<ConvertedRelease> {
    let mut stage_resources = StageConvertor::new(data, config).convert()?;
    stage_resources.extend(ServiceConvertor::new(data, config).convert()?);
    stage_resources.extend(HttpRouteConvertor::new(data, config).convert()?);

    let global_resources = if include_global {
        GlobalConfigConvertor::new(data, config).convert()?
    } else {
        Vec::new()
    };

    Ok(ConvertedRelease {
        stage_resources,
        global_resources,
    })
}
