//! Gateway-global configuration shared by every stage of a gateway

use super::{baseline_plugins, Convertor, ConvertorConfig};
use crate::error::Result;
use crate::release_data::ReleaseData;
use apim_types::{
    DeclarativeResource, GatewayConfigSpec, PluginMetadataSpec, ResourceMetadata, ResourceSpec,
};
use serde_json::{json, Value};

pub struct GlobalConfigConvertor<'a> {
    data: &'a ReleaseData,
    config: &'a ConvertorConfig,
}

impl<'a> GlobalConfigConvertor<'a> {
    pub fn new(data: &'a ReleaseData, config: &'a ConvertorConfig) -> Self {
        Self { data, config }
    }

    /// Global resources are not stage-specific, so only the gateway label applies
    fn metadata(&self, name: String) -> ResourceMetadata {
        ResourceMetadata::new(name).with_label(
            format!("{}/gateway", self.config.labels_prefix),
            &self.data.gateway().name,
        )
    }

    fn plugin_metadata(&self, plugin: &str) -> Option<Value> {
        let gateway = self.data.gateway();
        match plugin {
            "opentelemetry" => Some(json!({
                "resource": { "service.name": format!("apim-{}", gateway.name) },
                "set_ngx_var": true,
            })),
            "jwt" => self.data.jwt().map(|jwt| {
                json!({
                    "public_key": jwt.public_key,
                    "algorithm": jwt.algorithm,
                })
            }),
            _ => None,
        }
    }
}

impl Convertor for GlobalConfigConvertor<'_> {
    fn convert(&self) -> Result<Vec<DeclarativeResource>> {
        let gateway = self.data.gateway();
        let jwt = self.data.jwt();

        let mut resources = vec![DeclarativeResource::new(
            format!("gateway-{}", gateway.id.get()),
            self.metadata(gateway.name.clone()),
            ResourceSpec::GatewayConfig(GatewayConfigSpec {
                gateway_name: gateway.name.clone(),
                jwt_public_key: jwt.map(|j| j.public_key.clone()),
                jwt_private_key: jwt.map(|j| j.private_key.clone()),
                jwt_algorithm: jwt.map(|j| j.algorithm.clone()),
                auth: self.data.auth_config().clone(),
            }),
        )];

        for plugin in baseline_plugins(self.config) {
            let Some(config) = self.plugin_metadata(plugin.name) else {
                continue;
            };
            resources.push(DeclarativeResource::new(
                format!("{}-{}", gateway.id.get(), plugin.name),
                self.metadata(format!("{}.{}", gateway.name, plugin.name)),
                ResourceSpec::PluginMetadata(PluginMetadataSpec {
                    plugin: plugin.name.to_string(),
                    config,
                }),
            ));
        }

        Ok(resources)
    }
}
