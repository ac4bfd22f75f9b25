//! Stage convertor

use super::{baseline_plugins, Convertor, ConvertorConfig};
use crate::error::Result;
use crate::release_data::ReleaseData;
use apim_types::{DeclarativeResource, PluginEntry, ResourceSpec, StageId, StageSpec};
use serde_json::{json, Value};

/// Registry id of a stage resource
pub fn stage_resource_id(stage_id: StageId) -> String {
    format!("stage-{}", stage_id.get())
}

/// Emits the single `Stage` resource of a release
pub struct StageConvertor<'a> {
    data: &'a ReleaseData,
    config: &'a ConvertorConfig,
}

impl<'a> StageConvertor<'a> {
    pub fn new(data: &'a ReleaseData, config: &'a ConvertorConfig) -> Self {
        Self { data, config }
    }

    /// Default configuration of a baseline plugin for this gateway.
    /// `None` skips the plugin.
    fn baseline_config(&self, name: &str) -> Option<Value> {
        let auth = self.data.auth_config();
        match name {
            "opentelemetry" => Some(json!({ "sampler": { "name": "parent_base" } })),
            "request-id" => Some(json!({
                "header_name": "X-Request-Id",
                "include_in_response": true,
            })),
            "auth-verify" => Some(json!({
                "allow_auth_from_params": auth.allow_auth_from_params,
            })),
            // Backends can only verify signed requests when key material exists
            "jwt" => self
                .data
                .jwt()
                .map(|jwt| json!({ "algorithm": jwt.algorithm })),
            "delete-sensitive" => Some(json!({
                "enabled": auth.allow_delete_sensitive_params,
                "unfiltered_keys": auth.unfiltered_sensitive_keys,
            })),
            "concurrency-limit" => Some(json!({ "max_concurrency": 1000 })),
            "permission" => Some(json!({})),
            _ => None,
        }
    }

    fn plugins(&self) -> Vec<PluginEntry> {
        let mut plugins: Vec<PluginEntry> = baseline_plugins(self.config)
            .filter_map(|plugin| {
                self.baseline_config(plugin.name).map(|config| PluginEntry {
                    name: plugin.name.to_string(),
                    config,
                })
            })
            .collect();

        // A bound plugin replaces the baseline entry of the same type in place
        for bound in self.data.stage_plugins() {
            match plugins.iter_mut().find(|entry| entry.name == bound.name) {
                Some(entry) => entry.config = bound.config.clone(),
                None => plugins.push(PluginEntry {
                    name: bound.name.clone(),
                    config: bound.config.clone(),
                }),
            }
        }

        plugins
    }
}

impl Convertor for StageConvertor<'_> {
    fn convert(&self) -> Result<Vec<DeclarativeResource>> {
        let stage = self.data.stage();
        let gateway = self.data.gateway();

        let spec = StageSpec {
            name: stage.name.clone(),
            description: stage.description.clone(),
            path_prefix: format!("/{}", stage.name),
            vars: stage.vars.clone(),
            plugins: self.plugins(),
        };

        Ok(vec![DeclarativeResource::new(
            stage_resource_id(stage.id),
            self.config
                .metadata(self.data, format!("{}.{}", gateway.name, stage.name)),
            ResourceSpec::Stage(spec),
        )])
    }
}
