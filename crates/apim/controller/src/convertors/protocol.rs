//! Protocol convertors turn resource definitions into routes

use super::{service_id, stage_resource_id, Convertor, ConvertorConfig};
use crate::error::{ControllerError, Result};
use crate::release_data::ReleaseData;
use apim_types::{
    DeclarativeResource, GatewayId, PluginEntry, ResourceDefinition, ResourceSpec, RouteSpec,
    StageId,
};

/// A convertor for one client-facing protocol.
///
/// Implementors supply `convert`; identity accessors come from the snapshot.
pub trait ProtocolConvertor: Convertor {
    fn release_data(&self) -> &ReleaseData;

    fn gateway_id(&self) -> GatewayId {
        self.release_data().gateway().id
    }

    fn gateway_name(&self) -> &str {
        &self.release_data().gateway().name
    }

    fn stage_id(&self) -> StageId {
        self.release_data().stage().id
    }

    fn stage_name(&self) -> &str {
        &self.release_data().stage().name
    }
}

/// HTTP routes: one `Route` per resource definition of the version
pub struct HttpRouteConvertor<'a> {
    data: &'a ReleaseData,
    config: &'a ConvertorConfig,
}

impl<'a> HttpRouteConvertor<'a> {
    pub fn new(data: &'a ReleaseData, config: &'a ConvertorConfig) -> Self {
        Self { data, config }
    }

    fn uris(&self, resource: &ResourceDefinition) -> Vec<String> {
        let path = if resource.path.starts_with('/') {
            resource.path.clone()
        } else {
            format!("/{}", resource.path)
        };
        let full = format!("/{}{}", self.stage_name(), path);

        if resource.match_subpath {
            vec![format!("{}/*", full.trim_end_matches('/'))]
        } else {
            vec![full]
        }
    }

    fn convert_resource(&self, resource: &ResourceDefinition) -> Result<DeclarativeResource> {
        if !self.data.backend_configs().contains_key(&resource.backend_id) {
            return Err(ControllerError::Validation(format!(
                "resource {} uses backend {} which has no configuration on stage {}",
                resource.name,
                resource.backend_id,
                self.stage_name()
            )));
        }

        let plugins = self
            .data
            .resource_plugins(resource.id)
            .iter()
            .map(|plugin| PluginEntry {
                name: plugin.name.clone(),
                config: plugin.config.clone(),
            })
            .collect();

        let route = RouteSpec {
            name: resource.name.clone(),
            uris: self.uris(resource),
            methods: resource.methods(),
            service_id: service_id(self.stage_id(), resource.backend_id),
            stage_id: stage_resource_id(self.stage_id()),
            upstream_path: resource.upstream_path.clone(),
            timeout: resource
                .timeout
                .map(|secs| self.config.uniform_timeout(secs)),
            enable_websocket: resource.enable_websocket,
            plugins,
        };

        Ok(DeclarativeResource::new(
            format!("{}-{}", self.stage_id().get(), resource.id.get()),
            self.config.metadata(
                self.data,
                format!("{}.{}.{}", self.gateway_name(), self.stage_name(), resource.name),
            ),
            ResourceSpec::Route(route),
        ))
    }
}

impl Convertor for HttpRouteConvertor<'_> {
    fn convert(&self) -> Result<Vec<DeclarativeResource>> {
        let mut resources: Vec<&ResourceDefinition> =
            self.data.resource_version().resources.iter().collect();
        resources.sort_by_key(|resource| resource.id);

        resources
            .into_iter()
            .map(|resource| self.convert_resource(resource))
            .collect()
    }
}

impl ProtocolConvertor for HttpRouteConvertor<'_> {
    fn release_data(&self) -> &ReleaseData {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convertors::fixtures;
    use apim_types::{PluginBinding, PluginBindingId, PluginScope, ResourceId};
    use serde_json::json;

    fn route(resource: &DeclarativeResource) -> &RouteSpec {
        match &resource.spec {
            ResourceSpec::Route(route) => route,
            other => panic!("expected route, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_routes_sorted_and_prefixed_by_stage() {
        let repo = fixtures::repository(vec![fixtures::host("10.0.0.1:8080")]);
        let data = fixtures::load(&repo).await;
        let config = ConvertorConfig::default();

        let convertor = HttpRouteConvertor::new(&data, &config);
        assert_eq!(convertor.gateway_name(), "demo");
        assert_eq!(convertor.stage_name(), "prod");

        let routes = convertor.convert().unwrap();
        let ids: Vec<_> = routes.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["3-11", "3-12"]);

        let list = route(&routes[0]);
        assert_eq!(list.uris, vec!["/prod/users/"]);
        assert_eq!(list.service_id, "3-1");
        assert_eq!(list.stage_id, "stage-3");
        assert_eq!(list.methods, vec!["GET"]);
    }

    #[tokio::test]
    async fn test_subpath_match_and_resource_plugins() {
        let repo = fixtures::repository(vec![fixtures::host("10.0.0.1:8080")]);
        let mut version = fixtures::resource(20, "proxy_all", "/proxy/", 1);
        version.match_subpath = true;
        version.method = "ANY".into();
        version.timeout = Some(5);
        repo.insert_resource_version(apim_types::ResourceVersion {
            id: apim_types::ResourceVersionId::new(7),
            gateway_id: GatewayId::new(1),
            version: semver::Version::new(1, 0, 1),
            title: String::new(),
            created_at: chrono::Utc::now(),
            created_by: "admin".into(),
            resources: vec![version],
        });
        repo.insert_plugin_binding(PluginBinding {
            id: PluginBindingId::new(1),
            gateway_id: GatewayId::new(1),
            scope: PluginScope::Resource(ResourceId::new(20)),
            plugin_type: "cors".into(),
            config: json!({}),
        });
        let data = fixtures::load(&repo).await;
        let config = ConvertorConfig::default();

        let routes = HttpRouteConvertor::new(&data, &config).convert().unwrap();
        let spec = route(&routes[0]);
        assert_eq!(spec.uris, vec!["/prod/proxy/*"]);
        assert!(spec.methods.is_empty());
        assert_eq!(spec.timeout.map(|t| t.read), Some(5));
        assert_eq!(spec.plugins[0].name, "cors");
    }

    #[tokio::test]
    async fn test_route_to_unconfigured_backend_fails() {
        let repo = fixtures::repository(vec![fixtures::host("10.0.0.1:8080")]);
        repo.insert_resource_version(apim_types::ResourceVersion {
            id: apim_types::ResourceVersionId::new(7),
            gateway_id: GatewayId::new(1),
            version: semver::Version::new(1, 0, 1),
            title: String::new(),
            created_at: chrono::Utc::now(),
            created_by: "admin".into(),
            resources: vec![fixtures::resource(30, "orphan", "/orphan/", 99)],
        });
        let data = fixtures::load(&repo).await;
        let config = ConvertorConfig::default();

        let err = HttpRouteConvertor::new(&data, &config).convert().unwrap_err();
        assert!(err.to_string().contains("orphan"));
    }
}
