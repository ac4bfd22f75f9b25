//! Service convertor: one upstream service per configured backend

use super::{Convertor, ConvertorConfig};
use crate::error::{ControllerError, Result};
use crate::release_data::ReleaseData;
use apim_types::{
    Backend, BackendConfigSpec, BackendId, DeclarativeResource, ResourceSpec, ServiceNode,
    ServiceSpec, StageId, UpstreamTimeout,
};

/// Registry id of the service for a backend on a stage
pub fn service_id(stage_id: StageId, backend_id: BackendId) -> String {
    format!("{}-{}", stage_id.get(), backend_id.get())
}

pub struct ServiceConvertor<'a> {
    data: &'a ReleaseData,
    config: &'a ConvertorConfig,
}

impl<'a> ServiceConvertor<'a> {
    pub fn new(data: &'a ReleaseData, config: &'a ConvertorConfig) -> Self {
        Self { data, config }
    }

    fn convert_backend(
        &self,
        backend: &Backend,
        spec: &BackendConfigSpec,
    ) -> Result<DeclarativeResource> {
        let stage = self.data.stage();

        if spec.hosts.is_empty() {
            return Err(ControllerError::Validation(format!(
                "backend {} has no hosts configured on stage {}",
                backend.name, stage.name
            )));
        }
        spec.validate().map_err(|e| {
            ControllerError::Validation(format!("backend {}: {}", backend.name, e))
        })?;

        let scheme = spec.hosts[0].scheme.clone();
        if spec.hosts.iter().any(|host| host.scheme != scheme) {
            return Err(ControllerError::Validation(format!(
                "backend {} mixes schemes across hosts",
                backend.name
            )));
        }

        let nodes = spec
            .hosts
            .iter()
            .map(|host| {
                let (address, port) = split_host_port(&host.host, &scheme).ok_or_else(|| {
                    ControllerError::Validation(format!(
                        "backend {} has invalid host {}",
                        backend.name, host.host
                    ))
                })?;
                Ok(ServiceNode {
                    host: address,
                    port,
                    weight: host.weight,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let timeout = UpstreamTimeout {
            connect: non_zero_or(spec.timeout.connect, self.config.default_timeout_secs),
            send: non_zero_or(spec.timeout.send, self.config.default_timeout_secs),
            read: non_zero_or(spec.timeout.read, self.config.default_timeout_secs),
        };

        let service = ServiceSpec {
            name: backend.name.clone(),
            description: backend.description.clone(),
            load_balance: spec.load_balance.runtime_name().to_string(),
            hash_on_header: spec.hash_on_header.clone(),
            scheme,
            nodes,
            timeout,
        };

        Ok(DeclarativeResource::new(
            service_id(stage.id, backend.id),
            self.config.metadata(
                self.data,
                format!("{}.{}.{}", self.data.gateway().name, stage.name, backend.name),
            ),
            ResourceSpec::Service(service),
        ))
    }
}

impl Convertor for ServiceConvertor<'_> {
    fn convert(&self) -> Result<Vec<DeclarativeResource>> {
        let configs = self.data.backend_configs();

        // Backends without a config on this stage are not deployed here
        self.data
            .backends()
            .iter()
            .filter_map(|backend| {
                configs
                    .get(&backend.id)
                    .map(|spec| self.convert_backend(backend, spec))
            })
            .collect()
    }
}

fn non_zero_or(value: u32, default: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "https" | "grpcs" => 443,
        _ => 80,
    }
}

/// Split `host[:port]`, falling back to the scheme's default port
fn split_host_port(raw: &str, scheme: &str) -> Option<(String, u16)> {
    let raw = raw.trim();
    if raw.ends_with(']') {
        return Some((raw.to_string(), default_port(scheme)));
    }
    match raw.rsplit_once(':') {
        Some((host, port))
            if (!host.is_empty() && !host.contains(':')) || host.starts_with('[') =>
        {
            port.parse().ok().map(|port| (host.to_string(), port))
        }
        Some(_) => None,
        None => Some((raw.to_string(), default_port(scheme))),
    }
}
