//! Configuration for apimctl

use apim_controller::{ConvertorConfig, LockConfig, RollingUpdateConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Key-value store the micro-gateways watch
    pub registry: RegistryConfig,

    /// Deploy API used for managed micro-gateways
    pub deploy: DeployConfig,

    pub release: ReleaseConfig,

    pub logging: LoggingConfig,

    /// Where gateway data and release history are kept between runs
    pub state_file: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            deploy: DeployConfig::default(),
            release: ReleaseConfig::default(),
            logging: LoggingConfig::default(),
            state_file: PathBuf::from("apim-state.yaml"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// In-memory store, persisted in the state file
    Memory,

    /// etcd v3 through its JSON gateway
    Etcd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,

    /// etcd gateway endpoint
    pub endpoint: String,

    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Memory,
            endpoint: "http://127.0.0.1:2379".to_string(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Base URL; without one, deploys are recorded in memory only
    pub api_url: Option<String>,

    pub timeout_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            timeout_secs: 120,
        }
    }
}

/// Release pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Extra lock attempts for background releases
    pub lock_retry_times: u32,

    pub lock_retry_interval_ms: u64,

    /// Operator recorded on histories created by this CLI
    pub operator: String,

    /// Rolling update worker pool size
    pub workers: usize,

    /// Proxy runtime version the convertors target
    pub runtime_version: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        let lock = LockConfig::default();
        Self {
            lock_retry_times: lock.retry_times,
            lock_retry_interval_ms: lock.retry_interval.as_millis() as u64,
            operator: "apimctl".to_string(),
            workers: RollingUpdateConfig::default().workers,
            runtime_version: ConvertorConfig::default().runtime_version.to_string(),
        }
    }
}

impl ReleaseConfig {
    pub fn lock(&self) -> LockConfig {
        LockConfig {
            retry_times: self.lock_retry_times,
            retry_interval: Duration::from_millis(self.lock_retry_interval_ms),
        }
    }

    pub fn convertor(&self) -> Result<ConvertorConfig, semver::Error> {
        Ok(ConvertorConfig {
            runtime_version: semver::Version::parse(&self.runtime_version)?,
            ..ConvertorConfig::default()
        })
    }

    pub fn rolling_update(&self) -> RollingUpdateConfig {
        RollingUpdateConfig {
            workers: self.workers,
            operator: self.operator.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,

    /// JSON format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl CliConfig {
    /// Load configuration: defaults, then the file, then `APIM_` variables.
    ///
    /// Nested keys use a double underscore, e.g. `APIM_REGISTRY__BACKEND=etcd`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&CliConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("APIM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.registry.backend, RegistryBackend::Memory);
        assert_eq!(config.release.lock_retry_times, 60);
        assert_eq!(config.release.lock().retry_interval, Duration::from_secs(1));
        assert!(config.deploy.api_url.is_none());
    }

    #[test]
    fn test_runtime_version_parses() {
        let config = ReleaseConfig::default();
        let convertor = config.convertor().unwrap();
        assert_eq!(convertor.runtime_version, semver::Version::new(3, 13, 0));

        let broken = ReleaseConfig {
            runtime_version: "three".into(),
            ..ReleaseConfig::default()
        };
        assert!(broken.convertor().is_err());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "registry:\n  backend: etcd\n  endpoint: http://etcd:2379\nrelease:\n  workers: 9"
        )
        .unwrap();

        let config = CliConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.registry.backend, RegistryBackend::Etcd);
        assert_eq!(config.registry.endpoint, "http://etcd:2379");
        assert_eq!(config.release.workers, 9);
        assert_eq!(config.release.operator, "apimctl");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = CliConfig::load(Some("/nonexistent/apim")).unwrap();
        assert_eq!(config.logging.level, "info");
    }
}
