//! Package deployment: chart repository and deploy tool clients
//!
//! Managed micro-gateways are installed and upgraded as chart releases on a
//! cluster. Values travel as YAML so the deploy side can merge them with the
//! chart defaults untouched.

use crate::error::DeployError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Install-or-upgrade request for one chart release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub chart_name: String,
    pub chart_version: String,
    pub release_name: String,
    pub namespace: String,
    pub cluster_id: String,
    pub values: serde_json::Value,

    /// Identity recorded by the deploy tool
    pub operator: String,
}

/// Outcome reported by the deploy tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResult {
    pub revision: u64,

    /// Whether the release was actually applied to the cluster
    pub committed: bool,

    #[serde(default)]
    pub message: String,
}

/// A chart to publish to the chart repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPackage {
    pub name: String,
    pub version: String,
    pub app_version: String,
    pub default_values: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRef {
    pub name: String,
    pub version: String,
}

#[async_trait]
pub trait DeployTool: Send + Sync {
    async fn install_or_upgrade(
        &self,
        request: &DeployRequest,
    ) -> Result<DeployResult, DeployError>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait ChartRepository: Send + Sync {
    async fn push_chart(&self, chart: &ChartPackage) -> Result<ChartRef, DeployError>;
}

/// Records every request and commits unless told otherwise
pub struct InMemoryDeployTool {
    requests: Mutex<Vec<DeployRequest>>,
    revisions: DashMap<String, u64>,
    rejections: DashMap<String, String>,
}

impl InMemoryDeployTool {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            revisions: DashMap::new(),
            rejections: DashMap::new(),
        }
    }

    /// Report releases named `release_name` as not committed with `message`
    pub fn reject_release(&self, release_name: impl Into<String>, message: impl Into<String>) {
        self.rejections.insert(release_name.into(), message.into());
    }

    pub fn requests(&self) -> Vec<DeployRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryDeployTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeployTool for InMemoryDeployTool {
    async fn install_or_upgrade(
        &self,
        request: &DeployRequest,
    ) -> Result<DeployResult, DeployError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if let Some(message) = self.rejections.get(&request.release_name) {
            return Ok(DeployResult {
                revision: 0,
                committed: false,
                message: message.clone(),
            });
        }

        let mut revision = self.revisions.entry(request.release_name.clone()).or_insert(0);
        *revision += 1;

        Ok(DeployResult {
            revision: *revision,
            committed: true,
            message: format!("release {} upgraded", request.release_name),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Chart repository keeping pushed charts in memory
#[derive(Default)]
pub struct InMemoryChartRepository {
    charts: DashMap<(String, String), ChartPackage>,
}

impl InMemoryChartRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str, version: &str) -> Option<ChartPackage> {
        self.charts
            .get(&(name.to_string(), version.to_string()))
            .map(|chart| chart.clone())
    }
}

#[async_trait]
impl ChartRepository for InMemoryChartRepository {
    async fn push_chart(&self, chart: &ChartPackage) -> Result<ChartRef, DeployError> {
        self.charts
            .insert((chart.name.clone(), chart.version.clone()), chart.clone());
        Ok(ChartRef {
            name: chart.name.clone(),
            version: chart.version.clone(),
        })
    }
}

/// Wire form of a deploy request; values rendered as YAML
#[derive(Debug, Serialize)]
struct DeployRequestBody<'a> {
    chart_name: &'a str,
    chart_version: &'a str,
    release_name: &'a str,
    namespace: &'a str,
    cluster_id: &'a str,
    values: String,
    operator: &'a str,
}

/// Deploy API client
pub struct HttpDeployTool {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDeployTool {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DeployError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, DeployError>
    where
        B: Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "deploy API request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeployError::Rejected(format!("status={status}: {body}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| DeployError::Rejected(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl DeployTool for HttpDeployTool {
    async fn install_or_upgrade(
        &self,
        request: &DeployRequest,
    ) -> Result<DeployResult, DeployError> {
        let body = DeployRequestBody {
            chart_name: &request.chart_name,
            chart_version: &request.chart_version,
            release_name: &request.release_name,
            namespace: &request.namespace,
            cluster_id: &request.cluster_id,
            values: serde_yaml::to_string(&request.values)?,
            operator: &request.operator,
        };

        let result: DeployResult = self.post("/api/v1/releases", &body).await?;
        info!(
            release = %request.release_name,
            revision = result.revision,
            committed = result.committed,
            "Deploy tool responded"
        );
        Ok(result)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[async_trait]
impl ChartRepository for HttpDeployTool {
    async fn push_chart(&self, chart: &ChartPackage) -> Result<ChartRef, DeployError> {
        self.post("/api/v1/charts", chart).await
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, DeployError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DeployError::Connection(format!("failed to build HTTP client: {e}")))
}

fn map_transport_error(err: reqwest::Error) -> DeployError {
    if err.is_timeout() {
        DeployError::Timeout(err.to_string())
    } else {
        DeployError::Connection(err.to_string())
    }
}
