//! State file: gateway data, release history and the in-memory registry

use crate::error::CliResult;
use apim_controller::{HistorySnapshot, RepositorySnapshot};
use apim_registry::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Everything apimctl keeps between runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub repository: RepositorySnapshot,

    #[serde(default)]
    pub history: HistorySnapshot,

    /// Registry keys when the memory backend is in use
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub registry: BTreeMap<String, String>,
}

impl StateFile {
    /// Read the state file; a missing file is an empty control plane
    pub fn load(path: &Path) -> CliResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No state file, starting empty");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Write through a temporary file so a crash never leaves half a state
    pub fn save(&self, path: &Path) -> CliResult<()> {
        let raw = serde_yaml::to_string(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "State saved");
        Ok(())
    }

    /// Copy the saved registry keys into a fresh store
    pub async fn restore_registry(&self, store: &dyn KvStore) -> CliResult<()> {
        for (key, value) in &self.registry {
            store.put(key, value.clone().into_bytes()).await?;
        }
        Ok(())
    }

    /// Capture every key of a store
    pub async fn capture_registry(&mut self, store: &dyn KvStore) -> CliResult<()> {
        self.registry = store
            .range("")
            .await?
            .into_iter()
            .map(|kv| (kv.key, String::from_utf8_lossy(&kv.value).into_owned()))
            .collect();
        Ok(())
    }
}
