//! Configuration types for the checkpoint engine.

use crate::error::{Result, TrailError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default ref namespace for everything the engine writes.
pub const DEFAULT_REF_NAMESPACE: &str = "refs/trail/";

/// Default in-tree directory name for grafted session metadata.
pub const DEFAULT_METADATA_DIR: &str = ".trail";

/// Comprehensive configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrailConfig {
    /// Ref-layout configuration.
    #[serde(default)]
    pub refs: RefConfig,

    /// Checkpoint storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Session lifecycle configuration.
    #[serde(default)]
    pub session: SessionConfig,
}

impl TrailConfig {
    /// Load configuration from `config.toml` in the state directory.
    ///
    /// Returns defaults when the file does not exist.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join("config.toml");
        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| TrailError::Invalid(format!("failed to read config: {}", e)))?;
            toml::from_str(&content)
                .map_err(|e| TrailError::Invalid(format!("failed to parse config: {}", e)))
        } else {
            Ok(TrailConfig::default())
        }
    }

    /// Save configuration to `config.toml` in the state directory.
    pub fn save(&self, state_dir: &Path) -> Result<()> {
        let path = state_dir.join("config.toml");
        let content = toml::to_string_pretty(self)
            .map_err(|e| TrailError::Invalid(format!("failed to serialize config: {}", e)))?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// The fully-qualified metadata ref name, optionally project-namespaced.
    pub fn metadata_ref(&self, project_suffix: Option<&str>) -> String {
        let base = match &self.refs.metadata_ref {
            Some(name) => name.clone(),
            None => format!("{}checkpoints/v1", self.refs.namespace),
        };
        match project_suffix {
            Some(p) => format!("{}-{}", base, p),
            None => base,
        }
    }
}

/// Ref-layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefConfig {
    /// Namespace prefix for shadow refs and the metadata ref.
    pub namespace: String,

    /// Explicit metadata ref name; derived from the namespace when unset.
    pub metadata_ref: Option<String>,

    /// In-tree directory name grafted onto shadow-ref commits.
    pub metadata_dir: String,
}

impl Default for RefConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_REF_NAMESPACE.to_string(),
            metadata_ref: None,
            metadata_dir: DEFAULT_METADATA_DIR.to_string(),
        }
    }
}

/// Checkpoint storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Maximum size of a single transcript blob before chunking (bytes).
    pub chunk_max_bytes: usize,

    /// Timeout for pushing the metadata ref to a remote (seconds).
    pub push_timeout_secs: u64,

    /// Author name for engine-generated commits.
    pub author_name: String,

    /// Author email for engine-generated commits.
    pub author_email: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_max_bytes: 50 * 1024 * 1024,
            push_timeout_secs: 60,
            author_name: "trail".to_string(),
            author_email: "trail@localhost".to_string(),
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Days after which an ended session record is deleted (default: 7).
    pub stale_after_days: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { stale_after_days: 7 }
    }
}
