use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Storage key holding the folder-URI -> environment-path map
pub const WORKSPACE_SELECTION_KEY: &str = "python.workspaceEnvironmentSelections";
/// Storage key holding the selection made with no workspace open
pub const GLOBAL_SELECTION_KEY: &str = "python.globalEnvironmentSelection";

/// Bounds for the tool recency cache
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecencyLimits {
    /// Entries older than this are dropped on the next access
    #[serde(with = "duration_secs")]
    pub max_age: Duration,
    pub max_entries: usize,
}

impl Default for RecencyLimits {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(15 * 60),
            max_entries: 100,
        }
    }
}

/// Runtime configuration for the environment tools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub recency: RecencyLimits,
    /// How long environment creation waits for the active environment to change
    #[serde(with = "duration_secs")]
    pub creation_wait: Duration,
    /// Directory for persisted workspace/global state. `None` keeps state in memory.
    pub state_dir: Option<PathBuf>,
    /// Workspace folders (filesystem paths)
    pub workspace_folders: Vec<PathBuf>,
    /// Whether default recommendations are allowed
    pub trusted: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            recency: RecencyLimits::default(),
            creation_wait: Duration::from_secs(5),
            state_dir: None,
            workspace_folders: Vec::new(),
            trusted: true,
        }
    }
}

impl ToolsConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Apply `PYENV_TOOLS_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("PYENV_TOOLS_STATE_DIR") {
            if !dir.trim().is_empty() {
                self.state_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(v) = std::env::var("PYENV_TOOLS_UNTRUSTED") {
            if matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes") {
                self.trusted = false;
            }
        }
        self
    }

    pub fn workspace_state_file(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|d| d.join("workspace-state.json"))
    }

    pub fn global_state_file(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|d| d.join("global-state.json"))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ToolsConfig::default();
        assert_eq!(cfg.recency.max_age, Duration::from_secs(900));
        assert_eq!(cfg.recency.max_entries, 100);
        assert_eq!(cfg.creation_wait, Duration::from_secs(5));
        assert!(cfg.trusted);
        assert!(cfg.workspace_state_file().is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.json");
        std::fs::write(
            &path,
            r#"{ "creation_wait": 2, "state_dir": "/tmp/state", "trusted": false }"#,
        )
        .unwrap();

        let cfg = ToolsConfig::from_file(&path).unwrap();
        assert_eq!(cfg.creation_wait, Duration::from_secs(2));
        assert_eq!(cfg.recency, RecencyLimits::default());
        assert!(!cfg.trusted);
        assert_eq!(
            cfg.global_state_file(),
            Some(PathBuf::from("/tmp/state/global-state.json"))
        );
    }
}
