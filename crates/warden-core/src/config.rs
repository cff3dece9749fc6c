use crate::role::AgentRole;
use crate::rules::PermissionRule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use warden_sandbox::SandboxConfig;

/// Default retention for command execution records (24h).
pub const DEFAULT_QUEUE_RETENTION_SECS: u64 = 24 * 60 * 60;

/// Serialized settings from ~/.warden/config.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for session records, queue entries and transcripts.
    pub data_dir: Option<PathBuf>,
    /// How long command execution records are kept, in seconds.
    pub queue_retention_secs: u64,
    /// Role used when a session is created without one.
    pub default_role: AgentRole,
    /// Permission rules evaluated before the role table.
    pub rules: Vec<PermissionRule>,
    /// Sandbox applied to every approved command.
    pub sandbox: SandboxConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            queue_retention_secs: DEFAULT_QUEUE_RETENTION_SECS,
            default_role: AgentRole::ChatAgent,
            rules: Vec::new(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl Config {
    /// Effective data directory: configured, else `~/.local/share/warden`.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("warden")
        })
    }
}

/// Helper struct for storing the location to read/write global settings
pub struct ConfigStore {
    path: PathBuf,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".warden");
        path.push("config.json");
        Self { path }
    }

    /// Store backed by an explicit file.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the config file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the saved config, or fallback to Default
    pub fn load(&self) -> Config {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return Config::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "ignoring unreadable config: {e}");
                Config::default()
            }
        }
    }

    /// Save the config back to disk
    pub fn save(&self, config: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content)
    }
}
