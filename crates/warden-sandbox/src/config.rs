//! Sandbox policy and resource configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Isolation backend used to run commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Ephemeral hardened container per execution.
    #[default]
    Docker,
    /// Linux bubblewrap namespace sandbox.
    Bubblewrap,
    /// No isolation. Runs directly on the host shell.
    Host,
}

/// Graduated sandbox strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Adds back the capabilities most build tooling expects.
    Low,
    /// Adds back file ownership capabilities only.
    #[default]
    Medium,
    /// No capabilities and the command whitelist is enforced.
    High,
}

impl SecurityLevel {
    /// Linux capabilities re-added on top of `--cap-drop=ALL`.
    pub fn added_capabilities(self) -> &'static [&'static str] {
        match self {
            SecurityLevel::High => &[],
            SecurityLevel::Medium => &["CHOWN", "DAC_OVERRIDE", "FOWNER"],
            SecurityLevel::Low => &[
                "CHOWN",
                "DAC_OVERRIDE",
                "FOWNER",
                "SETGID",
                "SETUID",
                "NET_BIND_SERVICE",
                "KILL",
            ],
        }
    }

    /// Whether only whitelisted base commands may run.
    pub fn enforces_whitelist(self) -> bool {
        self == SecurityLevel::High
    }
}

/// Configuration applied to a single sandboxed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Which isolation backend to use.
    pub backend: BackendKind,
    /// Container image for the docker backend.
    pub image: String,
    /// Memory ceiling in docker notation (e.g. `512m`).
    pub memory_limit: String,
    /// CPU ceiling in cores.
    pub cpu_limit: f64,
    /// Maximum number of processes inside the sandbox.
    pub pids_limit: u32,
    /// Size of the writable `/tmp` tmpfs.
    pub tmpfs_size: String,
    /// Whether outbound network access is permitted.
    pub network_enabled: bool,
    /// Strictness level.
    pub security_level: SecurityLevel,
    /// Hard wall-clock timeout in seconds.
    pub timeout_secs: u64,
    /// Base commands permitted when the level enforces a whitelist.
    pub allowed_commands: Vec<String>,
    /// Working directory mounted into the sandbox.
    pub working_dir: Option<PathBuf>,
    /// Whether the working directory is mounted writable.
    pub workspace_writable: bool,
    /// How long the event monitor may keep draining after the process exits, in milliseconds.
    pub monitor_grace_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Docker,
            image: "alpine:3.20".to_string(),
            memory_limit: "512m".to_string(),
            cpu_limit: 1.0,
            pids_limit: 128,
            tmpfs_size: "64m".to_string(),
            network_enabled: false,
            security_level: SecurityLevel::Medium,
            timeout_secs: 120,
            allowed_commands: default_whitelist(),
            working_dir: None,
            workspace_writable: false,
            monitor_grace_ms: 250,
        }
    }
}

impl SandboxConfig {
    /// Hard timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Grace period for the security monitor.
    pub fn monitor_grace(&self) -> Duration {
        Duration::from_millis(self.monitor_grace_ms)
    }

    /// Host shell execution with no isolation, for trusted hosts and tests.
    pub fn host() -> Self {
        Self {
            backend: BackendKind::Host,
            ..Self::default()
        }
    }
}

fn default_whitelist() -> Vec<String> {
    [
        "ls", "cat", "echo", "pwd", "head", "tail", "grep", "find", "wc", "sort", "uniq", "date",
        "env", "true", "false", "test", "mkdir", "touch", "cp", "mv", "stat", "du", "df",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
