//! Error types for the warden-sandbox crate.

/// Errors returned by the sandbox runner.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Sandboxed backend is unavailable.
    #[error("{0}")]
    BackendUnavailable(String),

    /// Command rejected by the sandbox blocklist or whitelist before it ran.
    #[error("Command blocked by sandbox: {0}")]
    Blocked(String),

    /// Sandbox configuration is not usable (bad image name, bad limits).
    #[error("Invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    /// Process execution failed.
    #[error("Failed to execute command: {0}")]
    Execution(String),

    /// Execution was cancelled before it finished.
    #[error("Execution cancelled")]
    Cancelled,
}
