//! warden-sandbox: isolated execution of approved shell commands.
//!
//! Every run gets its own restricted context (a hardened container by
//! default) with memory/CPU/process ceilings, no network unless enabled, and a
//! hard wall-clock timeout. A background monitor turns known anomaly markers in
//! the output into [`SecurityEvent`]s that are returned with the result.

pub mod backend;
pub mod clock;
pub mod config;
mod error;
pub mod executor;
pub mod guard;
pub mod monitor;

pub use backend::{backend_for, BubblewrapBackend, DockerBackend, HostBackend, SandboxBackend};
pub use config::{BackendKind, SandboxConfig, SecurityLevel};
pub use error::SandboxError;
pub use executor::{CommandRunner, ResourceUsage, SandboxExecutor, SandboxResult, TIMEOUT_EXIT_CODE};
pub use monitor::{SecurityEvent, SecurityEventKind};
pub use tokio_util::sync::CancellationToken;
