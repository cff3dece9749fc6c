//! Command implementations.

pub mod assess;
pub mod exec;
pub mod memory;
pub mod session;

use serde::Serialize;
use warden_core::Config;
use warden_session::{SessionManager, WardenContext};

/// Typed error used to propagate deterministic process exit codes.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Where results go: pretty JSON or human text.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    /// Print `value` as JSON, or run `text` to print it for humans.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text(value);
        }
        Ok(())
    }
}

/// Open the file-backed manager and restore persisted sessions.
pub async fn open_manager(config: &Config) -> anyhow::Result<SessionManager> {
    let ctx = WardenContext::from_config(config).await?;
    let manager = SessionManager::new(ctx);
    let report = manager.restore().await?;
    if !report.rehydrated.is_empty() {
        tracing::info!(sessions = ?report.rehydrated, "recovered pending approvals");
    }
    Ok(manager)
}

pub(crate) fn format_ms(timestamp_ms: u64) -> String {
    let secs = timestamp_ms / 1000;
    let millis = timestamp_ms % 1000;
    format!("{secs}.{millis:03}")
}
