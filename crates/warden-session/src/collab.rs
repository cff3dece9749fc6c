//! Collaborators the session layer consumes: terminal transport and audit sink.

use crate::error::SessionError;
use crate::session::CommandOutcome;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use warden_core::{AgentRole, CommandRisk};

/// Streams command I/O to an attached client.
#[async_trait]
pub trait TerminalTransport: Send + Sync {
    /// Open a terminal for a session. `None` when nothing is attached.
    async fn open(&self, session_id: &str, host: &str) -> Result<Option<String>, SessionError>;

    /// Mirror text to the terminal.
    async fn write(&self, pty_session_id: &str, data: &str) -> Result<(), SessionError>;

    async fn close(&self, pty_session_id: &str) -> Result<(), SessionError>;
}

/// Transport used when no client is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedTerminal;

#[async_trait]
impl TerminalTransport for DetachedTerminal {
    async fn open(&self, _session_id: &str, _host: &str) -> Result<Option<String>, SessionError> {
        Ok(None)
    }

    async fn write(&self, _pty_session_id: &str, _data: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn close(&self, _pty_session_id: &str) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Per-command audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub session_id: String,
    pub agent_id: String,
    pub role: AgentRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    pub command: String,
    pub risk: CommandRisk,
    pub outcome: CommandOutcome,
    pub auto_approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Records risk, outcome and timing for every resolved command.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord);
}

/// Emits one `tracing` event per command on the `warden::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: &AuditRecord) {
        tracing::info!(
            target: "warden::audit",
            session_id = %record.session_id,
            agent_id = %record.agent_id,
            role = %record.role,
            command_id = record.command_id.as_deref().unwrap_or("-"),
            risk = %record.risk,
            outcome = %record.outcome,
            auto_approved = record.auto_approved,
            user_id = record.user_id.as_deref().unwrap_or("-"),
            exit_code = record.exit_code,
            duration_ms = record.duration_ms,
            command = %record.command,
            "command audited"
        );
    }
}
