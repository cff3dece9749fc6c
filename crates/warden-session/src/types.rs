//! Values returned across the session manager boundary.

use crate::session::{AgentTerminalSession, CommandOutcome, CommandRecord, PendingApproval, SessionState};
use crate::transcript::ApprovalOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use warden_core::{AgentRole, CommandRisk, RiskAssessment};
use warden_sandbox::SecurityEvent;

/// Snapshot of a session for callers outside the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub agent_id: String,
    pub agent_role: AgentRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pty_session_id: Option<String>,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_approval: Option<PendingApproval>,
    pub command_history: Vec<CommandRecord>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<&AgentTerminalSession> for SessionInfo {
    fn from(session: &AgentTerminalSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            agent_id: session.agent_id.clone(),
            agent_role: session.agent_role,
            conversation_id: session.conversation_id.clone(),
            host: session.host.clone(),
            pty_session_id: session.pty_session_id.clone(),
            state: session.state(),
            pending_approval: session.pending_approval().cloned(),
            command_history: session.command_history().to_vec(),
            metadata: session.metadata.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

/// What happened when a command ran (or failed to).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub command_id: String,
    pub outcome: CommandOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    #[serde(default)]
    pub security_events: Vec<SecurityEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Sandbox error when the command could not run at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteStatus {
    Success,
    PendingApproval,
    Error,
}

/// Reply to `execute_command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub status: ExecuteStatus,
    pub risk: CommandRisk,
    pub reasons: Vec<String>,
    /// Set when a queue record exists: poll it with `get_command_state`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
}

impl ExecuteResult {
    pub(crate) fn error(assessment: &RiskAssessment, message: impl Into<String>) -> Self {
        Self {
            status: ExecuteStatus::Error,
            risk: assessment.risk,
            reasons: assessment.reasons.clone(),
            command_id: None,
            message: Some(message.into()),
            execution: None,
        }
    }

    pub(crate) fn pending(assessment: &RiskAssessment, command_id: String, message: String) -> Self {
        Self {
            status: ExecuteStatus::PendingApproval,
            risk: assessment.risk,
            reasons: assessment.reasons.clone(),
            command_id: Some(command_id),
            message: Some(message),
            execution: None,
        }
    }

    pub(crate) fn executed(assessment: &RiskAssessment, report: ExecutionReport) -> Self {
        let status = if report.outcome == CommandOutcome::Executed {
            ExecuteStatus::Success
        } else {
            ExecuteStatus::Error
        };
        Self {
            status,
            risk: assessment.risk,
            reasons: assessment.reasons.clone(),
            command_id: Some(report.command_id.clone()),
            message: report.error.clone(),
            execution: Some(report),
        }
    }
}

/// A human's answer to a pending approval.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApprovalDecision {
    pub session_id: String,
    /// Must match the pending approval when given.
    pub command_id: Option<String>,
    pub approved: bool,
    pub user_id: Option<String>,
    pub comment: Option<String>,
    /// Remember the command pattern so it is not asked again.
    pub auto_approve_future: bool,
    /// Scope the remembered pattern to a project rather than the whole user.
    pub remember_for_project: bool,
    pub project_path: Option<PathBuf>,
}

impl ApprovalDecision {
    pub fn approve(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            approved: true,
            ..Self::default()
        }
    }

    pub fn deny(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            approved: false,
            ..Self::default()
        }
    }

    pub fn by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn for_command(mut self, command_id: impl Into<String>) -> Self {
        self.command_id = Some(command_id.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Remember for the user, or for `project` only when given.
    pub fn remember(mut self, project: Option<PathBuf>) -> Self {
        self.auto_approve_future = true;
        self.remember_for_project = project.is_some();
        self.project_path = project;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    Denied,
    /// Approved, but the command failed to run.
    Error,
}

/// Reply to `approve_command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResult {
    pub status: ApprovalStatus,
    pub command_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remembered_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
}

/// Reply to `user_interrupt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptResult {
    pub previous_state: SessionState,
    pub current_state: SessionState,
    /// Approval withdrawn by the interrupt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_command_id: Option<String>,
}

/// Reply to `agent_resume`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeResult {
    pub previous_state: SessionState,
    pub current_state: SessionState,
}

/// Outcome of `SessionManager::restore`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Sessions loaded from the store.
    pub sessions: usize,
    /// Sessions whose pending approval was recovered from the transcript.
    pub rehydrated: Vec<String>,
    /// Sessions whose recorded approval had already been resolved.
    pub cleared: Vec<String>,
}

/// Broadcast to subscribers as sessions change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionCreated {
        session_id: String,
    },
    StateChanged {
        session_id: String,
        from: SessionState,
        to: SessionState,
    },
    ApprovalRequested {
        session_id: String,
        command_id: String,
        command: String,
        risk: CommandRisk,
    },
    ApprovalResolved {
        session_id: String,
        command_id: String,
        outcome: ApprovalOutcome,
    },
    CommandCompleted {
        session_id: String,
        command_id: String,
        outcome: CommandOutcome,
        exit_code: Option<i32>,
    },
    SessionClosed {
        session_id: String,
    },
}
