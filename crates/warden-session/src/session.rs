//! Per-session control state machine.
//!
//! ```text
//! AgentControl --ask--> AwaitingApproval --resolve--> AgentControl
//!      any state --interrupt--> UserControl --resume--> AgentControl
//! ```
//!
//! `pending_approval` is `Some` exactly when the state is `AwaitingApproval`.
//! All mutation goes through the methods here so the invariant holds.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use warden_core::clock::now_ms;
use warden_core::{AgentRole, CommandRisk};

/// Metadata key naming the user whose remembered approvals apply.
pub const META_USER_ID: &str = "user_id";
/// Metadata key naming the project directory that scopes remembered approvals.
pub const META_PROJECT_PATH: &str = "project_path";

/// Who currently drives the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    AgentControl,
    AwaitingApproval,
    UserControl,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentControl => "agent_control",
            Self::AwaitingApproval => "awaiting_approval",
            Self::UserControl => "user_control",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient markers recorded in the transition log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionMarker {
    UserInterrupt,
    AgentResume,
}

/// One entry in the transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<TransitionMarker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub at: u64,
}

/// The single unresolved approval a session may hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub command_id: String,
    pub command: String,
    #[serde(default)]
    pub purpose: String,
    pub risk: CommandRisk,
    #[serde(default)]
    pub reasons: Vec<String>,
    pub requested_at: u64,
}

/// How a command request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Ran to completion (any exit code).
    Executed,
    /// Timed out or the sandbox could not run it.
    Failed,
    /// Rejected by policy without asking anyone.
    Rejected,
    /// A human denied the approval.
    Denied,
    /// The approval was withdrawn by a user interrupt.
    Cancelled,
}

impl CommandOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Denied => "denied",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit trail entry. Appended, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    pub command: String,
    pub risk: CommandRisk,
    #[serde(default)]
    pub reasons: Vec<String>,
    pub outcome: CommandOutcome,
    pub auto_approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    pub requested_at: u64,
    pub recorded_at: u64,
}

/// A terminal session driven by one agent under human supervision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTerminalSession {
    pub session_id: String,
    pub agent_id: String,
    pub agent_role: AgentRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pty_session_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    state: SessionState,
    #[serde(default)]
    pending_approval: Option<PendingApproval>,
    #[serde(default)]
    command_history: Vec<CommandRecord>,
    #[serde(default)]
    transitions: Vec<StateTransition>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl AgentTerminalSession {
    pub fn new(
        agent_id: impl Into<String>,
        agent_role: AgentRole,
        conversation_id: Option<String>,
        host: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let now = now_ms();
        Self {
            session_id: ulid::Ulid::new().to_string(),
            agent_id: agent_id.into(),
            agent_role,
            conversation_id,
            host: host.into(),
            pty_session_id: None,
            metadata,
            state: SessionState::AgentControl,
            pending_approval: None,
            command_history: Vec::new(),
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pending_approval(&self) -> Option<&PendingApproval> {
        self.pending_approval.as_ref()
    }

    pub fn command_history(&self) -> &[CommandRecord] {
        &self.command_history
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// User whose remembered approvals apply to this session.
    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get(META_USER_ID).map(String::as_str)
    }

    /// Project directory scoping remembered approvals.
    pub fn project_path(&self) -> Option<PathBuf> {
        self.metadata.get(META_PROJECT_PATH).map(PathBuf::from)
    }

    /// Why the agent may not run a command right now, if it may not.
    pub fn execute_blocker(&self) -> Option<String> {
        match (self.state, &self.pending_approval) {
            (SessionState::UserControl, _) => Some("user has control of this session".to_string()),
            (SessionState::AwaitingApproval, Some(pending)) => Some(format!(
                "approval already pending for command {}",
                pending.command_id
            )),
            (SessionState::AwaitingApproval, None) => Some("approval already pending".to_string()),
            (SessionState::AgentControl, _) => None,
        }
    }

    /// AgentControl -> AwaitingApproval holding `pending`.
    pub fn request_approval(&mut self, pending: PendingApproval) -> Result<StateTransition, SessionError> {
        if self.state != SessionState::AgentControl {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::AwaitingApproval,
            });
        }
        self.pending_approval = Some(pending);
        Ok(self.transition(SessionState::AwaitingApproval, None, None))
    }

    /// Take the pending approval for resolution and return control to the agent.
    ///
    /// When `command_id` is given it must match the pending approval.
    pub fn claim_pending(
        &mut self,
        command_id: Option<&str>,
    ) -> Result<(PendingApproval, StateTransition), SessionError> {
        let matches = match (&self.pending_approval, command_id) {
            (Some(pending), Some(id)) => pending.command_id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if self.state != SessionState::AwaitingApproval || !matches {
            return Err(SessionError::NoPendingApproval(self.session_id.clone()));
        }
        let pending = self
            .pending_approval
            .take()
            .ok_or_else(|| SessionError::NoPendingApproval(self.session_id.clone()))?;
        let transition = self.transition(SessionState::AgentControl, None, None);
        Ok((pending, transition))
    }

    /// Hand control to the user. Always legal; a pending approval is withdrawn
    /// and returned so the caller can cancel it.
    pub fn interrupt(&mut self, user_id: &str) -> (StateTransition, Option<PendingApproval>) {
        let cancelled = self.pending_approval.take();
        let transition = self.transition(
            SessionState::UserControl,
            Some(TransitionMarker::UserInterrupt),
            Some(user_id.to_string()),
        );
        (transition, cancelled)
    }

    /// UserControl -> AgentControl.
    pub fn resume(&mut self) -> Result<StateTransition, SessionError> {
        if self.state != SessionState::UserControl {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::AgentControl,
            });
        }
        Ok(self.transition(SessionState::AgentControl, Some(TransitionMarker::AgentResume), None))
    }

    /// Reinstate an approval found by transcript recovery.
    ///
    /// Returns false when the session already holds an approval or is under
    /// user control.
    pub fn rehydrate(&mut self, pending: PendingApproval) -> bool {
        match self.state {
            SessionState::AgentControl => {
                self.pending_approval = Some(pending);
                self.transition(SessionState::AwaitingApproval, None, None);
                true
            }
            SessionState::AwaitingApproval if self.pending_approval.is_none() => {
                self.pending_approval = Some(pending);
                self.updated_at = now_ms();
                true
            }
            _ => false,
        }
    }

    /// Append to the audit trail.
    pub fn record(&mut self, record: CommandRecord) {
        self.command_history.push(record);
        self.updated_at = now_ms();
    }

    fn transition(
        &mut self,
        to: SessionState,
        marker: Option<TransitionMarker>,
        user_id: Option<String>,
    ) -> StateTransition {
        let entry = StateTransition {
            from: self.state,
            to,
            marker,
            user_id,
            at: now_ms(),
        };
        tracing::debug!(session_id = %self.session_id, from = %entry.from, to = %to, ?marker, "session transition");
        self.state = to;
        self.updated_at = entry.at;
        self.transitions.push(entry.clone());
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> AgentTerminalSession {
        AgentTerminalSession::new("agent-1", AgentRole::ChatAgent, None, "localhost", BTreeMap::new())
    }

    fn pending(id: &str) -> PendingApproval {
        PendingApproval {
            command_id: id.to_string(),
            command: "mkdir /tmp/x".to_string(),
            purpose: String::new(),
            risk: CommandRisk::Moderate,
            reasons: Vec::new(),
            requested_at: 1,
        }
    }

    fn holds_invariant(s: &AgentTerminalSession) -> bool {
        s.pending_approval().is_some() == (s.state() == SessionState::AwaitingApproval)
    }

    #[test]
    fn test_approval_round_trip() {
        let mut s = session();
        assert!(s.execute_blocker().is_none());

        s.request_approval(pending("c1")).unwrap();
        assert_eq!(s.state(), SessionState::AwaitingApproval);
        assert!(holds_invariant(&s));
        assert!(s.execute_blocker().unwrap().contains("approval already pending"));

        // a second request cannot overwrite the first
        assert!(s.request_approval(pending("c2")).is_err());
        assert_eq!(s.pending_approval().unwrap().command_id, "c1");

        assert!(matches!(
            s.claim_pending(Some("c2")),
            Err(SessionError::NoPendingApproval(_))
        ));
        let (claimed, _) = s.claim_pending(Some("c1")).unwrap();
        assert_eq!(claimed.command_id, "c1");
        assert_eq!(s.state(), SessionState::AgentControl);
        assert!(holds_invariant(&s));

        // replay
        assert!(s.claim_pending(Some("c1")).is_err());
    }

    #[test]
    fn test_interrupt_is_always_legal_and_cancels_pending() {
        let mut s = session();
        s.request_approval(pending("c1")).unwrap();

        let (transition, cancelled) = s.interrupt("u1");
        assert_eq!(transition.from, SessionState::AwaitingApproval);
        assert_eq!(transition.marker, Some(TransitionMarker::UserInterrupt));
        assert_eq!(cancelled.unwrap().command_id, "c1");
        assert_eq!(s.state(), SessionState::UserControl);
        assert!(holds_invariant(&s));
        assert_eq!(s.execute_blocker().as_deref(), Some("user has control of this session"));

        let (again, cancelled) = s.interrupt("u1");
        assert_eq!(again.from, SessionState::UserControl);
        assert!(cancelled.is_none());
    }

    #[test]
    fn test_resume_only_from_user_control() {
        let mut s = session();
        assert!(matches!(
            s.resume(),
            Err(SessionError::InvalidTransition {
                from: SessionState::AgentControl,
                ..
            })
        ));

        s.interrupt("u1");
        let transition = s.resume().unwrap();
        assert_eq!(transition.marker, Some(TransitionMarker::AgentResume));
        assert_eq!(s.state(), SessionState::AgentControl);
        assert_eq!(s.transitions().len(), 2);
    }

    #[test]
    fn test_rehydrate() {
        let mut s = session();
        assert!(s.rehydrate(pending("c1")));
        assert_eq!(s.state(), SessionState::AwaitingApproval);
        assert!(!s.rehydrate(pending("c2")));
        assert_eq!(s.pending_approval().unwrap().command_id, "c1");

        let mut interrupted = session();
        interrupted.interrupt("u1");
        assert!(!interrupted.rehydrate(pending("c1")));
        assert!(holds_invariant(&interrupted));
    }

    #[test]
    fn test_session_serializes_with_private_state() {
        let mut s = session();
        s.metadata.insert(META_USER_ID.to_string(), "u1".to_string());
        s.request_approval(pending("c1")).unwrap();

        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"state\":\"awaiting_approval\""));
        let parsed: AgentTerminalSession = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, s);
        assert_eq!(parsed.user_id(), Some("u1"));
    }
}
