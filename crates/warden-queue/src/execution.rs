//! The durable unit of work: one requested command and its lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;
use warden_core::clock::now_ms;
use warden_core::{CommandRisk, RiskAssessment};

/// Lifecycle of a [`CommandExecution`].
///
/// ```text
/// PendingApproval -> Approved -> Executing -> Completed
///        |                           \-----> Failed
///        \-> Denied
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    PendingApproval,
    Approved,
    Executing,
    Completed,
    Failed,
    Denied,
}

impl ExecutionState {
    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (PendingApproval, Approved)
                | (PendingApproval, Denied)
                | (Approved, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
        )
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Denied)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested command as stored in the execution queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandExecution {
    pub command_id: String,
    pub terminal_session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub command: String,
    #[serde(default)]
    pub purpose: String,
    pub risk_level: CommandRisk,
    #[serde(default)]
    pub risk_reasons: Vec<String>,
    pub state: ExecutionState,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    /// Unix milliseconds.
    pub requested_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_completed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_comment: Option<String>,
}

impl CommandExecution {
    /// A fresh record waiting for a human decision.
    pub fn new(
        terminal_session_id: impl Into<String>,
        chat_id: Option<String>,
        command: impl Into<String>,
        purpose: impl Into<String>,
        assessment: &RiskAssessment,
    ) -> Self {
        Self {
            command_id: Ulid::new().to_string(),
            terminal_session_id: terminal_session_id.into(),
            chat_id,
            command: command.into(),
            purpose: purpose.into(),
            risk_level: assessment.risk,
            risk_reasons: assessment.reasons.clone(),
            state: ExecutionState::PendingApproval,
            output: String::new(),
            stderr: String::new(),
            return_code: None,
            requested_at: now_ms(),
            approved_at: None,
            execution_started_at: None,
            execution_completed_at: None,
            approved_by_user_id: None,
            approval_comment: None,
        }
    }

    /// A record the policy allowed without asking anyone.
    pub fn auto_approved(
        terminal_session_id: impl Into<String>,
        chat_id: Option<String>,
        command: impl Into<String>,
        purpose: impl Into<String>,
        assessment: &RiskAssessment,
    ) -> Self {
        let mut record = Self::new(terminal_session_id, chat_id, command, purpose, assessment);
        record.state = ExecutionState::Approved;
        record.approved_at = Some(record.requested_at);
        record
    }

    pub fn is_pending(&self) -> bool {
        self.state == ExecutionState::PendingApproval
    }

    /// Wall time between start and completion, when both are known.
    pub fn duration_ms(&self) -> Option<u64> {
        Some(
            self.execution_completed_at?
                .saturating_sub(self.execution_started_at?),
        )
    }

    /// The risk tier and its reasons as an assessment.
    pub fn assessment(&self) -> RiskAssessment {
        RiskAssessment {
            risk: self.risk_level,
            reasons: self.risk_reasons.clone(),
        }
    }

    pub fn risk(&self) -> CommandRisk {
        self.risk_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::assess;

    #[test]
    fn test_transitions_are_forward_only() {
        use ExecutionState::*;
        let all = [PendingApproval, Approved, Executing, Completed, Failed, Denied];
        let allowed = [
            (PendingApproval, Approved),
            (PendingApproval, Denied),
            (Approved, Executing),
            (Executing, Completed),
            (Executing, Failed),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
        for terminal in [Completed, Failed, Denied] {
            assert!(terminal.is_terminal());
            assert!(all.iter().all(|&to| !terminal.can_transition_to(to)));
        }
    }

    #[test]
    fn test_new_and_auto_approved() {
        let assessment = assess("mkdir /tmp/x");
        let pending = CommandExecution::new("s1", None, "mkdir /tmp/x", "setup", &assessment);
        assert_eq!(pending.state, ExecutionState::PendingApproval);
        assert_eq!(pending.risk_level, CommandRisk::Moderate);
        assert!(pending.approved_at.is_none());

        let auto = CommandExecution::auto_approved("s1", None, "ls", "", &assess("ls"));
        assert_eq!(auto.state, ExecutionState::Approved);
        assert_eq!(auto.approved_at, Some(auto.requested_at));
        assert_ne!(auto.command_id, pending.command_id);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExecutionState::PendingApproval).unwrap(),
            "\"pending_approval\""
        );
    }
}
