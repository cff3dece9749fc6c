//! Transcript entry types and crash-recovery reconciliation.

use crate::session::{PendingApproval, SessionState, TransitionMarker};
use serde::{Deserialize, Serialize};
use warden_core::{AgentRole, CommandRisk};

/// How a pending approval was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    /// Withdrawn by a user interrupt.
    Cancelled,
}

/// A single entry in a session transcript.
///
/// Each line in a transcript file is one `TranscriptEntry` serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEntry {
    /// Session start marker (first line).
    #[serde(rename = "session/start")]
    SessionStart {
        id: String,
        timestamp: u64,
        session_id: String,
        agent_id: String,
        role: AgentRole,
        host: String,
    },

    /// The agent asked to run a command.
    #[serde(rename = "command/request")]
    CommandRequest {
        id: String,
        timestamp: u64,
        command: String,
        risk: CommandRisk,
        /// Policy decision label: allow, ask or deny.
        decision: String,
        reason: String,
    },

    /// A command is waiting for a human.
    #[serde(rename = "approval/request")]
    ApprovalRequest {
        id: String,
        timestamp: u64,
        command_id: String,
        command: String,
        #[serde(default)]
        purpose: String,
        risk: CommandRisk,
        #[serde(default)]
        reasons: Vec<String>,
    },

    /// A pending approval was resolved.
    #[serde(rename = "approval/resolution")]
    ApprovalResolution {
        id: String,
        timestamp: u64,
        command_id: String,
        outcome: ApprovalOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },

    /// A command finished (or failed to run).
    #[serde(rename = "command/result")]
    CommandResult {
        id: String,
        timestamp: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        command_id: Option<String>,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        output: String,
        #[serde(default)]
        stderr: String,
        #[serde(default)]
        timed_out: bool,
    },

    /// Control moved between agent and user.
    #[serde(rename = "control/transition")]
    ControlTransition {
        id: String,
        timestamp: u64,
        from: SessionState,
        to: SessionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        marker: Option<TransitionMarker>,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
}

impl TranscriptEntry {
    pub fn id(&self) -> &str {
        match self {
            Self::SessionStart { id, .. }
            | Self::CommandRequest { id, .. }
            | Self::ApprovalRequest { id, .. }
            | Self::ApprovalResolution { id, .. }
            | Self::CommandResult { id, .. }
            | Self::ControlTransition { id, .. } => id,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Self::SessionStart { timestamp, .. }
            | Self::CommandRequest { timestamp, .. }
            | Self::ApprovalRequest { timestamp, .. }
            | Self::ApprovalResolution { timestamp, .. }
            | Self::CommandResult { timestamp, .. }
            | Self::ControlTransition { timestamp, .. } => *timestamp,
        }
    }

    /// Approval request entry for a pending approval.
    pub fn approval_request(pending: &PendingApproval) -> Self {
        Self::ApprovalRequest {
            id: new_entry_id(),
            timestamp: pending.requested_at,
            command_id: pending.command_id.clone(),
            command: pending.command.clone(),
            purpose: pending.purpose.clone(),
            risk: pending.risk,
            reasons: pending.reasons.clone(),
        }
    }
}

pub(crate) fn new_entry_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Scan transcript entries for the most recent approval request that was never
/// resolved.
///
/// Only the latest request is considered: a session holds at most one pending
/// approval, so an older unresolved request has been superseded.
pub fn reconcile(entries: &[TranscriptEntry]) -> Option<PendingApproval> {
    let (position, pending) = entries.iter().enumerate().rev().find_map(|(i, entry)| match entry {
        TranscriptEntry::ApprovalRequest {
            timestamp,
            command_id,
            command,
            purpose,
            risk,
            reasons,
            ..
        } => Some((
            i,
            PendingApproval {
                command_id: command_id.clone(),
                command: command.clone(),
                purpose: purpose.clone(),
                risk: *risk,
                reasons: reasons.clone(),
                requested_at: *timestamp,
            },
        )),
        _ => None,
    })?;

    let resolved = entries[position + 1..].iter().any(|entry| {
        matches!(
            entry,
            TranscriptEntry::ApprovalResolution { command_id, .. } if *command_id == pending.command_id
        )
    });
    (!resolved).then_some(pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command_id: &str, command: &str, timestamp: u64) -> TranscriptEntry {
        TranscriptEntry::ApprovalRequest {
            id: format!("e-{command_id}"),
            timestamp,
            command_id: command_id.to_string(),
            command: command.to_string(),
            purpose: String::new(),
            risk: CommandRisk::Moderate,
            reasons: vec!["moderate command: mkdir".to_string()],
        }
    }

    fn resolution(command_id: &str, outcome: ApprovalOutcome) -> TranscriptEntry {
        TranscriptEntry::ApprovalResolution {
            id: format!("r-{command_id}"),
            timestamp: 5_000,
            command_id: command_id.to_string(),
            outcome,
            user_id: Some("u1".to_string()),
            comment: None,
        }
    }

    #[test]
    fn test_entry_type_tags() {
        let entry = resolution("c1", ApprovalOutcome::Cancelled);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"type\":\"approval/resolution\""));
        assert!(json.contains("\"outcome\":\"cancelled\""));

        let parsed: TranscriptEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
        assert_eq!(parsed.id(), "r-c1");
        assert_eq!(parsed.timestamp(), 5_000);
    }

    #[test]
    fn test_transition_entry_serialization() {
        let entry = TranscriptEntry::ControlTransition {
            id: "t1".to_string(),
            timestamp: 1,
            from: SessionState::AgentControl,
            to: SessionState::UserControl,
            marker: Some(TransitionMarker::UserInterrupt),
            user_id: Some("u1".to_string()),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"type\":\"control/transition\""));
        assert!(json.contains("\"marker\":\"user_interrupt\""));
    }

    #[test]
    fn test_reconcile_finds_unresolved_request() {
        let entries = vec![
            request("c1", "mkdir /tmp/a", 1_000),
            resolution("c1", ApprovalOutcome::Approved),
            request("c2", "mkdir /tmp/b", 2_000),
        ];
        let pending = reconcile(&entries).unwrap();
        assert_eq!(pending.command_id, "c2");
        assert_eq!(pending.command, "mkdir /tmp/b");
        assert_eq!(pending.requested_at, 2_000);
        assert_eq!(pending.risk, CommandRisk::Moderate);
    }

    #[test]
    fn test_reconcile_ignores_resolved_request() {
        let entries = vec![
            request("c1", "mkdir /tmp/a", 1_000),
            resolution("c1", ApprovalOutcome::Denied),
        ];
        assert!(reconcile(&entries).is_none());
        assert!(reconcile(&[]).is_none());
    }

    #[test]
    fn test_reconcile_requires_matching_resolution() {
        let entries = vec![
            request("c2", "mkdir /tmp/b", 2_000),
            resolution("c1", ApprovalOutcome::Approved),
        ];
        assert_eq!(reconcile(&entries).unwrap().command_id, "c2");
    }

    #[test]
    fn test_reconcile_only_considers_latest_request() {
        // c1 was never resolved, but c2 came after it
        let entries = vec![
            request("c1", "mkdir /tmp/a", 1_000),
            request("c2", "mkdir /tmp/b", 2_000),
            resolution("c2", ApprovalOutcome::Cancelled),
        ];
        assert!(reconcile(&entries).is_none());
    }
}
