//! Error types for the warden-session crate.

use crate::session::SessionState;

/// Errors that can occur in session management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Session not found
    #[error("Session not found: {0}")]
    NotFound(String),

    /// No queue record with this command id
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// Nothing awaiting approval (already resolved, cancelled, or wrong command id)
    #[error("No pending approval for session {0}")]
    NoPendingApproval(String),

    /// The session state machine does not allow this transition
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// Invalid transcript format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Execution queue error
    #[error(transparent)]
    Queue(#[from] warden_queue::QueueError),

    /// Policy configuration error
    #[error(transparent)]
    Policy(#[from] warden_core::CoreError),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
