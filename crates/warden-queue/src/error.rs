//! Error types for the warden-queue crate.

use crate::execution::ExecutionState;

/// Errors that can occur in the execution queue and its backing store.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No record with this command id
    #[error("Command not found: {0}")]
    NotFound(String),

    /// A record with this command id already exists
    #[error("Command already queued: {0}")]
    Duplicate(String),

    /// The record is not in a state that allows the requested transition
    #[error("Invalid transition for {command_id}: {from} -> {to}")]
    InvalidTransition {
        command_id: String,
        from: ExecutionState,
        to: ExecutionState,
    },

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
