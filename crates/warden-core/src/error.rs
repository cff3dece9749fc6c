//! Error types for the warden-core crate.

/// Core error type for policy and configuration handling.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A permission rule carries an invalid glob.
    #[error("Invalid rule pattern '{pattern}': {message}")]
    InvalidRule { pattern: String, message: String },

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
