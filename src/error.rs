//! Error types for relay operations

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Error types that can occur while relaying DICOM objects
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("DICOM parsing error: {0}")]
    DicomParsing(String),

    #[error("Attribute edit error: {0}")]
    Edit(#[from] cadence_edit::EditError),

    #[error("Association rejected: {0}")]
    AssociationRejected(String),

    #[error("Connection aborted: {0}")]
    ConnectionAborted(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Invalid AE Title: {0}")]
    InvalidAeTitle(String),

    #[error("Timeout occurred: {0}")]
    Timeout(String),

    #[error("Source not accepted: {0}")]
    SourceNotAccepted(String),

    #[error("Nothing to forward")]
    NoInput,

    #[error("Destination stopped")]
    Stopped,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl RelayError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new operation failed error
    pub fn operation_failed(msg: impl Into<String>) -> Self {
        Self::OperationFailed(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is recoverable by retrying on a fresh association
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RelayError::Network(_)
                | RelayError::Timeout(_)
                | RelayError::AssociationRejected(_)
                | RelayError::ConnectionAborted(_)
        )
    }
}
