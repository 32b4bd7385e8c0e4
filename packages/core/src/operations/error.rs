//! Error types for the command pipeline
//!
//! Expected conditions (missing nodes, impossible positions, bad input) are
//! returned to the submitting caller and the processor keeps running. Fatal
//! conditions mean the store can no longer be trusted: the caller still gets
//! the error, and the processor halts.
//!
//! # Examples
//!
//! ```rust
//! use outline_core::operations::OutlineError;
//!
//! let err = OutlineError::node_not_found("node-123");
//! assert_eq!(format!("{}", err), "node 'node-123' not found");
//! assert!(!err.is_fatal());
//! ```

use crate::db::DatabaseError;
use crate::models::ValidationError;
use thiserror::Error;

/// Errors that can occur while submitting or applying a command
#[derive(Error, Debug)]
pub enum OutlineError {
    /// A referenced node or container does not exist
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    /// Malformed command input (bad id, bad selection, duplicate targets)
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The requested position cannot exist in the tree
    ///
    /// Indent without a previous sibling, outdent at root level, a parent
    /// that would create a cycle, or a `prev_id` outside the target list.
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    /// `try_submit` found the command queue full
    #[error("Command queue is saturated")]
    QueueSaturated,

    /// The processor task has halted and accepts no more commands
    #[error("Command processor has stopped")]
    ProcessorStopped,

    /// Store failure (fatal)
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Event or command could not be (de)serialized (fatal)
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OutlineError {
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "node".to_string(),
            id: id.into(),
        }
    }

    pub fn container_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "container".to_string(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    pub fn invalid_position(msg: impl Into<String>) -> Self {
        Self::InvalidPosition(msg.into())
    }

    /// Whether the processor must stop after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Serialization(_))
    }
}

impl From<ValidationError> for OutlineError {
    fn from(err: ValidationError) -> Self {
        Self::ValidationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for OutlineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_messages() {
        let err = OutlineError::node_not_found("missing-node");
        assert!(matches!(err, OutlineError::NotFound { .. }));
        assert_eq!(format!("{}", err), "node 'missing-node' not found");

        let err = OutlineError::container_not_found("episode-9");
        assert_eq!(format!("{}", err), "container 'episode-9' not found");
    }

    #[test]
    fn test_expected_errors_are_not_fatal() {
        assert!(!OutlineError::node_not_found("x").is_fatal());
        assert!(!OutlineError::validation("bad").is_fatal());
        assert!(!OutlineError::invalid_position("nowhere").is_fatal());
        assert!(!OutlineError::QueueSaturated.is_fatal());
        assert!(!OutlineError::ProcessorStopped.is_fatal());
    }

    #[test]
    fn test_store_and_serialization_errors_are_fatal() {
        let err: OutlineError = DatabaseError::sql_execution("disk I/O error").into();
        assert!(err.is_fatal());
        assert_eq!(
            format!("{}", err),
            "Database error: SQL execution failed: disk I/O error"
        );

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: OutlineError = json_err.into();
        assert!(matches!(err, OutlineError::Serialization(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_validation_error_conversion() {
        let err: OutlineError = ValidationError::InvalidId("nope".to_string()).into();
        assert!(matches!(err, OutlineError::ValidationFailed(_)));
        assert!(!err.is_fatal());
    }
}
