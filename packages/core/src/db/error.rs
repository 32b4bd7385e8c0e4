//! Database Error Types
//!
//! Failures of the outline store. The command processor treats every one of
//! them as fatal: once the store misbehaves the writer halts instead of
//! guessing at the state of a sibling chain.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The database file could not be opened or created
    #[error("Failed to open outline store at {path}: {source}")]
    Open {
        path: PathBuf,
        source: libsql::Error,
    },

    /// The directory holding the database file could not be created
    #[error("Failed to create directory for outline store at {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Tables, indexes or pragmas could not be set up
    #[error("Failed to initialize outline schema: {0}")]
    Schema(String),

    /// A new connection could not be handed out
    #[error("Failed to connect to outline store: {0}")]
    Connect(#[source] libsql::Error),

    /// A statement failed; `context` names the repository operation
    #[error("SQL execution failed: {context}")]
    Sql { context: String },

    /// A `nodes` or `outline_events` row could not be decoded
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl DatabaseError {
    pub fn open_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::Open { path, source }
    }

    pub fn create_directory(path: PathBuf, source: std::io::Error) -> Self {
        Self::CreateDirectory { path, source }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::Sql {
            context: context.into(),
        }
    }

    pub fn corrupt_row(msg: impl Into<String>) -> Self {
        Self::CorruptRow(msg.into())
    }

    /// Whether stored data, not the store itself, is at fault
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptRow(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = DatabaseError::sql_execution("Failed to relink node 'a': boom");
        assert_eq!(
            err.to_string(),
            "SQL execution failed: Failed to relink node 'a': boom"
        );

        let err = DatabaseError::create_directory(
            PathBuf::from("/ro/outline.db"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().contains("/ro/outline.db"));
    }

    #[test]
    fn test_is_corruption() {
        assert!(DatabaseError::corrupt_row("bad timestamp").is_corruption());
        assert!(!DatabaseError::schema("no nodes table").is_corruption());
    }
}
