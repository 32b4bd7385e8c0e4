//! Node Data Structures
//!
//! This module defines the core `Node` struct for the outline tree together with
//! the `NodePosition` value type used by every structural operation.
//!
//! # Architecture
//!
//! - **Pairwise links only**: order among siblings is a singly linked list
//!   over `prev_id`; there is no index column to renumber
//! - **Position as a value**: higher-level code computes a `NodePosition` and
//!   hands it to the repository instead of editing raw links
//! - **Derived depth**: `level` is never stored, it only exists on `TreeNode`
//!   while a tree is being materialized
//!
//! # Examples
//!
//! ```rust
//! use outline_core::models::{Node, NodePosition};
//!
//! let intro = Node::new("episode-42", "  Intro  ", Some("user-1".to_string()));
//! assert_eq!(intro.content, "Intro");
//!
//! // Position right after `intro` at root level
//! let position = NodePosition::after(None, &intro.id);
//! assert_eq!(position.prev_id.as_deref(), Some(intro.id.as_str()));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for Node fields
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid node ID format: {0}")]
    InvalidId(String),

    #[error("Invalid parent reference: {0}")]
    InvalidParent(String),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
}

/// One item of an outline.
///
/// # Fields
///
/// - `id`: Unique identifier (UUID), immutable and never reused
/// - `content`: Free text, trimmed on every write
/// - `container_id`: The outline this node belongs to (one per episode)
/// - `parent_id`: Parent node in the same container (`None` = root level)
/// - `prev_id`: Immediately preceding sibling (`None` = first among siblings)
/// - `creator_id`: User who created the node (`None` for system nodes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,

    pub content: String,

    pub container_id: String,

    pub parent_id: Option<String>,

    /// Sibling ordering reference (single-pointer linked list)
    pub prev_id: Option<String>,

    pub creator_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Create a new root-level, first-position node with an auto-generated UUID
    ///
    /// Content is trimmed. Use [`Node::with_position`] to place it elsewhere.
    pub fn new(
        container_id: impl Into<String>,
        content: impl AsRef<str>,
        creator_id: Option<String>,
    ) -> Self {
        Self::new_with_id(
            Uuid::new_v4().to_string(),
            container_id,
            content,
            creator_id,
        )
    }

    /// Create a new node with a caller-provided ID
    ///
    /// Clients pre-generate IDs for optimistic UI updates; the ID is validated
    /// with [`Node::validate`] before it reaches the store.
    pub fn new_with_id(
        id: impl Into<String>,
        container_id: impl Into<String>,
        content: impl AsRef<str>,
        creator_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            content: normalize_content(content.as_ref()),
            container_id: container_id.into(),
            parent_id: None,
            prev_id: None,
            creator_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder-style helper to set parent and previous sibling
    pub fn with_position(mut self, position: NodePosition) -> Self {
        self.parent_id = position.parent_id;
        self.prev_id = position.prev_id;
        self
    }

    /// The position this node currently occupies
    pub fn position(&self) -> NodePosition {
        NodePosition {
            parent_id: self.parent_id.clone(),
            prev_id: self.prev_id.clone(),
        }
    }

    /// Whether this node sits at root level
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Replace content, applying the trim rule
    pub fn set_content(&mut self, content: &str) {
        self.content = normalize_content(content);
        self.updated_at = Utc::now();
    }

    /// Field-level validation (no tree checks)
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_valid_node_id(&self.id) {
            return Err(ValidationError::InvalidId(self.id.clone()));
        }
        if self.container_id.trim().is_empty() {
            return Err(ValidationError::MissingField("container_id".to_string()));
        }
        if self.parent_id.as_deref() == Some(self.id.as_str()) {
            return Err(ValidationError::InvalidParent(format!(
                "node '{}' cannot be its own parent",
                self.id
            )));
        }
        if self.prev_id.as_deref() == Some(self.id.as_str()) {
            return Err(ValidationError::InvalidParent(format!(
                "node '{}' cannot be its own previous sibling",
                self.id
            )));
        }
        Ok(())
    }
}

/// A place in the tree: "under `parent_id`, right after `prev_id`".
///
/// `prev_id = None` means first among the children of `parent_id`;
/// `parent_id = None` means root level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePosition {
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub prev_id: Option<String>,
}

impl NodePosition {
    pub fn new(parent_id: Option<String>, prev_id: Option<String>) -> Self {
        Self { parent_id, prev_id }
    }

    /// First position at root level
    pub fn root_start() -> Self {
        Self::default()
    }

    /// First child of `parent_id`
    pub fn first_child_of(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            prev_id: None,
        }
    }

    /// Directly after `prev_id` under `parent_id`
    pub fn after(parent_id: Option<String>, prev_id: impl Into<String>) -> Self {
        Self {
            parent_id,
            prev_id: Some(prev_id.into()),
        }
    }
}

/// A node together with its depth, produced by tree materialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    #[serde(flatten)]
    pub node: Node,
    pub level: u32,
}

/// Character range inside a node's content used by split
///
/// Offsets count Unicode scalar values, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn caret(at: usize) -> Self {
        Self { start: at, end: at }
    }

    /// Split `content` into the text before `start` and the text after `end`
    pub fn split(&self, content: &str) -> Result<(String, String), ValidationError> {
        let len = content.chars().count();
        if self.start > self.end || self.end > len {
            return Err(ValidationError::InvalidSelection(format!(
                "selection {}..{} does not fit content of length {}",
                self.start, self.end, len
            )));
        }
        let before: String = content.chars().take(self.start).collect();
        let after: String = content.chars().skip(self.end).collect();
        Ok((before, after))
    }
}

/// Trim rule applied to every content write
pub fn normalize_content(content: &str) -> String {
    content.trim().to_string()
}

/// Node IDs are UUIDs
pub fn is_valid_node_id(node_id: &str) -> bool {
    Uuid::parse_str(node_id).is_ok()
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;
