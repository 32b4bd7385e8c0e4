//! Data Models
//!
//! This module contains the core data structures of the outline tree:
//!
//! - `Node` - one outline item, linked to its parent and previous sibling
//! - `NodePosition` - the `(parent_id, prev_id)` slot every structural
//!   operation computes before touching the store
//! - `TreeNode` - a node with its depth, produced by tree materialization
//! - `Selection` - a character range used when splitting a node

mod node;

pub use node::{
    is_valid_node_id, normalize_content, Node, NodePosition, Selection, TreeNode, ValidationError,
};
