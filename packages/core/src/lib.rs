//! Outline Core - collaborative outline mutation engine
//!
//! This crate keeps per-episode outlines (trees of text nodes) consistent while
//! many users edit them at once.
//!
//! # Architecture
//!
//! - **Linked siblings**: order is a `prev_id` chain per parent, no index column
//! - **Single writer**: every mutation is a command applied by one task, one
//!   transaction at a time, so concurrent edits serialize without locks
//! - **Events**: each applied command yields immutable events that are stored
//!   in an append-only log and broadcast to subscribers after commit
//! - **libsql**: embedded SQLite-compatible store in WAL mode
//!
//! # Modules
//!
//! - [`models`] - Node, NodePosition, TreeNode, Selection
//! - [`db`] - database service, node repository, event store and event types
//! - [`operations`] - commands, processor, queue and error taxonomy
//! - [`services`] - event bus and the `OutlineService` façade
//! - [`config`] - runtime configuration

pub mod config;
pub mod constants;
pub mod db;
pub mod models;
pub mod operations;
pub mod services;

// Re-export commonly used types
pub use config::{ConfigError, OutlineConfig};
pub use db::{DatabaseError, EventKind, OutlineEvent};
pub use models::*;
pub use operations::{Command, CommandEnvelope, CommandOutcome, OutlineError, Placement};
pub use services::{EventBus, EventListener, OutlineService};
