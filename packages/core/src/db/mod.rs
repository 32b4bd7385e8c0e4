//! Database Layer
//!
//! This module handles all database interactions using libsql:
//!
//! - Database initialization and connection management
//! - Tree-aware node reads and writes (sibling chains, subtrees, materialization)
//! - The append-only event log and the event types it stores
//!
//! # Architecture
//!
//! Outline uses an embedded libsql (SQLite-compatible) database in WAL mode.
//! Exactly one connection writes (the command processor's); every other
//! consumer reads through its own connection inside a read transaction and
//! therefore sees a consistent snapshot.

mod database;
mod error;
mod event_store;
pub mod events;
mod node_repository;

pub use database::{tx, DatabaseService};
pub use error::DatabaseError;
pub use event_store::EventStore;
pub use events::{derive_event_id, EventKind, OutlineEvent};
pub use node_repository::NodeRepository;
