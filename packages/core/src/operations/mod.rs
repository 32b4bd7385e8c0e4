//! Command Pipeline
//!
//! This module turns requested mutations into applied, persisted events:
//!
//! - [`commands`] - `Command`, `CommandEnvelope` and `CommandOutcome`
//! - [`processor`] - the sole writer, one command per transaction
//! - [`queue`] - bounded single-consumer queue feeding the processor
//! - [`error`] - the `OutlineError` taxonomy returned to submitters
//!
//! # Data flow
//!
//! ```text
//! caller -> CommandQueue -> CommandProcessor -> (nodes + outline_events, one tx) -> EventBus
//! ```

pub mod commands;
pub mod error;
pub mod processor;
pub mod queue;
mod tree_edit;

pub use commands::{Command, CommandEnvelope, CommandOutcome, Placement};
pub use error::OutlineError;
pub use processor::CommandProcessor;
pub use queue::{spawn_processor, CommandQueue, PendingCommand};
