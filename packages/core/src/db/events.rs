//! Outline Events
//!
//! This module defines the immutable events produced by the command processor.
//! Every successfully applied command yields one or more events; each event is
//! appended to the event store and then published on the event bus.
//!
//! # Event Flow
//!
//! 1. The processor applies a command inside one transaction
//! 2. The resulting events are appended to `outline_events` in the same transaction
//! 3. After commit, events are broadcast to all subscribers
//! 4. Client sessions viewing the container (and side-effect listeners) react

use crate::models::Node;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The persisted, immutable record of an applied mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineEvent {
    /// Matches the originating command (or is derived from it)
    pub event_id: Uuid,
    pub user_id: String,
    pub container_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl OutlineEvent {
    pub fn new(
        event_id: Uuid,
        user_id: impl Into<String>,
        container_id: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            event_id,
            user_id: user_id.into(),
            container_id: container_id.into(),
            created_at: Utc::now(),
            kind,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Whether viewers of `container_id` need this event
    ///
    /// A cross-container move concerns both the target and the source outline.
    pub fn affects_container(&self, container_id: &str) -> bool {
        if self.container_id == container_id {
            return true;
        }
        matches!(
            &self.kind,
            EventKind::NodeMoved { old_container_id: Some(old), .. } if old == container_id
        )
    }
}

/// Type-specific event payloads
///
/// Nodes carried in payloads reflect their state right after the command was
/// applied (except `NodeDeleted::node`, which is the row as it was removed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventKind {
    /// A node was created; `next` is the sibling that now follows it
    NodeInserted { node: Node, next: Option<Node> },

    NodeContentChanged { node_id: String, content: String },

    /// A node was removed; `children` were reparented into its former place
    NodeDeleted {
        node: Node,
        children: Vec<Node>,
        next: Option<Node>,
    },

    /// A node changed position (and possibly container)
    NodeMoved {
        node: Node,
        old_prev: Option<Node>,
        old_next: Option<Node>,
        next: Option<Node>,
        #[serde(default)]
        children: Vec<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_container_id: Option<String>,
    },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::NodeInserted { .. } => "NodeInserted",
            EventKind::NodeContentChanged { .. } => "NodeContentChanged",
            EventKind::NodeDeleted { .. } => "NodeDeleted",
            EventKind::NodeMoved { .. } => "NodeMoved",
        }
    }
}

/// Deterministic id for the n-th additional event of a multi-event command
///
/// A retried command carrying the same `event_id` maps onto the same keys, so
/// the event store's uniqueness constraint still deduplicates it.
pub fn derive_event_id(event_id: &Uuid, label: &str) -> Uuid {
    Uuid::new_v5(event_id, label.as_bytes())
}
