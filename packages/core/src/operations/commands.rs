//! Command Types
//!
//! Commands are immutable value objects describing one requested mutation.
//! They are never persisted; what gets stored is the event the processor
//! produces when it applies them.
//!
//! Commands travel as JSON between transports and the engine, tagged by
//! `"type"` with camelCase fields:
//!
//! ```json
//! {
//!   "eventId": "6f1c...",
//!   "userId": "user-1",
//!   "command": { "type": "IndentNode", "nodeId": "a3b2..." }
//! }
//! ```

use crate::db::OutlineEvent;
use crate::models::{NodePosition, Selection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a new node goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Placement {
    /// An explicit slot; the current occupant moves behind the new node
    At(NodePosition),

    /// After the current last child of `parent_id` (last root when `None`)
    ///
    /// Resolved inside the writer, so concurrent appends land one after
    /// another in submission order.
    Last {
        #[serde(default)]
        parent_id: Option<String>,
    },
}

impl Default for Placement {
    fn default() -> Self {
        Placement::At(NodePosition::root_start())
    }
}

/// One requested mutation of an outline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Command {
    InsertNode {
        /// Client-generated id; must parse as a UUID
        #[serde(default)]
        node_id: Option<String>,
        container_id: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        creator_id: Option<String>,
        #[serde(default)]
        placement: Placement,
    },

    ChangeNodeContent {
        node_id: String,
        content: String,
    },

    MoveNode {
        node_id: String,
        #[serde(default)]
        parent_id: Option<String>,
        #[serde(default)]
        prev_id: Option<String>,
    },

    IndentNode {
        node_id: String,
    },

    OutdentNode {
        node_id: String,
    },

    MoveUp {
        node_id: String,
    },

    MoveDown {
        node_id: String,
    },

    DeleteNode {
        node_id: String,
    },

    SplitNode {
        node_id: String,
        selection: Selection,
        #[serde(default)]
        new_node_id: Option<String>,
    },

    MergeNext {
        node_id: String,
    },

    MergePrev {
        node_id: String,
    },

    MoveToContainer {
        node_ids: Vec<String>,
        container_id: String,
        #[serde(default)]
        parent_id: Option<String>,
        #[serde(default)]
        prev_id: Option<String>,
    },
}

impl Command {
    /// Insert `content` as the new first root of a container
    pub fn insert(container_id: impl Into<String>, content: impl Into<String>) -> Self {
        Command::InsertNode {
            node_id: None,
            container_id: container_id.into(),
            content: content.into(),
            creator_id: None,
            placement: Placement::default(),
        }
    }

    /// Append `content` as the last child of `parent_id` (last root when `None`)
    pub fn append(
        container_id: impl Into<String>,
        parent_id: Option<String>,
        content: impl Into<String>,
    ) -> Self {
        Command::InsertNode {
            node_id: None,
            container_id: container_id.into(),
            content: content.into(),
            creator_id: None,
            placement: Placement::Last { parent_id },
        }
    }

    /// The type tag, as used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::InsertNode { .. } => "InsertNode",
            Command::ChangeNodeContent { .. } => "ChangeNodeContent",
            Command::MoveNode { .. } => "MoveNode",
            Command::IndentNode { .. } => "IndentNode",
            Command::OutdentNode { .. } => "OutdentNode",
            Command::MoveUp { .. } => "MoveUp",
            Command::MoveDown { .. } => "MoveDown",
            Command::DeleteNode { .. } => "DeleteNode",
            Command::SplitNode { .. } => "SplitNode",
            Command::MergeNext { .. } => "MergeNext",
            Command::MergePrev { .. } => "MergePrev",
            Command::MoveToContainer { .. } => "MoveToContainer",
        }
    }
}

/// A command plus the identity of its request
///
/// `event_id` doubles as the idempotency key: the processor applies a given
/// id at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub event_id: Uuid,
    pub user_id: String,
    pub command: Command,
}

impl CommandEnvelope {
    /// Wrap a command under a freshly generated event id
    pub fn new(user_id: impl Into<String>, command: Command) -> Self {
        Self::with_event_id(Uuid::new_v4(), user_id, command)
    }

    pub fn with_event_id(event_id: Uuid, user_id: impl Into<String>, command: Command) -> Self {
        Self {
            event_id,
            user_id: user_id.into(),
            command,
        }
    }
}

/// Result of a successfully processed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The mutation happened; events are in emission order
    Applied(Vec<OutlineEvent>),

    /// Valid command with nothing to do (move past a list boundary, merge
    /// without a sibling); no event was stored
    Noop,

    /// The `event_id` was applied before; nothing changed
    Duplicate,
}

impl CommandOutcome {
    pub fn events(&self) -> &[OutlineEvent] {
        match self {
            CommandOutcome::Applied(events) => events,
            CommandOutcome::Noop | CommandOutcome::Duplicate => &[],
        }
    }

    pub fn into_events(self) -> Vec<OutlineEvent> {
        match self {
            CommandOutcome::Applied(events) => events,
            CommandOutcome::Noop | CommandOutcome::Duplicate => Vec::new(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, CommandOutcome::Applied(_))
    }
}
