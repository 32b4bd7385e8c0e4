//! Command Processor - the sole writer of outline state
//!
//! For each envelope the processor:
//!
//! 1. Opens a write transaction (`BEGIN IMMEDIATE`)
//! 2. Skips the command if its `event_id` is already in the event store
//! 3. Applies the command through [`TreeEditor`] primitives
//! 4. Appends the produced events to the event store
//! 5. Commits, then publishes the events on the [`EventBus`]
//!
//! Any error rolls the transaction back: a failed command leaves neither a
//! mutation nor an event behind.
//!
//! The processor is not `Clone` and is meant to be owned by exactly one task
//! (see [`crate::operations::spawn_processor`]); that ownership is what
//! serializes concurrent edits.

use crate::db::{derive_event_id, tx, DatabaseService, EventKind, EventStore, OutlineEvent};
use crate::models::{normalize_content, Node, NodePosition, Selection};
use crate::operations::commands::{Command, CommandEnvelope, CommandOutcome, Placement};
use crate::operations::error::OutlineError;
use crate::operations::tree_edit::TreeEditor;
use crate::services::EventBus;
use libsql::Connection;
use std::collections::HashSet;
use uuid::Uuid;

pub struct CommandProcessor {
    conn: Connection,
    event_bus: EventBus,
}

impl CommandProcessor {
    /// Open the writer connection
    pub async fn new(db: &DatabaseService, event_bus: EventBus) -> Result<Self, OutlineError> {
        let conn = db.connect_with_timeout().await?;
        Ok(Self { conn, event_bus })
    }

    /// Apply one command atomically and publish its events
    pub async fn process(&self, envelope: &CommandEnvelope) -> Result<CommandOutcome, OutlineError> {
        tx::begin_immediate(&self.conn).await?;

        let outcome = match self.apply_and_record(envelope).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tx::rollback(&self.conn).await;
                return Err(e);
            }
        };

        if let Err(e) = tx::commit(&self.conn).await {
            tx::rollback(&self.conn).await;
            return Err(e.into());
        }

        for event in outcome.events() {
            self.event_bus.emit(event.clone());
        }

        Ok(outcome)
    }

    async fn apply_and_record(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<CommandOutcome, OutlineError> {
        let store = EventStore::new(&self.conn);
        if store.contains(&envelope.event_id).await? {
            tracing::debug!(event_id = %envelope.event_id, "duplicate command skipped");
            return Ok(CommandOutcome::Duplicate);
        }

        let application = Application {
            editor: TreeEditor::new(&self.conn),
            envelope,
        };
        let events = application.apply().await?;
        if events.is_empty() {
            return Ok(CommandOutcome::Noop);
        }

        for event in &events {
            if !store.append(event).await? {
                return Err(OutlineError::validation(format!(
                    "event id '{}' has already been used",
                    event.event_id
                )));
            }
        }

        Ok(CommandOutcome::Applied(events))
    }
}

/// One command being applied inside the writer's transaction
struct Application<'a> {
    editor: TreeEditor<'a>,
    envelope: &'a CommandEnvelope,
}

impl<'a> Application<'a> {
    async fn apply(&self) -> Result<Vec<OutlineEvent>, OutlineError> {
        match &self.envelope.command {
            Command::InsertNode {
                node_id,
                container_id,
                content,
                creator_id,
                placement,
            } => {
                self.insert_node(
                    node_id.as_deref(),
                    container_id,
                    content,
                    creator_id.clone(),
                    placement,
                )
                .await
            }
            Command::ChangeNodeContent { node_id, content } => {
                self.change_content(node_id, content).await
            }
            Command::MoveNode {
                node_id,
                parent_id,
                prev_id,
            } => {
                let position = NodePosition::new(parent_id.clone(), prev_id.clone());
                self.move_node(node_id, position).await
            }
            Command::IndentNode { node_id } => self.indent(node_id).await,
            Command::OutdentNode { node_id } => self.outdent(node_id).await,
            Command::MoveUp { node_id } => self.move_up(node_id).await,
            Command::MoveDown { node_id } => self.move_down(node_id).await,
            Command::DeleteNode { node_id } => self.delete(node_id).await,
            Command::SplitNode {
                node_id,
                selection,
                new_node_id,
            } => {
                self.split(node_id, *selection, new_node_id.as_deref())
                    .await
            }
            Command::MergeNext { node_id } => self.merge_next(node_id).await,
            Command::MergePrev { node_id } => self.merge_prev(node_id).await,
            Command::MoveToContainer {
                node_ids,
                container_id,
                parent_id,
                prev_id,
            } => {
                let position = NodePosition::new(parent_id.clone(), prev_id.clone());
                self.move_to_container(node_ids, container_id, position)
                    .await
            }
        }
    }

    /// Event keyed by the envelope's `event_id`
    fn event(&self, container_id: &str, kind: EventKind) -> OutlineEvent {
        OutlineEvent::new(
            self.envelope.event_id,
            self.envelope.user_id.as_str(),
            container_id,
            kind,
        )
    }

    /// Follow-up event of a multi-event command
    fn derived_event(&self, label: &str, container_id: &str, kind: EventKind) -> OutlineEvent {
        OutlineEvent::new(
            derive_event_id(&self.envelope.event_id, label),
            self.envelope.user_id.as_str(),
            container_id,
            kind,
        )
    }

    /// Fresh id for a node about to be created, or the validated client id
    async fn new_node_id(&self, requested: Option<&str>) -> Result<String, OutlineError> {
        let Some(node_id) = requested else {
            return Ok(Uuid::new_v4().to_string());
        };
        if Uuid::parse_str(node_id).is_err() {
            return Err(OutlineError::validation(format!(
                "node id '{}' is not a UUID",
                node_id
            )));
        }
        if self.editor.repo().get(node_id).await?.is_some() {
            return Err(OutlineError::validation(format!(
                "node '{}' already exists",
                node_id
            )));
        }
        Ok(node_id.to_string())
    }

    async fn insert_node(
        &self,
        node_id: Option<&str>,
        container_id: &str,
        content: &str,
        creator_id: Option<String>,
        placement: &Placement,
    ) -> Result<Vec<OutlineEvent>, OutlineError> {
        self.editor.require_container(container_id).await?;
        let node_id = self.new_node_id(node_id).await?;

        let position = match placement {
            Placement::At(position) => {
                self.editor
                    .validate_position(None, container_id, position)
                    .await?;
                position.clone()
            }
            Placement::Last { parent_id } => {
                let parent_only = NodePosition::new(parent_id.clone(), None);
                self.editor
                    .validate_position(None, container_id, &parent_only)
                    .await?;
                let last = self
                    .editor
                    .repo()
                    .last_sibling(container_id, parent_id.as_deref())
                    .await?;
                NodePosition::new(parent_id.clone(), last.map(|n| n.id))
            }
        };

        let node = Node::new_with_id(node_id, container_id, content, creator_id)
            .with_position(position);
        node.validate()?;
        let next = self.editor.insert(&node).await?;

        Ok(vec![self.event(
            container_id,
            EventKind::NodeInserted { node, next },
        )])
    }

    async fn change_content(
        &self,
        node_id: &str,
        content: &str,
    ) -> Result<Vec<OutlineEvent>, OutlineError> {
        let node = self.editor.require_node(node_id).await?;
        let content = normalize_content(content);
        self.editor
            .repo()
            .update_content(&node.id, &content)
            .await?
            .ok_or_else(|| OutlineError::node_not_found(node_id))?;

        Ok(vec![self.event(
            &node.container_id,
            EventKind::NodeContentChanged {
                node_id: node.id.clone(),
                content,
            },
        )])
    }

    async fn move_node(
        &self,
        node_id: &str,
        position: NodePosition,
    ) -> Result<Vec<OutlineEvent>, OutlineError> {
        let node = self.editor.require_node(node_id).await?;
        self.editor
            .validate_position(Some(&node), &node.container_id, &position)
            .await?;
        let moved = self.editor.move_within(&node, &position).await?;

        Ok(vec![self.event(
            &node.container_id,
            EventKind::NodeMoved {
                node: moved.node,
                old_prev: moved.old_prev,
                old_next: moved.old_next,
                next: moved.next,
                children: Vec::new(),
                old_container_id: None,
            },
        )])
    }

    /// The previous sibling becomes the parent; the node becomes its last child
    async fn indent(&self, node_id: &str) -> Result<Vec<OutlineEvent>, OutlineError> {
        let node = self.editor.require_node(node_id).await?;
        let prev = self
            .editor
            .repo()
            .prev_sibling(&node)
            .await?
            .ok_or_else(|| {
                OutlineError::invalid_position(format!(
                    "node '{}' has no previous sibling to indent under",
                    node_id
                ))
            })?;
        let last_child = self
            .editor
            .repo()
            .last_sibling(&node.container_id, Some(&prev.id))
            .await?;

        let position = NodePosition::new(Some(prev.id), last_child.map(|n| n.id));
        self.move_node(node_id, position).await
    }

    /// The node follows its parent; its younger siblings become its children
    async fn outdent(&self, node_id: &str) -> Result<Vec<OutlineEvent>, OutlineError> {
        let repo = self.editor.repo();
        let node = self.editor.require_node(node_id).await?;
        let parent_id = node.parent_id.clone().ok_or_else(|| {
            OutlineError::invalid_position(format!("node '{}' is already at root level", node_id))
        })?;
        let parent = self.editor.require_node(&parent_id).await?;

        let younger: Vec<Node> = repo
            .ordered_siblings(&node.container_id, Some(&parent_id))
            .await?
            .into_iter()
            .skip_while(|sibling| sibling.id != node.id)
            .skip(1)
            .collect();

        // Younger siblings keep their chain and hang off the node's last child
        let mut children = Vec::with_capacity(younger.len());
        if !younger.is_empty() {
            let last_child = repo.last_sibling(&node.container_id, Some(&node.id)).await?;
            for (index, sibling) in younger.iter().enumerate() {
                let prev_id = if index == 0 {
                    last_child.as_ref().map(|n| n.id.as_str())
                } else {
                    sibling.prev_id.as_deref()
                };
                children.push(repo.relink(&sibling.id, Some(&node.id), prev_id).await?);
            }
        }

        let old_prev = repo.prev_sibling(&node).await?;
        let position = NodePosition::after(parent.parent_id.clone(), parent.id.clone());
        let (moved, next) = self
            .editor
            .attach(&node.id, &node.container_id, &position)
            .await?;

        Ok(vec![self.event(
            &node.container_id,
            EventKind::NodeMoved {
                node: moved,
                old_prev: self.editor.refetch(old_prev).await?,
                old_next: None,
                next,
                children,
                old_container_id: None,
            },
        )])
    }

    async fn move_up(&self, node_id: &str) -> Result<Vec<OutlineEvent>, OutlineError> {
        let node = self.editor.require_node(node_id).await?;
        let Some(prev) = self.editor.repo().prev_sibling(&node).await? else {
            tracing::debug!(node_id, "already first among siblings");
            return Ok(Vec::new());
        };
        let position = NodePosition::new(node.parent_id.clone(), prev.prev_id);
        self.move_node(node_id, position).await
    }

    async fn move_down(&self, node_id: &str) -> Result<Vec<OutlineEvent>, OutlineError> {
        let node = self.editor.require_node(node_id).await?;
        let Some(next) = self.editor.repo().next_sibling(&node).await? else {
            tracing::debug!(node_id, "already last among siblings");
            return Ok(Vec::new());
        };
        let position = NodePosition::after(node.parent_id.clone(), next.id);
        self.move_node(node_id, position).await
    }

    async fn delete(&self, node_id: &str) -> Result<Vec<OutlineEvent>, OutlineError> {
        let node = self.editor.require_node(node_id).await?;
        let (children, next) = self.editor.remove(&node).await?;

        Ok(vec![self.event(
            &node.container_id,
            EventKind::NodeDeleted {
                node: node.clone(),
                children,
                next,
            },
        )])
    }

    /// Keep the text before the selection; a new next sibling takes the text after it
    async fn split(
        &self,
        node_id: &str,
        selection: Selection,
        new_node_id: Option<&str>,
    ) -> Result<Vec<OutlineEvent>, OutlineError> {
        let node = self.editor.require_node(node_id).await?;
        let (before, after) = selection.split(&node.content)?;
        let new_id = self.new_node_id(new_node_id).await?;

        let new_node = Node::new_with_id(
            new_id,
            node.container_id.as_str(),
            &after,
            Some(self.envelope.user_id.clone()),
        )
        .with_position(NodePosition::after(node.parent_id.clone(), node.id.clone()));
        let next = self.editor.insert(&new_node).await?;

        let before = normalize_content(&before);
        self.editor
            .repo()
            .update_content(&node.id, &before)
            .await?
            .ok_or_else(|| OutlineError::node_not_found(node_id))?;

        Ok(vec![
            self.event(
                &node.container_id,
                EventKind::NodeInserted {
                    node: new_node,
                    next,
                },
            ),
            self.derived_event(
                "split",
                &node.container_id,
                EventKind::NodeContentChanged {
                    node_id: node.id.clone(),
                    content: before,
                },
            ),
        ])
    }

    /// Append the node's content to its previous sibling and remove the node
    async fn merge_prev(&self, node_id: &str) -> Result<Vec<OutlineEvent>, OutlineError> {
        let node = self.editor.require_node(node_id).await?;
        let Some(prev) = self.editor.repo().prev_sibling(&node).await? else {
            tracing::debug!(node_id, "no previous sibling to merge into");
            return Ok(Vec::new());
        };
        self.merge(prev, node).await
    }

    /// Append the next sibling's content to the node and remove the sibling
    async fn merge_next(&self, node_id: &str) -> Result<Vec<OutlineEvent>, OutlineError> {
        let node = self.editor.require_node(node_id).await?;
        let Some(next) = self.editor.repo().next_sibling(&node).await? else {
            tracing::debug!(node_id, "no next sibling to merge");
            return Ok(Vec::new());
        };
        self.merge(node, next).await
    }

    async fn merge(&self, survivor: Node, absorbed: Node) -> Result<Vec<OutlineEvent>, OutlineError> {
        let content = normalize_content(&format!("{}{}", survivor.content, absorbed.content));
        self.editor
            .repo()
            .update_content(&survivor.id, &content)
            .await?
            .ok_or_else(|| OutlineError::node_not_found(survivor.id.as_str()))?;
        let (children, next) = self.editor.remove(&absorbed).await?;

        Ok(vec![
            self.event(
                &survivor.container_id,
                EventKind::NodeContentChanged {
                    node_id: survivor.id.clone(),
                    content,
                },
            ),
            self.derived_event(
                "merge",
                &absorbed.container_id,
                EventKind::NodeDeleted {
                    node: absorbed.clone(),
                    children,
                    next,
                },
            ),
        ])
    }

    /// Move whole subtrees into another container, consecutively at `position`
    async fn move_to_container(
        &self,
        node_ids: &[String],
        container_id: &str,
        position: NodePosition,
    ) -> Result<Vec<OutlineEvent>, OutlineError> {
        let repo = self.editor.repo();
        if node_ids.is_empty() {
            return Err(OutlineError::validation("no nodes to move"));
        }
        let moving: HashSet<&str> = node_ids.iter().map(String::as_str).collect();
        if moving.len() != node_ids.len() {
            return Err(OutlineError::validation("node ids must be distinct"));
        }
        self.editor.require_container(container_id).await?;

        for node_id in node_ids {
            self.editor.require_node(node_id).await?;
            let ancestors = repo.ancestors(node_id).await?;
            if let Some(ancestor) = ancestors.iter().find(|a| moving.contains(a.id.as_str())) {
                return Err(OutlineError::validation(format!(
                    "node '{}' is a descendant of '{}', which is also being moved",
                    node_id, ancestor.id
                )));
            }
        }

        self.editor
            .validate_position(None, container_id, &position)
            .await?;
        if let Some(parent_id) = position.parent_id.as_deref() {
            let ancestors = repo.ancestors(parent_id).await?;
            let inside_moved_subtree = moving.contains(parent_id)
                || ancestors.iter().any(|a| moving.contains(a.id.as_str()));
            if inside_moved_subtree {
                return Err(OutlineError::invalid_position(format!(
                    "target parent '{}' is inside a moved subtree",
                    parent_id
                )));
            }
        }
        if let Some(prev_id) = position.prev_id.as_deref() {
            if moving.contains(prev_id) {
                return Err(OutlineError::invalid_position(format!(
                    "target prev '{}' is one of the moved nodes",
                    prev_id
                )));
            }
        }

        let mut events = Vec::with_capacity(node_ids.len());
        let mut cursor = position.prev_id.clone();
        for (index, node_id) in node_ids.iter().enumerate() {
            // Re-read: detaching an earlier node may have relinked this one
            let node = self.editor.require_node(node_id).await?;
            let old_prev = repo.prev_sibling(&node).await?;
            let old_next = self.editor.detach(&node).await?;

            let mut subtree: Vec<String> = vec![node.id.clone()];
            subtree.extend(
                repo.children_recursive(&node.container_id, &node.id)
                    .await?
                    .into_iter()
                    .map(|n| n.id),
            );
            repo.set_container(&subtree, container_id).await?;

            let target = NodePosition::new(position.parent_id.clone(), cursor.clone());
            let (moved, next) = self.editor.attach(&node.id, container_id, &target).await?;
            cursor = Some(node.id.clone());

            let kind = EventKind::NodeMoved {
                node: moved,
                old_prev: self.editor.refetch(old_prev).await?,
                old_next: self.editor.refetch(old_next).await?,
                next,
                children: Vec::new(),
                old_container_id: Some(node.container_id.clone()),
            };
            events.push(if index == 0 {
                self.event(container_id, kind)
            } else {
                self.derived_event(&format!("move-to-container:{}", index), container_id, kind)
            });
        }

        Ok(events)
    }
}

#[cfg(test)]
#[path = "processor_test.rs"]
mod processor_test;
