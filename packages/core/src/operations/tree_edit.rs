//! Structural edit primitives shared by the command handlers
//!
//! Every handler is expressed in terms of four steps: validate a target
//! [`NodePosition`], detach a node from its chain, attach it at a position,
//! and remove a node while handing its children to its parent. The helpers
//! run inside the processor's transaction; intermediate states (two siblings
//! briefly sharing a `prev_id`) are never visible outside it.

use crate::db::NodeRepository;
use crate::models::{Node, NodePosition};
use crate::operations::error::OutlineError;
use libsql::Connection;

pub(crate) struct TreeEditor<'a> {
    repo: NodeRepository<'a>,
}

impl<'a> TreeEditor<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            repo: NodeRepository::new(conn),
        }
    }

    pub fn repo(&self) -> &NodeRepository<'a> {
        &self.repo
    }

    pub async fn require_node(&self, node_id: &str) -> Result<Node, OutlineError> {
        self.repo
            .get(node_id)
            .await?
            .ok_or_else(|| OutlineError::node_not_found(node_id))
    }

    pub async fn require_container(&self, container_id: &str) -> Result<(), OutlineError> {
        if self.repo.container_exists(container_id).await? {
            Ok(())
        } else {
            Err(OutlineError::container_not_found(container_id))
        }
    }

    /// Current state of a node fetched earlier in the transaction
    pub async fn refetch(&self, node: Option<Node>) -> Result<Option<Node>, OutlineError> {
        match node {
            Some(node) => Ok(self.repo.get(&node.id).await?),
            None => Ok(None),
        }
    }

    /// Check that `position` is a legal slot in `container_id` for `moving`
    ///
    /// `moving` is `None` for nodes that do not exist yet. The parent must be
    /// a node of the container and must not be `moving` or one of its
    /// descendants; `prev_id` must be a child of that parent.
    pub async fn validate_position(
        &self,
        moving: Option<&Node>,
        container_id: &str,
        position: &NodePosition,
    ) -> Result<(), OutlineError> {
        if let Some(parent_id) = position.parent_id.as_deref() {
            let parent = self.require_node(parent_id).await?;
            if parent.container_id != container_id {
                return Err(OutlineError::invalid_position(format!(
                    "parent '{}' belongs to container '{}'",
                    parent_id, parent.container_id
                )));
            }
            if let Some(node) = moving {
                if parent.id == node.id {
                    return Err(OutlineError::invalid_position(format!(
                        "node '{}' cannot be its own parent",
                        node.id
                    )));
                }
                let ancestors = self.repo.ancestors(&parent.id).await?;
                if ancestors.iter().any(|a| a.id == node.id) {
                    return Err(OutlineError::invalid_position(format!(
                        "node '{}' cannot move under its own descendant '{}'",
                        node.id, parent.id
                    )));
                }
            }
        }

        if let Some(prev_id) = position.prev_id.as_deref() {
            if moving.is_some_and(|node| node.id == prev_id) {
                return Err(OutlineError::invalid_position(format!(
                    "node '{}' cannot follow itself",
                    prev_id
                )));
            }
            let prev = self.require_node(prev_id).await?;
            if prev.container_id != container_id || prev.parent_id != position.parent_id {
                return Err(OutlineError::invalid_position(format!(
                    "'{}' is not a sibling at the requested position",
                    prev_id
                )));
            }
        }

        Ok(())
    }

    /// Close the gap `node` leaves: its next sibling takes over its `prev_id`
    ///
    /// Returns the former next sibling as relinked. The node's own row is left
    /// untouched.
    pub async fn detach(&self, node: &Node) -> Result<Option<Node>, OutlineError> {
        match self.repo.next_sibling(node).await? {
            Some(next) => Ok(Some(
                self.repo
                    .relink(
                        &next.id,
                        next.parent_id.as_deref(),
                        node.prev_id.as_deref(),
                    )
                    .await?,
            )),
            None => Ok(None),
        }
    }

    /// Put an existing node at `position`; the slot's occupant moves behind it
    ///
    /// Returns the relinked node and its new next sibling.
    pub async fn attach(
        &self,
        node_id: &str,
        container_id: &str,
        position: &NodePosition,
    ) -> Result<(Node, Option<Node>), OutlineError> {
        let occupant = self
            .repo
            .find_by_position_excluding(container_id, position, node_id)
            .await?;
        let node = self.repo.relink_to(node_id, position).await?;
        let next = self.follow(occupant, &node).await?;
        Ok((node, next))
    }

    /// Insert a new row at its own position; the slot's occupant moves behind it
    pub async fn insert(&self, node: &Node) -> Result<Option<Node>, OutlineError> {
        let occupant = self
            .repo
            .find_by_parent_and_prev(
                &node.container_id,
                node.parent_id.as_deref(),
                node.prev_id.as_deref(),
            )
            .await?;
        self.repo.insert(node).await?;
        self.follow(occupant, node).await
    }

    /// Detach and re-attach a node within its container
    ///
    /// Every node in the result is in its post-move state.
    pub async fn move_within(
        &self,
        node: &Node,
        position: &NodePosition,
    ) -> Result<MoveResult, OutlineError> {
        let old_prev = self.repo.prev_sibling(node).await?;
        let old_next = self.detach(node).await?;
        let (moved, next) = self.attach(&node.id, &node.container_id, position).await?;
        Ok(MoveResult {
            node: moved,
            old_prev: self.refetch(old_prev).await?,
            old_next: self.refetch(old_next).await?,
            next,
        })
    }

    /// Remove `node`, handing its children to its parent in its place
    ///
    /// The children form a contiguous run at the node's former position in
    /// their original order; the former next sibling follows the last child
    /// (or the node's former prev when it had no children). Returns the
    /// reparented children and the relinked next sibling.
    pub async fn remove(&self, node: &Node) -> Result<(Vec<Node>, Option<Node>), OutlineError> {
        let children = self
            .repo
            .ordered_siblings(&node.container_id, Some(&node.id))
            .await?;
        let next = self.repo.next_sibling(node).await?;

        let mut reparented = Vec::with_capacity(children.len());
        for (index, child) in children.iter().enumerate() {
            let prev_id = if index == 0 {
                node.prev_id.as_deref()
            } else {
                child.prev_id.as_deref()
            };
            reparented.push(
                self.repo
                    .relink(&child.id, node.parent_id.as_deref(), prev_id)
                    .await?,
            );
        }

        let tail = reparented
            .last()
            .map(|child| child.id.clone())
            .or_else(|| node.prev_id.clone());
        let next = match next {
            Some(next) => Some(
                self.repo
                    .relink(&next.id, next.parent_id.as_deref(), tail.as_deref())
                    .await?,
            ),
            None => None,
        };

        self.repo.delete(&node.id).await?;
        Ok((reparented, next))
    }

    async fn follow(
        &self,
        occupant: Option<Node>,
        node: &Node,
    ) -> Result<Option<Node>, OutlineError> {
        match occupant {
            Some(occupant) => Ok(Some(
                self.repo
                    .relink(&occupant.id, occupant.parent_id.as_deref(), Some(&node.id))
                    .await?,
            )),
            None => Ok(None),
        }
    }
}

pub(crate) struct MoveResult {
    pub node: Node,
    pub old_prev: Option<Node>,
    pub old_next: Option<Node>,
    pub next: Option<Node>,
}
