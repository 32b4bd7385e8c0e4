//! Node Repository - tree-aware reads and writes over the `nodes` table
//!
//! The repository is the only place that knows how sibling order is encoded:
//! a singly linked list over `prev_id` per `(container_id, parent_id)` group.
//! It has no knowledge of commands or events and performs no invariant checks
//! on writes; callers compute a coherent [`NodePosition`] first.
//!
//! The repository borrows a connection instead of opening its own, so the same
//! code serves the writer (inside its transaction) and snapshot readers.
//!
//! # Tree reconstruction
//!
//! [`NodeRepository::materialize_tree`] runs in two passes:
//!
//! 1. A recursive CTE joins children to parents starting at the roots and
//!    yields every reachable node with its depth. This fixes ancestry only;
//!    rows come back in no particular sibling order.
//! 2. An in-memory pass groups rows by parent, walks each group's `prev_id`
//!    chain from its head and emits a depth-first, pre-order list.
//!
//! The CTE has no depth cap: a node on a parent cycle or under a missing
//! parent is never reached from a root, so recursion always ends. Such nodes
//! are found by a second query and appended after the forest at level 0.

use crate::db::error::DatabaseError;
use crate::models::{Node, NodePosition, TreeNode};
use chrono::{DateTime, Utc};
use libsql::{Connection, Row};
use std::collections::{HashMap, HashSet, VecDeque};

/// Column list shared by every node query; `node_from_row` relies on this order
const NODE_COLUMNS: &str =
    "id, content, container_id, parent_id, prev_id, creator_id, created_at, updated_at";

/// Tree-aware operations over one borrowed connection
pub struct NodeRepository<'a> {
    conn: &'a Connection,
}

impl<'a> NodeRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    //
    // READS
    //

    pub async fn get(&self, node_id: &str) -> Result<Option<Node>, DatabaseError> {
        let sql = format!("SELECT {} FROM nodes WHERE id = ?", NODE_COLUMNS);
        let mut rows = self
            .conn
            .query(&sql, [node_id])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to get node: {}", e)))?;
        next_node(&mut rows).await
    }

    /// The unique node occupying `(parent_id, prev_id)` in a container
    pub async fn find_by_parent_and_prev(
        &self,
        container_id: &str,
        parent_id: Option<&str>,
        prev_id: Option<&str>,
    ) -> Result<Option<Node>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE container_id = ? AND parent_id IS ? AND prev_id IS ? LIMIT 1",
            NODE_COLUMNS
        );
        let mut rows = self
            .conn
            .query(&sql, (container_id, parent_id, prev_id))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to find node by position: {}", e))
            })?;
        next_node(&mut rows).await
    }

    /// Like [`Self::find_by_parent_and_prev`], ignoring `exclude_id`
    ///
    /// While a node is being moved its row still carries its old links, so it
    /// can collide with the slot it is leaving.
    pub async fn find_by_position_excluding(
        &self,
        container_id: &str,
        position: &NodePosition,
        exclude_id: &str,
    ) -> Result<Option<Node>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM nodes
             WHERE container_id = ? AND parent_id IS ? AND prev_id IS ? AND id != ?
             LIMIT 1",
            NODE_COLUMNS
        );
        let mut rows = self
            .conn
            .query(
                &sql,
                (
                    container_id,
                    position.parent_id.as_deref(),
                    position.prev_id.as_deref(),
                    exclude_id,
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to find node by position: {}", e))
            })?;
        next_node(&mut rows).await
    }

    /// All children of `parent_id` (roots when `None`), in no particular order
    pub async fn siblings(
        &self,
        container_id: &str,
        parent_id: Option<&str>,
    ) -> Result<Vec<Node>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE container_id = ? AND parent_id IS ?",
            NODE_COLUMNS
        );
        let rows = self
            .conn
            .query(&sql, (container_id, parent_id))
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch siblings: {}", e)))?;
        collect_nodes(rows).await
    }

    /// Children of `parent_id` in chain order
    pub async fn ordered_siblings(
        &self,
        container_id: &str,
        parent_id: Option<&str>,
    ) -> Result<Vec<Node>, DatabaseError> {
        let siblings = self.siblings(container_id, parent_id).await?;
        Ok(order_sibling_chain(siblings))
    }

    /// The sibling no other sibling points to
    pub async fn last_sibling(
        &self,
        container_id: &str,
        parent_id: Option<&str>,
    ) -> Result<Option<Node>, DatabaseError> {
        let sql = format!(
            "SELECT {cols} FROM nodes AS n
             WHERE n.container_id = ?1 AND n.parent_id IS ?2
               AND NOT EXISTS (
                   SELECT 1 FROM nodes AS m
                   WHERE m.container_id = ?1 AND m.parent_id IS ?2 AND m.prev_id = n.id
               )
             LIMIT 1",
            cols = NODE_COLUMNS
        );
        let mut rows = self
            .conn
            .query(&sql, (container_id, parent_id))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to find last sibling: {}", e))
            })?;
        next_node(&mut rows).await
    }

    pub async fn next_sibling(&self, node: &Node) -> Result<Option<Node>, DatabaseError> {
        self.find_by_parent_and_prev(
            &node.container_id,
            node.parent_id.as_deref(),
            Some(&node.id),
        )
        .await
    }

    pub async fn prev_sibling(&self, node: &Node) -> Result<Option<Node>, DatabaseError> {
        match node.prev_id.as_deref() {
            Some(prev_id) => self.get(prev_id).await,
            None => Ok(None),
        }
    }

    /// All descendants of `node_id` within a container, breadth first, each
    /// level in chain order
    pub async fn children_recursive(
        &self,
        container_id: &str,
        node_id: &str,
    ) -> Result<Vec<Node>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE container_id = ? AND parent_id = ?",
            NODE_COLUMNS
        );
        let mut descendants = Vec::new();
        let mut seen: HashSet<String> = HashSet::from([node_id.to_string()]);
        let mut queue: VecDeque<String> = VecDeque::from([node_id.to_string()]);

        while let Some(parent_id) = queue.pop_front() {
            let rows = self
                .conn
                .query(&sql, [container_id, parent_id.as_str()])
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to fetch children: {}", e))
                })?;
            for child in order_sibling_chain(collect_nodes(rows).await?) {
                if seen.insert(child.id.clone()) {
                    queue.push_back(child.id.clone());
                    descendants.push(child);
                }
            }
        }

        Ok(descendants)
    }

    /// Parent chain of `node_id`, nearest first; stops early on a cycle
    pub async fn ancestors(&self, node_id: &str) -> Result<Vec<Node>, DatabaseError> {
        let mut ancestors = Vec::new();
        let mut seen: HashSet<String> = HashSet::from([node_id.to_string()]);
        let mut current = self.get(node_id).await?.and_then(|n| n.parent_id);

        while let Some(parent_id) = current {
            if !seen.insert(parent_id.clone()) {
                tracing::warn!(node_id, parent_id, "parent cycle detected");
                break;
            }
            match self.get(&parent_id).await? {
                Some(parent) => {
                    current = parent.parent_id.clone();
                    ancestors.push(parent);
                }
                None => break,
            }
        }

        Ok(ancestors)
    }

    /// Reconstruct the ordered forest of a container as a pre-order list
    ///
    /// Nodes unreachable from a root (corrupt ancestry) are logged and
    /// appended at the end in id order.
    pub async fn materialize_tree(&self, container_id: &str) -> Result<Vec<TreeNode>, DatabaseError> {
        let sql = format!(
            "WITH RECURSIVE tree(id, level) AS (
                 SELECT id, 0 FROM nodes WHERE container_id = ?1 AND parent_id IS NULL
                 UNION ALL
                 SELECT n.id, tree.level + 1
                 FROM nodes AS n JOIN tree ON n.parent_id = tree.id
                 WHERE n.container_id = ?1
             )
             SELECT {cols}, tree.level
             FROM tree JOIN nodes ON nodes.id = tree.id",
            cols = NODE_COLUMNS
                .split(", ")
                .map(|c| format!("nodes.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut rows = self
            .conn
            .query(&sql, [container_id])
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to materialize tree: {}", e))
            })?;

        let mut levels: HashMap<String, u32> = HashMap::new();
        let mut groups: HashMap<Option<String>, Vec<Node>> = HashMap::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            let node = node_from_row(&row)?;
            let level: i64 = row.get(8).map_err(|e| DatabaseError::corrupt_row(e.to_string()))?;
            if levels.insert(node.id.clone(), level as u32).is_some() {
                continue;
            }
            groups.entry(node.parent_id.clone()).or_default().push(node);
        }

        let mut tree = flatten_forest(groups, &levels);
        if self.count_in_container(container_id).await? > tree.len() {
            let mut unreachable: Vec<Node> = self
                .all_in_container(container_id)
                .await?
                .into_iter()
                .filter(|n| !levels.contains_key(&n.id))
                .collect();
            unreachable.sort_by(|a, b| a.id.cmp(&b.id));
            tracing::warn!(
                container_id,
                unreachable = unreachable.len(),
                "nodes not reachable from a root; appending at level 0"
            );
            tree.extend(unreachable.into_iter().map(|node| TreeNode { node, level: 0 }));
        }

        Ok(tree)
    }

    async fn count_in_container(&self, container_id: &str) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM nodes WHERE container_id = ?", [container_id])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to count nodes: {}", e)))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
            .ok_or_else(|| DatabaseError::corrupt_row("COUNT(*) returned no row"))?;
        let count: i64 = row.get(0).map_err(|e| DatabaseError::corrupt_row(e.to_string()))?;
        Ok(count as usize)
    }

    async fn all_in_container(&self, container_id: &str) -> Result<Vec<Node>, DatabaseError> {
        let sql = format!("SELECT {} FROM nodes WHERE container_id = ?", NODE_COLUMNS);
        let rows = self
            .conn
            .query(&sql, [container_id])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to list nodes: {}", e)))?;
        collect_nodes(rows).await
    }

    //
    // WRITES (no invariant checks)
    //

    pub async fn insert(&self, node: &Node) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO nodes (id, content, container_id, parent_id, prev_id, creator_id, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    node.id.as_str(),
                    node.content.as_str(),
                    node.container_id.as_str(),
                    node.parent_id.as_deref(),
                    node.prev_id.as_deref(),
                    node.creator_id.as_deref(),
                    node.created_at.to_rfc3339(),
                    node.updated_at.to_rfc3339(),
                ),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert node: {}", e)))?;
        Ok(())
    }

    /// Store already-normalized content; `None` if the node does not exist
    pub async fn update_content(
        &self,
        node_id: &str,
        content: &str,
    ) -> Result<Option<Node>, DatabaseError> {
        let rows_affected = self
            .conn
            .execute(
                "UPDATE nodes SET content = ?, updated_at = ? WHERE id = ?",
                (content, Utc::now().to_rfc3339(), node_id),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to update content: {}", e))
            })?;

        if rows_affected == 0 {
            return Ok(None);
        }
        self.get(node_id).await
    }

    /// Low-level pointer update: set `parent_id` and `prev_id` verbatim
    pub async fn relink(
        &self,
        node_id: &str,
        parent_id: Option<&str>,
        prev_id: Option<&str>,
    ) -> Result<Node, DatabaseError> {
        let rows_affected = self
            .conn
            .execute(
                "UPDATE nodes SET parent_id = ?, prev_id = ?, updated_at = ? WHERE id = ?",
                (parent_id, prev_id, Utc::now().to_rfc3339(), node_id),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to relink node: {}", e)))?;

        if rows_affected == 0 {
            return Err(DatabaseError::sql_execution(format!(
                "Failed to relink node: '{}' does not exist",
                node_id
            )));
        }
        self.get(node_id).await?.ok_or_else(|| {
            DatabaseError::sql_execution(format!("Node '{}' vanished after relink", node_id))
        })
    }

    /// Relink to a position value
    pub async fn relink_to(
        &self,
        node_id: &str,
        position: &NodePosition,
    ) -> Result<Node, DatabaseError> {
        self.relink(
            node_id,
            position.parent_id.as_deref(),
            position.prev_id.as_deref(),
        )
        .await
    }

    /// Move rows to another container without touching their links
    pub async fn set_container(
        &self,
        node_ids: &[String],
        container_id: &str,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        for node_id in node_ids {
            self.conn
                .execute(
                    "UPDATE nodes SET container_id = ?, updated_at = ? WHERE id = ?",
                    (container_id, now.as_str(), node_id.as_str()),
                )
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to change container: {}", e))
                })?;
        }
        Ok(())
    }

    /// Remove a row; `false` if it did not exist
    pub async fn delete(&self, node_id: &str) -> Result<bool, DatabaseError> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM nodes WHERE id = ?", [node_id])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to delete node: {}", e)))?;
        Ok(rows_affected > 0)
    }

    pub async fn container_exists(&self, container_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM containers WHERE id = ?", [container_id])
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to look up container: {}", e))
            })?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?;
        Ok(row.is_some())
    }
}

/// Order one sibling group by walking its `prev_id` chain from the head
///
/// Nodes the walk cannot reach (a broken or duplicated link) are appended in id
/// order so no row silently disappears from a materialized tree.
pub(crate) fn order_sibling_chain(siblings: Vec<Node>) -> Vec<Node> {
    let total = siblings.len();
    let mut by_prev: HashMap<Option<String>, Node> = HashMap::with_capacity(total);
    let mut stray: Vec<Node> = Vec::new();

    for node in siblings {
        if by_prev.contains_key(&node.prev_id) {
            stray.push(node);
        } else {
            by_prev.insert(node.prev_id.clone(), node);
        }
    }

    let mut ordered = Vec::with_capacity(total);
    let mut cursor: Option<String> = None;
    while let Some(node) = by_prev.remove(&cursor) {
        cursor = Some(node.id.clone());
        ordered.push(node);
    }

    stray.extend(by_prev.into_values());
    if !stray.is_empty() {
        tracing::warn!(
            unreachable = stray.len(),
            "sibling chain is broken; appending unreachable nodes"
        );
        stray.sort_by(|a, b| a.id.cmp(&b.id));
        ordered.extend(stray);
    }

    ordered
}

/// Depth-first, pre-order walk over parent groups, each group in chain order
fn flatten_forest(
    mut groups: HashMap<Option<String>, Vec<Node>>,
    levels: &HashMap<String, u32>,
) -> Vec<TreeNode> {
    let mut ordered_groups: HashMap<Option<String>, Vec<Node>> = groups
        .drain()
        .map(|(parent, nodes)| (parent, order_sibling_chain(nodes)))
        .collect();

    let mut result = Vec::with_capacity(levels.len());
    let mut stack: Vec<Node> = ordered_groups
        .remove(&None)
        .unwrap_or_default()
        .into_iter()
        .rev()
        .collect();

    while let Some(node) = stack.pop() {
        if let Some(children) = ordered_groups.remove(&Some(node.id.clone())) {
            stack.extend(children.into_iter().rev());
        }
        let level = levels.get(&node.id).copied().unwrap_or_default();
        result.push(TreeNode { node, level });
    }

    result
}

async fn next_node(rows: &mut libsql::Rows) -> Result<Option<Node>, DatabaseError> {
    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
    {
        Some(row) => Ok(Some(node_from_row(&row)?)),
        None => Ok(None),
    }
}

async fn collect_nodes(mut rows: libsql::Rows) -> Result<Vec<Node>, DatabaseError> {
    let mut nodes = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
    {
        nodes.push(node_from_row(&row)?);
    }
    Ok(nodes)
}

/// Decode a row selected with `NODE_COLUMNS`
fn node_from_row(row: &Row) -> Result<Node, DatabaseError> {
    let get_string = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::corrupt_row(format!("column {}: {}", idx, e)))
    };
    let get_optional = |idx: i32| -> Result<Option<String>, DatabaseError> {
        row.get::<Option<String>>(idx)
            .map_err(|e| DatabaseError::corrupt_row(format!("column {}: {}", idx, e)))
    };

    Ok(Node {
        id: get_string(0)?,
        content: get_string(1)?,
        container_id: get_string(2)?,
        parent_id: get_optional(3)?,
        prev_id: get_optional(4)?,
        creator_id: get_optional(5)?,
        created_at: parse_timestamp(&get_string(6)?)?,
        updated_at: parse_timestamp(&get_string(7)?)?,
    })
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::corrupt_row(format!("bad timestamp '{}': {}", value, e)))
}

#[cfg(test)]
#[path = "node_repository_test.rs"]
mod node_repository_test;
