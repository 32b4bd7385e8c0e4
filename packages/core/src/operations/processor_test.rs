//! Tests for CommandProcessor
//!
//! Tests cover:
//! - Every command's effect on the tree and the events it produces
//! - Rejections (not-found, invalid-position, validation) leave no trace
//! - Boundary no-ops, idempotency on `event_id`, derived event ids
//! - Sibling-chain invariants after each mutation

#[cfg(test)]
mod tests {
    use crate::db::{derive_event_id, DatabaseService, EventKind, EventStore, NodeRepository};
    use crate::models::{Node, NodePosition, Selection};
    use crate::operations::{
        Command, CommandEnvelope, CommandOutcome, CommandProcessor, OutlineError, Placement,
    };
    use crate::services::EventBus;
    use libsql::Connection;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use uuid::Uuid;

    const EPISODE: &str = "episode-1";
    const OTHER_EPISODE: &str = "episode-2";

    struct Harness {
        processor: CommandProcessor,
        bus: EventBus,
        reader: Connection,
        _db: DatabaseService,
        _temp_dir: TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let db = DatabaseService::new(temp_dir.path().join("test.db"))
                .await
                .unwrap();
            db.db_create_container(EPISODE, "Pilot").await.unwrap();
            db.db_create_container(OTHER_EPISODE, "Second").await.unwrap();
            let bus = EventBus::new(64);
            let processor = CommandProcessor::new(&db, bus.clone()).await.unwrap();
            let reader = db.connect_with_timeout().await.unwrap();
            Self {
                processor,
                bus,
                reader,
                _db: db,
                _temp_dir: temp_dir,
            }
        }

        async fn run(&self, command: Command) -> Result<CommandOutcome, OutlineError> {
            self.processor
                .process(&CommandEnvelope::new("user-1", command))
                .await
        }

        /// Append a node as last child of `parent` and return its id
        async fn append(&self, parent: Option<&str>, content: &str) -> String {
            let outcome = self
                .run(Command::append(
                    EPISODE,
                    parent.map(str::to_string),
                    content,
                ))
                .await
                .unwrap();
            match &outcome.events()[0].kind {
                EventKind::NodeInserted { node, .. } => node.id.clone(),
                other => panic!("unexpected event {:?}", other),
            }
        }

        async fn node(&self, id: &str) -> Node {
            NodeRepository::new(&self.reader)
                .get(id)
                .await
                .unwrap()
                .unwrap()
        }

        /// `(content, level)` for every node, pre-order
        async fn shape(&self, container_id: &str) -> Vec<(String, u32)> {
            assert_chains_consistent(&self.reader, container_id).await;
            NodeRepository::new(&self.reader)
                .materialize_tree(container_id)
                .await
                .unwrap()
                .into_iter()
                .map(|t| (t.node.content, t.level))
                .collect()
        }

        async fn event_count(&self, container_id: &str) -> usize {
            EventStore::new(&self.reader)
                .list_for_container(container_id)
                .await
                .unwrap()
                .len()
        }
    }

    fn shape(expected: &[(&str, u32)]) -> Vec<(String, u32)> {
        expected
            .iter()
            .map(|(content, level)| (content.to_string(), *level))
            .collect()
    }

    /// Every sibling group is one chain: one head, no shared prev, all reachable
    async fn assert_chains_consistent(conn: &Connection, container_id: &str) {
        let mut rows = conn
            .query(
                "SELECT id, parent_id, prev_id FROM nodes WHERE container_id = ?",
                [container_id],
            )
            .await
            .unwrap();
        let mut groups: HashMap<Option<String>, Vec<(String, Option<String>)>> = HashMap::new();
        while let Some(row) = rows.next().await.unwrap() {
            let id: String = row.get(0).unwrap();
            let parent: Option<String> = row.get(1).unwrap();
            let prev: Option<String> = row.get(2).unwrap();
            groups.entry(parent).or_default().push((id, prev));
        }

        for (parent, members) in groups {
            let mut by_prev: HashMap<Option<String>, String> = HashMap::new();
            for (id, prev) in &members {
                assert!(
                    by_prev.insert(prev.clone(), id.clone()).is_none(),
                    "two siblings share prev {:?} under {:?}",
                    prev,
                    parent
                );
            }
            let mut cursor = None;
            let mut walked = 0;
            while let Some(id) = by_prev.get(&cursor) {
                walked += 1;
                cursor = Some(id.clone());
            }
            assert_eq!(walked, members.len(), "broken chain under {:?}", parent);
        }
    }

    //
    // INSERT
    //

    #[tokio::test]
    async fn test_insert_default_position_becomes_first_root() {
        let h = Harness::new().await;
        let first = h.append(None, "First").await;

        let outcome = h.run(Command::insert(EPISODE, "  New head  ")).await.unwrap();
        let events = outcome.events();
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            EventKind::NodeInserted { node, next } => {
                assert_eq!(node.content, "New head");
                let next = next.as_ref().unwrap();
                assert_eq!(next.id, first);
                assert_eq!(next.prev_id.as_deref(), Some(node.id.as_str()));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(h.shape(EPISODE).await, shape(&[("New head", 0), ("First", 0)]));
    }

    #[tokio::test]
    async fn test_append_preserves_submission_order() {
        let h = Harness::new().await;
        let parent = h.append(None, "Segment").await;
        for content in ["a", "b", "c"] {
            h.append(Some(&parent), content).await;
        }
        h.append(None, "Outro").await;

        assert_eq!(
            h.shape(EPISODE).await,
            shape(&[("Segment", 0), ("a", 1), ("b", 1), ("c", 1), ("Outro", 0)])
        );
    }

    #[tokio::test]
    async fn test_insert_at_explicit_position_pushes_occupant_back() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        h.append(None, "C").await;

        let node_id = Uuid::new_v4().to_string();
        let outcome = h
            .run(Command::InsertNode {
                node_id: Some(node_id.clone()),
                container_id: EPISODE.to_string(),
                content: "B".to_string(),
                creator_id: Some("user-7".to_string()),
                placement: Placement::At(NodePosition::after(None, a.clone())),
            })
            .await
            .unwrap();

        assert!(outcome.is_applied());
        let inserted = h.node(&node_id).await;
        assert_eq!(inserted.creator_id.as_deref(), Some("user-7"));
        assert_eq!(h.shape(EPISODE).await, shape(&[("A", 0), ("B", 0), ("C", 0)]));
    }

    #[tokio::test]
    async fn test_insert_rejections() {
        let h = Harness::new().await;
        let parent = h.append(None, "Parent").await;
        let child = h.append(Some(&parent), "Child").await;

        let unknown_container = h.run(Command::insert("no-such-episode", "x")).await;
        assert!(matches!(
            unknown_container,
            Err(OutlineError::NotFound { ref entity, .. }) if entity == "container"
        ));

        let bad_id = h
            .run(Command::InsertNode {
                node_id: Some("not-a-uuid".to_string()),
                container_id: EPISODE.to_string(),
                content: "x".to_string(),
                creator_id: None,
                placement: Placement::default(),
            })
            .await;
        assert!(matches!(bad_id, Err(OutlineError::ValidationFailed(_))));

        let taken_id = h
            .run(Command::InsertNode {
                node_id: Some(parent.clone()),
                container_id: EPISODE.to_string(),
                content: "x".to_string(),
                creator_id: None,
                placement: Placement::default(),
            })
            .await;
        assert!(matches!(taken_id, Err(OutlineError::ValidationFailed(_))));

        // prev belongs to another parent
        let wrong_prev = h
            .run(Command::InsertNode {
                node_id: None,
                container_id: EPISODE.to_string(),
                content: "x".to_string(),
                creator_id: None,
                placement: Placement::At(NodePosition::after(None, child)),
            })
            .await;
        assert!(matches!(wrong_prev, Err(OutlineError::InvalidPosition(_))));

        let missing_parent = h
            .run(Command::append(EPISODE, Some(Uuid::new_v4().to_string()), "x"))
            .await;
        assert!(matches!(missing_parent, Err(OutlineError::NotFound { .. })));

        assert_eq!(h.shape(EPISODE).await, shape(&[("Parent", 0), ("Child", 1)]));
        assert_eq!(h.event_count(EPISODE).await, 2);
    }

    //
    // CONTENT
    //

    #[tokio::test]
    async fn test_change_content_trims() {
        let h = Harness::new().await;
        let id = h.append(None, "Draft").await;

        let outcome = h
            .run(Command::ChangeNodeContent {
                node_id: id.clone(),
                content: "  Final cut \n".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            outcome.events()[0].kind,
            EventKind::NodeContentChanged {
                node_id: id.clone(),
                content: "Final cut".to_string(),
            }
        );
        assert_eq!(h.node(&id).await.content, "Final cut");
    }

    #[tokio::test]
    async fn test_change_content_of_missing_node() {
        let h = Harness::new().await;
        let result = h
            .run(Command::ChangeNodeContent {
                node_id: "ghost".to_string(),
                content: "x".to_string(),
            })
            .await;
        assert!(matches!(result, Err(OutlineError::NotFound { .. })));
        assert_eq!(h.event_count(EPISODE).await, 0);
    }

    //
    // MOVE
    //

    #[tokio::test]
    async fn test_move_node_under_new_parent() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        let b = h.append(None, "B").await;
        h.append(None, "C").await;
        let a1 = h.append(Some(&a), "A1").await;

        let outcome = h
            .run(Command::MoveNode {
                node_id: b.clone(),
                parent_id: Some(a.clone()),
                prev_id: Some(a1.clone()),
            })
            .await
            .unwrap();

        match &outcome.events()[0].kind {
            EventKind::NodeMoved {
                node,
                old_prev,
                old_next,
                next,
                children,
                old_container_id,
            } => {
                assert_eq!(node.parent_id.as_deref(), Some(a.as_str()));
                assert_eq!(old_prev.as_ref().unwrap().id, a);
                let old_next = old_next.as_ref().unwrap();
                assert_eq!(old_next.content, "C");
                assert_eq!(old_next.prev_id.as_deref(), Some(a.as_str()));
                assert!(next.is_none());
                assert!(children.is_empty());
                assert!(old_container_id.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            h.shape(EPISODE).await,
            shape(&[("A", 0), ("A1", 1), ("B", 1), ("C", 0)])
        );
    }

    #[tokio::test]
    async fn test_move_node_to_same_position_keeps_order() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        let b = h.append(None, "B").await;
        h.append(None, "C").await;

        h.run(Command::MoveNode {
            node_id: b,
            parent_id: None,
            prev_id: Some(a),
        })
        .await
        .unwrap();
        assert_eq!(h.shape(EPISODE).await, shape(&[("A", 0), ("B", 0), ("C", 0)]));
    }

    #[tokio::test]
    async fn test_move_node_rejects_cycles_and_self_reference() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        let a1 = h.append(Some(&a), "A1").await;

        let under_descendant = h
            .run(Command::MoveNode {
                node_id: a.clone(),
                parent_id: Some(a1.clone()),
                prev_id: None,
            })
            .await;
        assert!(matches!(
            under_descendant,
            Err(OutlineError::InvalidPosition(_))
        ));

        let under_itself = h
            .run(Command::MoveNode {
                node_id: a.clone(),
                parent_id: Some(a.clone()),
                prev_id: None,
            })
            .await;
        assert!(matches!(under_itself, Err(OutlineError::InvalidPosition(_))));

        let after_itself = h
            .run(Command::MoveNode {
                node_id: a.clone(),
                parent_id: None,
                prev_id: Some(a.clone()),
            })
            .await;
        assert!(matches!(after_itself, Err(OutlineError::InvalidPosition(_))));

        assert_eq!(h.shape(EPISODE).await, shape(&[("A", 0), ("A1", 1)]));
        assert_eq!(h.event_count(EPISODE).await, 2);
    }

    #[tokio::test]
    async fn test_move_node_rejects_parent_from_other_container() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        let foreign = h
            .run(Command::insert(OTHER_EPISODE, "Elsewhere"))
            .await
            .unwrap()
            .into_events()
            .remove(0);
        let foreign_id = match foreign.kind {
            EventKind::NodeInserted { node, .. } => node.id,
            other => panic!("unexpected event {:?}", other),
        };

        let result = h
            .run(Command::MoveNode {
                node_id: a,
                parent_id: Some(foreign_id),
                prev_id: None,
            })
            .await;
        assert!(matches!(result, Err(OutlineError::InvalidPosition(_))));
    }

    //
    // INDENT / OUTDENT
    //

    #[tokio::test]
    async fn test_indent_makes_node_last_child_of_prev() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        h.append(Some(&a), "A1").await;
        let b = h.append(None, "B").await;
        h.append(None, "C").await;

        h.run(Command::IndentNode { node_id: b.clone() })
            .await
            .unwrap();

        assert_eq!(
            h.shape(EPISODE).await,
            shape(&[("A", 0), ("A1", 1), ("B", 1), ("C", 0)])
        );
        assert_eq!(h.node(&b).await.parent_id.as_deref(), Some(a.as_str()));
    }

    #[tokio::test]
    async fn test_indent_first_sibling_is_invalid() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        let result = h.run(Command::IndentNode { node_id: a }).await;
        assert!(matches!(result, Err(OutlineError::InvalidPosition(_))));
        assert_eq!(h.event_count(EPISODE).await, 1);
    }

    #[tokio::test]
    async fn test_outdent_adopts_younger_siblings() {
        let h = Harness::new().await;
        let p = h.append(None, "P").await;
        h.append(Some(&p), "B").await;
        let c = h.append(Some(&p), "C").await;
        h.append(Some(&c), "X").await;
        h.append(Some(&p), "D").await;
        h.append(Some(&p), "E").await;
        h.append(None, "Q").await;

        let outcome = h
            .run(Command::OutdentNode { node_id: c.clone() })
            .await
            .unwrap();

        match &outcome.events()[0].kind {
            EventKind::NodeMoved {
                node,
                old_next,
                next,
                children,
                ..
            } => {
                assert!(node.parent_id.is_none());
                assert_eq!(node.prev_id.as_deref(), Some(p.as_str()));
                assert!(old_next.is_none());
                assert_eq!(next.as_ref().unwrap().content, "Q");
                let adopted: Vec<&str> = children.iter().map(|n| n.content.as_str()).collect();
                assert_eq!(adopted, vec!["D", "E"]);
                assert!(children
                    .iter()
                    .all(|n| n.parent_id.as_deref() == Some(c.as_str())));
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(
            h.shape(EPISODE).await,
            shape(&[
                ("P", 0),
                ("B", 1),
                ("C", 0),
                ("X", 1),
                ("D", 1),
                ("E", 1),
                ("Q", 0)
            ])
        );
    }

    #[tokio::test]
    async fn test_outdent_root_is_invalid() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        let result = h.run(Command::OutdentNode { node_id: a }).await;
        assert!(matches!(result, Err(OutlineError::InvalidPosition(_))));
    }

    #[tokio::test]
    async fn test_indent_then_outdent_round_trip() {
        let h = Harness::new().await;
        h.append(None, "A").await;
        let b = h.append(None, "B").await;
        h.append(None, "C").await;
        let before = h.shape(EPISODE).await;

        h.run(Command::IndentNode { node_id: b.clone() })
            .await
            .unwrap();
        assert_eq!(h.shape(EPISODE).await, shape(&[("A", 0), ("B", 1), ("C", 0)]));

        h.run(Command::OutdentNode { node_id: b }).await.unwrap();
        assert_eq!(h.shape(EPISODE).await, before);
    }

    //
    // MOVE UP / DOWN
    //

    #[tokio::test]
    async fn test_move_up_and_down_swap_neighbours() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        h.append(None, "B").await;
        let c = h.append(None, "C").await;

        h.run(Command::MoveUp { node_id: c.clone() }).await.unwrap();
        assert_eq!(h.shape(EPISODE).await, shape(&[("A", 0), ("C", 0), ("B", 0)]));

        h.run(Command::MoveUp { node_id: c.clone() }).await.unwrap();
        assert_eq!(h.shape(EPISODE).await, shape(&[("C", 0), ("A", 0), ("B", 0)]));

        h.run(Command::MoveDown { node_id: a.clone() }).await.unwrap();
        assert_eq!(h.shape(EPISODE).await, shape(&[("C", 0), ("B", 0), ("A", 0)]));

        h.run(Command::MoveDown { node_id: c }).await.unwrap();
        assert_eq!(h.shape(EPISODE).await, shape(&[("B", 0), ("C", 0), ("A", 0)]));
    }

    #[tokio::test]
    async fn test_move_at_boundary_is_noop_without_event() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        let b = h.append(None, "B").await;
        let events_before = h.event_count(EPISODE).await;

        let up = h.run(Command::MoveUp { node_id: a }).await.unwrap();
        let down = h.run(Command::MoveDown { node_id: b }).await.unwrap();
        assert_eq!(up, CommandOutcome::Noop);
        assert_eq!(down, CommandOutcome::Noop);
        assert_eq!(h.event_count(EPISODE).await, events_before);
        assert_eq!(h.shape(EPISODE).await, shape(&[("A", 0), ("B", 0)]));
    }

    //
    // DELETE
    //

    #[tokio::test]
    async fn test_delete_reparents_children_in_place() {
        let h = Harness::new().await;
        h.append(None, "A").await;
        let b = h.append(None, "B").await;
        h.append(Some(&b), "B1").await;
        let b2 = h.append(Some(&b), "B2").await;
        h.append(Some(&b2), "B2a").await;
        h.append(None, "C").await;

        let outcome = h.run(Command::DeleteNode { node_id: b.clone() }).await.unwrap();
        match &outcome.events()[0].kind {
            EventKind::NodeDeleted {
                node,
                children,
                next,
            } => {
                assert_eq!(node.id, b);
                let moved: Vec<&str> = children.iter().map(|n| n.content.as_str()).collect();
                assert_eq!(moved, vec!["B1", "B2"]);
                assert!(children.iter().all(|n| n.parent_id.is_none()));
                let next = next.as_ref().unwrap();
                assert_eq!(next.content, "C");
                assert_eq!(next.prev_id.as_deref(), Some(b2.as_str()));
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(
            h.shape(EPISODE).await,
            shape(&[("A", 0), ("B1", 0), ("B2", 0), ("B2a", 1), ("C", 0)])
        );
    }

    #[tokio::test]
    async fn test_insert_then_delete_leaves_empty_tree() {
        let h = Harness::new().await;
        let id = h.append(None, "Ephemeral").await;
        h.run(Command::DeleteNode { node_id: id.clone() })
            .await
            .unwrap();

        assert!(h.shape(EPISODE).await.is_empty());
        assert_eq!(h.event_count(EPISODE).await, 2);

        let again = h.run(Command::DeleteNode { node_id: id }).await;
        assert!(matches!(again, Err(OutlineError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_first_sibling_promotes_follower_to_head() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        let b = h.append(None, "B").await;

        let outcome = h
            .run(Command::DeleteNode { node_id: a.clone() })
            .await
            .unwrap();
        match &outcome.events()[0].kind {
            EventKind::NodeDeleted {
                node,
                children,
                next,
            } => {
                assert_eq!(node.id, a);
                assert!(children.is_empty());
                let next = next.as_ref().unwrap();
                assert_eq!(next.id, b);
                assert_eq!(next.prev_id, None);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let b_node = h.node(&b).await;
        assert_eq!(b_node.parent_id, None);
        assert_eq!(b_node.prev_id, None);
        assert_eq!(h.shape(EPISODE).await, shape(&[("B", 0)]));
    }

    //
    // SPLIT / MERGE
    //

    #[tokio::test]
    async fn test_split_node_at_selection() {
        let h = Harness::new().await;
        let id = h.append(None, "Hello brave world").await;
        h.append(None, "Next").await;

        let envelope = CommandEnvelope::new(
            "user-2",
            Command::SplitNode {
                node_id: id.clone(),
                selection: Selection { start: 5, end: 12 },
                new_node_id: None,
            },
        );
        let outcome = h.processor.process(&envelope).await.unwrap();
        let events = outcome.events();
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].event_id, envelope.event_id);
        match &events[0].kind {
            EventKind::NodeInserted { node, next } => {
                assert_eq!(node.content, "world");
                assert_eq!(node.prev_id.as_deref(), Some(id.as_str()));
                assert_eq!(node.creator_id.as_deref(), Some("user-2"));
                assert_eq!(next.as_ref().unwrap().content, "Next");
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(events[1].event_id, derive_event_id(&envelope.event_id, "split"));
        assert_eq!(
            events[1].kind,
            EventKind::NodeContentChanged {
                node_id: id.clone(),
                content: "Hello".to_string(),
            }
        );

        assert_eq!(
            h.shape(EPISODE).await,
            shape(&[("Hello", 0), ("world", 0), ("Next", 0)])
        );
    }

    #[tokio::test]
    async fn test_split_with_bad_selection_changes_nothing() {
        let h = Harness::new().await;
        let id = h.append(None, "short").await;

        let result = h
            .run(Command::SplitNode {
                node_id: id,
                selection: Selection { start: 2, end: 99 },
                new_node_id: None,
            })
            .await;
        assert!(matches!(result, Err(OutlineError::ValidationFailed(_))));
        assert_eq!(h.shape(EPISODE).await, shape(&[("short", 0)]));
    }

    #[tokio::test]
    async fn test_merge_prev_concatenates_and_reparents_children() {
        let h = Harness::new().await;
        let a = h.append(None, "foo").await;
        let b = h.append(None, "bar").await;
        h.append(Some(&b), "child").await;
        h.append(None, "tail").await;

        let envelope = CommandEnvelope::new("user-1", Command::MergePrev { node_id: b.clone() });
        let outcome = h.processor.process(&envelope).await.unwrap();
        let events = outcome.events();

        assert_eq!(
            events[0].kind,
            EventKind::NodeContentChanged {
                node_id: a.clone(),
                content: "foobar".to_string(),
            }
        );
        assert_eq!(events[1].event_id, derive_event_id(&envelope.event_id, "merge"));
        assert!(matches!(
            &events[1].kind,
            EventKind::NodeDeleted { node, .. } if node.id == b
        ));

        assert_eq!(
            h.shape(EPISODE).await,
            shape(&[("foobar", 0), ("child", 0), ("tail", 0)])
        );
    }

    #[tokio::test]
    async fn test_merge_next_absorbs_following_sibling() {
        let h = Harness::new().await;
        let a = h.append(None, "Part one, ").await;
        h.append(None, "part two").await;

        h.run(Command::MergeNext { node_id: a.clone() })
            .await
            .unwrap();
        assert_eq!(h.shape(EPISODE).await, shape(&[("Part one,part two", 0)]));
    }

    #[tokio::test]
    async fn test_merge_without_sibling_is_noop() {
        let h = Harness::new().await;
        let only = h.append(None, "Alone").await;

        let prev = h
            .run(Command::MergePrev {
                node_id: only.clone(),
            })
            .await
            .unwrap();
        let next = h.run(Command::MergeNext { node_id: only }).await.unwrap();
        assert_eq!(prev, CommandOutcome::Noop);
        assert_eq!(next, CommandOutcome::Noop);
        assert_eq!(h.event_count(EPISODE).await, 1);
    }

    //
    // MOVE TO CONTAINER
    //

    #[tokio::test]
    async fn test_move_to_container_moves_whole_subtrees() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        let a1 = h.append(Some(&a), "A1").await;
        h.append(None, "B").await;
        let c = h.append(None, "C").await;

        let envelope = CommandEnvelope::new(
            "user-1",
            Command::MoveToContainer {
                node_ids: vec![c.clone(), a.clone()],
                container_id: OTHER_EPISODE.to_string(),
                parent_id: None,
                prev_id: None,
            },
        );
        let outcome = h.processor.process(&envelope).await.unwrap();
        let events = outcome.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_id, envelope.event_id);
        assert_eq!(
            events[1].event_id,
            derive_event_id(&envelope.event_id, "move-to-container:1")
        );
        for event in events {
            assert_eq!(event.container_id, OTHER_EPISODE);
            assert!(matches!(
                &event.kind,
                EventKind::NodeMoved { old_container_id: Some(old), .. } if old == EPISODE
            ));
        }

        assert_eq!(h.shape(EPISODE).await, shape(&[("B", 0)]));
        assert_eq!(
            h.shape(OTHER_EPISODE).await,
            shape(&[("C", 0), ("A", 0), ("A1", 1)])
        );
        assert_eq!(h.node(&a1).await.container_id, OTHER_EPISODE);
    }

    #[tokio::test]
    async fn test_move_to_container_after_existing_node() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        let head = h
            .run(Command::insert(OTHER_EPISODE, "Existing"))
            .await
            .unwrap()
            .into_events()
            .remove(0);
        let head_id = match head.kind {
            EventKind::NodeInserted { node, .. } => node.id,
            other => panic!("unexpected event {:?}", other),
        };

        h.run(Command::MoveToContainer {
            node_ids: vec![a],
            container_id: OTHER_EPISODE.to_string(),
            parent_id: None,
            prev_id: Some(head_id),
        })
        .await
        .unwrap();

        assert!(h.shape(EPISODE).await.is_empty());
        assert_eq!(
            h.shape(OTHER_EPISODE).await,
            shape(&[("Existing", 0), ("A", 0)])
        );
    }

    #[tokio::test]
    async fn test_move_to_container_validation() {
        let h = Harness::new().await;
        let a = h.append(None, "A").await;
        let a1 = h.append(Some(&a), "A1").await;

        let missing_container = h
            .run(Command::MoveToContainer {
                node_ids: vec![a.clone()],
                container_id: "nowhere".to_string(),
                parent_id: None,
                prev_id: None,
            })
            .await;
        assert!(matches!(missing_container, Err(OutlineError::NotFound { .. })));

        let nested = h
            .run(Command::MoveToContainer {
                node_ids: vec![a.clone(), a1.clone()],
                container_id: OTHER_EPISODE.to_string(),
                parent_id: None,
                prev_id: None,
            })
            .await;
        assert!(matches!(nested, Err(OutlineError::ValidationFailed(_))));

        let repeated = h
            .run(Command::MoveToContainer {
                node_ids: vec![a.clone(), a.clone()],
                container_id: OTHER_EPISODE.to_string(),
                parent_id: None,
                prev_id: None,
            })
            .await;
        assert!(matches!(repeated, Err(OutlineError::ValidationFailed(_))));

        let into_own_subtree = h
            .run(Command::MoveToContainer {
                node_ids: vec![a.clone()],
                container_id: EPISODE.to_string(),
                parent_id: Some(a1),
                prev_id: None,
            })
            .await;
        assert!(matches!(
            into_own_subtree,
            Err(OutlineError::InvalidPosition(_))
        ));

        assert_eq!(h.shape(EPISODE).await, shape(&[("A", 0), ("A1", 1)]));
        assert!(h.shape(OTHER_EPISODE).await.is_empty());
    }

    //
    // PIPELINE
    //

    #[tokio::test]
    async fn test_duplicate_event_id_is_applied_once() {
        let h = Harness::new().await;
        let envelope = CommandEnvelope::new("user-1", Command::append(EPISODE, None, "Once"));

        let first = h.processor.process(&envelope).await.unwrap();
        let second = h.processor.process(&envelope).await.unwrap();
        assert!(first.is_applied());
        assert_eq!(second, CommandOutcome::Duplicate);

        assert_eq!(h.shape(EPISODE).await, shape(&[("Once", 0)]));
        assert_eq!(h.event_count(EPISODE).await, 1);
    }

    #[tokio::test]
    async fn test_events_are_persisted_and_published_after_commit() {
        let h = Harness::new().await;
        let mut rx = h.bus.subscribe();

        let outcome = h.run(Command::append(EPISODE, None, "Hello")).await.unwrap();
        let published = rx.recv().await.unwrap();
        assert_eq!(&published, &outcome.events()[0]);

        let stored = EventStore::new(&h.reader)
            .get(&published.event_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, published);
    }

    #[tokio::test]
    async fn test_rejected_command_publishes_nothing() {
        let h = Harness::new().await;
        let mut rx = h.bus.subscribe();

        let result = h
            .run(Command::DeleteNode {
                node_id: "ghost".to_string(),
            })
            .await;
        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
    }
}
