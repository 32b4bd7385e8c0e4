//! Outline Service - ingress and egress of the outline engine
//!
//! `OutlineService` wires the pieces together: it opens the database, starts
//! the command processor behind its queue and shares one event bus between
//! the processor and subscribers. Transports (LiveView sessions, GraphQL
//! resolvers, the dev tool) only talk to this type.
//!
//! # Reads
//!
//! Reads use their own connection inside a read transaction, so a tree is
//! always observed either before or after any single command, never halfway.
//!
//! # Examples
//!
//! ```no_run
//! # use outline_core::config::OutlineConfig;
//! # use outline_core::operations::{Command, CommandEnvelope};
//! # use outline_core::services::OutlineService;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = OutlineService::new(OutlineConfig::with_database_path("./data/outline.db")).await?;
//! service.create_container("episode-42", "Episode 42").await?;
//!
//! let mut events = service.subscribe_container("episode-42");
//! service
//!     .submit(CommandEnvelope::new("user-1", Command::append("episode-42", None, "Intro")))
//!     .await?;
//! let inserted = events.recv().await?;
//! println!("{} {}", inserted.event_type(), inserted.event_id);
//! # Ok(())
//! # }
//! ```

use crate::config::OutlineConfig;
use crate::db::{tx, DatabaseError, DatabaseService, EventStore, NodeRepository, OutlineEvent};
use crate::models::{Node, TreeNode};
use crate::operations::{
    spawn_processor, CommandEnvelope, CommandOutcome, CommandProcessor, CommandQueue,
    OutlineError, PendingCommand,
};
use crate::services::event_bus::{ContainerSubscription, EventBus, EventListener};
use libsql::Connection;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

pub struct OutlineService {
    db: Arc<DatabaseService>,
    queue: CommandQueue,
    event_bus: EventBus,
    processor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl OutlineService {
    /// Open (or create) the database and start the processor task
    pub async fn new(config: OutlineConfig) -> Result<Self, OutlineError> {
        config
            .validate()
            .map_err(|e| OutlineError::validation(e.to_string()))?;

        let db = Arc::new(DatabaseService::new(config.database_path.clone()).await?);
        let event_bus = EventBus::new(config.event_channel_capacity);
        let processor = CommandProcessor::new(&db, event_bus.clone()).await?;
        let (queue, handle) = spawn_processor(processor, config.queue_capacity);

        tracing::info!(
            database = %config.database_path.display(),
            queue_capacity = config.queue_capacity,
            event_channel_capacity = config.event_channel_capacity,
            "outline service ready"
        );

        Ok(Self {
            db,
            queue,
            event_bus,
            processor_handle: Mutex::new(Some(handle)),
        })
    }

    /// Register a container (one per episode); `false` if it already existed
    pub async fn create_container(&self, id: &str, title: &str) -> Result<bool, OutlineError> {
        Ok(self.db.db_create_container(id, title).await?)
    }

    //
    // INGRESS
    //

    /// Submit a command and wait for its outcome
    pub async fn submit(&self, envelope: CommandEnvelope) -> Result<CommandOutcome, OutlineError> {
        self.queue.submit(envelope).await
    }

    /// Submit without waiting for queue capacity
    pub fn try_submit(&self, envelope: CommandEnvelope) -> Result<PendingCommand, OutlineError> {
        self.queue.try_submit(envelope)
    }

    /// A producer handle that outlives borrows of the service
    pub fn queue(&self) -> CommandQueue {
        self.queue.clone()
    }

    //
    // EGRESS
    //

    pub fn subscribe(&self) -> broadcast::Receiver<OutlineEvent> {
        self.event_bus.subscribe()
    }

    pub fn subscribe_container(&self, container_id: impl Into<String>) -> ContainerSubscription {
        self.event_bus.subscribe_container(container_id)
    }

    pub fn spawn_listener<L>(&self, listener: L) -> JoinHandle<()>
    where
        L: EventListener + 'static,
    {
        self.event_bus.spawn_listener(listener)
    }

    //
    // READS
    //

    /// Ordered, depth-annotated outline of a container
    pub async fn materialize_tree(&self, container_id: &str) -> Result<Vec<TreeNode>, OutlineError> {
        let conn = self.begin_read().await?;
        let result = NodeRepository::new(&conn)
            .materialize_tree(container_id)
            .await;
        end_read(&conn, result).await
    }

    pub async fn get_node(&self, node_id: &str) -> Result<Option<Node>, OutlineError> {
        let conn = self.begin_read().await?;
        let result = NodeRepository::new(&conn).get(node_id).await;
        end_read(&conn, result).await
    }

    /// Audit log of a container in append order
    pub async fn events_for_container(
        &self,
        container_id: &str,
    ) -> Result<Vec<OutlineEvent>, OutlineError> {
        let conn = self.begin_read().await?;
        let result = EventStore::new(&conn).list_for_container(container_id).await;
        end_read(&conn, result).await
    }

    /// Whether the processor still accepts commands
    pub fn is_running(&self) -> bool {
        !self.queue.is_closed()
    }

    /// Apply everything already queued, stop the processor and checkpoint
    pub async fn shutdown(&self) -> Result<(), OutlineError> {
        match self.queue.shutdown().await {
            Ok(()) | Err(OutlineError::ProcessorStopped) => {}
            Err(e) => return Err(e),
        }

        if let Some(handle) = self.processor_handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!("command processor task failed: {}", e);
            }
        }

        self.db.db_close().await?;
        tracing::info!("outline service stopped");
        Ok(())
    }

    async fn begin_read(&self) -> Result<Connection, OutlineError> {
        let conn = self.db.connect_with_timeout().await?;
        tx::begin_read(&conn).await?;
        Ok(conn)
    }
}

/// Release the read snapshot and surface the read's result
async fn end_read<T>(conn: &Connection, result: Result<T, DatabaseError>) -> Result<T, OutlineError> {
    tx::rollback(conn).await;
    Ok(result?)
}
