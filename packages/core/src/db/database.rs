//! Database Connection Management
//!
//! This module provides the database connection and schema initialization for
//! the outline store using libsql (embedded, SQLite-compatible).
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf
//! - **WAL mode**: readers get a stable snapshot while the single writer commits
//! - **Foreign keys**: enabled per connection and DEFERRED, so a command may pass
//!   through intermediate link states as long as the committed state is consistent
//! - **Append-only event log**: `outline_events` lives next to `nodes` so a
//!   mutation and its events commit atomically
//!
//! # Database Connection Patterns
//!
//! **ALWAYS use `connect_with_timeout()` in async functions.** It sets a busy
//! timeout and enables foreign keys on the new connection.
//!
//! ```no_run
//! # use outline_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/outline.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::db::error::DatabaseError;
use chrono::Utc;
use libsql::{Builder, Connection, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Database service for managing the libsql connection and schema
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,
}

impl DatabaseService {
    /// Create a new DatabaseService with the specified database path
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the directory cannot be created, the
    /// connection fails or the schema cannot be initialized.
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        let is_new_database = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::create_directory(db_path.clone(), e))?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::open_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize_schema(is_new_database).await?;

        tracing::info!(
            path = %service.db_path.display(),
            new = is_new_database,
            "outline database ready"
        );

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// Idempotent: safe to call on an existing database.
    ///
    /// # Schema
    ///
    /// - `containers`: one row per outline (episode)
    /// - `nodes`: outline items linked by `parent_id` / `prev_id`
    /// - `outline_events`: append-only audit log, unique on `event_id`
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS containers (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::schema(format!("Failed to create containers table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL DEFAULT '',
                container_id TEXT NOT NULL,
                parent_id TEXT,
                prev_id TEXT,
                creator_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (container_id) REFERENCES containers(id) DEFERRABLE INITIALLY DEFERRED,
                FOREIGN KEY (parent_id) REFERENCES nodes(id) DEFERRABLE INITIALLY DEFERRED,
                FOREIGN KEY (prev_id) REFERENCES nodes(id) DEFERRABLE INITIALLY DEFERRED
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::schema(format!("Failed to create nodes table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS outline_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                event_type TEXT NOT NULL,
                user_id TEXT NOT NULL,
                container_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::schema(format!(
                "Failed to create outline_events table: {}",
                e
            ))
        })?;

        self.create_core_indexes(&conn).await?;

        // Flush the fresh schema so connections opened right away see it
        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
                .await?;
        }

        Ok(())
    }

    async fn create_core_indexes(&self, conn: &Connection) -> Result<(), DatabaseError> {
        let indexes = [
            // Position lookup: (container, parent, prev) identifies one slot
            (
                "idx_nodes_position",
                "CREATE INDEX IF NOT EXISTS idx_nodes_position ON nodes(container_id, parent_id, prev_id)",
            ),
            (
                "idx_nodes_parent",
                "CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id)",
            ),
            (
                "idx_nodes_prev",
                "CREATE INDEX IF NOT EXISTS idx_nodes_prev ON nodes(prev_id)",
            ),
            (
                "idx_events_container",
                "CREATE INDEX IF NOT EXISTS idx_events_container ON outline_events(container_id, seq)",
            ),
        ];

        for (name, sql) in indexes {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::schema(format!(
                    "Failed to create index '{}': {}",
                    name, e
                ))
            })?;
        }

        Ok(())
    }

    /// Get a raw connection to the database
    ///
    /// Prefer `connect_with_timeout()`; this one has neither busy timeout nor
    /// foreign keys configured.
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::Connect)
    }

    /// Get a connection with busy timeout and foreign keys configured
    pub async fn connect_with_timeout(&self) -> Result<Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        Ok(conn)
    }

    /// Register a container (outline). Idempotent: an existing id is kept as-is.
    ///
    /// Returns `true` when a new row was created.
    pub async fn db_create_container(&self, id: &str, title: &str) -> Result<bool, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        let rows_affected = conn
            .execute(
                "INSERT INTO containers (id, title, created_at) VALUES (?, ?, ?)
                 ON CONFLICT(id) DO NOTHING",
                (id, title, Utc::now().to_rfc3339()),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to create container: {}", e))
            })?;

        Ok(rows_affected > 0)
    }

    /// Checkpoint the WAL. Connections are dropped by their owners.
    pub async fn db_close(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
            .await?;
        Ok(())
    }
}

/// Transaction helpers shared by the writer and snapshot readers
///
/// libsql connections accept plain `BEGIN`/`COMMIT` statements; the helpers
/// only add error context.
pub mod tx {
    use super::*;

    /// Start a write transaction, taking the write lock up front
    pub async fn begin_immediate(conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute("BEGIN IMMEDIATE", ()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to begin transaction: {}", e))
        })?;
        Ok(())
    }

    /// Start a read transaction; the snapshot is taken on the first read
    pub async fn begin_read(conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute("BEGIN DEFERRED", ()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to begin read transaction: {}", e))
        })?;
        Ok(())
    }

    pub async fn commit(conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute("COMMIT", ()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }

    /// Roll back, ignoring "no transaction is active"
    pub async fn rollback(conn: &Connection) {
        if let Err(e) = conn.execute("ROLLBACK", ()).await {
            tracing::debug!("rollback skipped: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn table_names(conn: &Connection) -> Vec<String> {
        let mut rows = conn
            .query("SELECT name FROM sqlite_master WHERE type='table'", ())
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            names.push(row.get::<String>(0).unwrap());
        }
        names
    }

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db_service = DatabaseService::new(db_path.clone()).await.unwrap();

        assert_eq!(db_service.db_path, db_path);
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        let names = table_names(&conn).await;
        assert!(names.contains(&"nodes".to_string()));
        assert!(names.contains(&"containers".to_string()));
        assert!(names.contains(&"outline_events".to_string()));
    }

    #[tokio::test]
    async fn test_indexes_created() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'",
                (),
            )
            .await
            .unwrap();
        let mut index_names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            index_names.push(row.get::<String>(0).unwrap());
        }

        assert!(index_names.contains(&"idx_nodes_position".to_string()));
        assert!(index_names.contains(&"idx_nodes_parent".to_string()));
        assert!(index_names.contains(&"idx_events_container".to_string()));
    }

    #[tokio::test]
    async fn test_parent_directory_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("dir").join("test.db");

        DatabaseService::new(db_path.clone()).await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_idempotent_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let first = DatabaseService::new(db_path.clone()).await.unwrap();
        assert!(first.db_create_container("episode-1", "Pilot").await.unwrap());
        drop(first);

        let second = DatabaseService::new(db_path).await.unwrap();
        let conn = second.connect_with_timeout().await.unwrap();
        let mut rows = conn
            .query("SELECT COUNT(*) FROM containers", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_create_container_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        assert!(db_service.db_create_container("episode-1", "Pilot").await.unwrap());
        assert!(!db_service
            .db_create_container("episode-1", "Renamed")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        tx::begin_immediate(&conn).await.unwrap();
        conn.execute(
            "INSERT INTO containers (id, title, created_at) VALUES ('c', '', '')",
            (),
        )
        .await
        .unwrap();
        tx::rollback(&conn).await;

        let mut rows = conn
            .query("SELECT COUNT(*) FROM containers", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 0);
    }
}
