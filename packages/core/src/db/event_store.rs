//! Event Store - append-only log of applied mutations
//!
//! Rows are keyed by `event_id` (unique) and ordered by an autoincrement
//! sequence. The store never updates or deletes a row.

use crate::db::error::DatabaseError;
use crate::db::events::{EventKind, OutlineEvent};
use crate::db::node_repository::parse_timestamp;
use libsql::{Connection, Row};
use uuid::Uuid;

const EVENT_COLUMNS: &str = "event_id, user_id, container_id, payload, created_at";

pub struct EventStore<'a> {
    conn: &'a Connection,
}

impl<'a> EventStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append one event; `false` if an event with the same id already exists
    pub async fn append(&self, event: &OutlineEvent) -> Result<bool, DatabaseError> {
        let payload = serde_json::to_string(&event.kind).map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to serialize event payload: {}", e))
        })?;

        let rows_affected = self
            .conn
            .execute(
                "INSERT INTO outline_events (event_id, event_type, user_id, container_id, payload, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(event_id) DO NOTHING",
                (
                    event.event_id.to_string(),
                    event.event_type(),
                    event.user_id.as_str(),
                    event.container_id.as_str(),
                    payload,
                    event.created_at.to_rfc3339(),
                ),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to append event: {}", e)))?;

        Ok(rows_affected > 0)
    }

    pub async fn contains(&self, event_id: &Uuid) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM outline_events WHERE event_id = ?",
                [event_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to look up event: {}", e)))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?;
        Ok(row.is_some())
    }

    pub async fn get(&self, event_id: &Uuid) -> Result<Option<OutlineEvent>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM outline_events WHERE event_id = ?",
            EVENT_COLUMNS
        );
        let mut rows = self
            .conn
            .query(&sql, [event_id.to_string()])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to get event: {}", e)))?;
        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => Ok(Some(event_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Audit log of one container in append order
    pub async fn list_for_container(
        &self,
        container_id: &str,
    ) -> Result<Vec<OutlineEvent>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM outline_events WHERE container_id = ? ORDER BY seq",
            EVENT_COLUMNS
        );
        let mut rows = self
            .conn
            .query(&sql, [container_id])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to list events: {}", e)))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            events.push(event_from_row(&row)?);
        }
        Ok(events)
    }
}

fn event_from_row(row: &Row) -> Result<OutlineEvent, DatabaseError> {
    let get_string = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::corrupt_row(format!("column {}: {}", idx, e)))
    };

    let raw_id = get_string(0)?;
    let event_id = Uuid::parse_str(&raw_id)
        .map_err(|e| DatabaseError::corrupt_row(format!("bad event id '{}': {}", raw_id, e)))?;
    let kind: EventKind = serde_json::from_str(&get_string(3)?)
        .map_err(|e| DatabaseError::corrupt_row(format!("bad event payload: {}", e)))?;

    Ok(OutlineEvent {
        event_id,
        user_id: get_string(1)?,
        container_id: get_string(2)?,
        created_at: parse_timestamp(&get_string(4)?)?,
        kind,
    })
}
