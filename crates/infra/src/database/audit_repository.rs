//! Append-only sqlite store for audit events.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, Row};
use tokenbridge_domain::{AuditAction, AuditEvent, Result};
use tokio::task;
use uuid::Uuid;

use super::manager::{map_join_error, map_sql_error, DbManager};
use super::state_repository::{parse_timestamp, parse_uuid};

/// Durable writer behind the buffered audit sink.
#[async_trait]
pub trait AuditWriter: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<()>;
}

pub struct SqliteAuditRepository {
    db: Arc<DbManager>,
}

impl SqliteAuditRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Events for one account, newest first. Serves the operator-facing
    /// history view; the write path never reads.
    pub async fn events_for_account(&self, account_id: Uuid) -> Result<Vec<AuditEvent>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<Vec<AuditEvent>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, action, account_id, actor_user_id, source_ip, metadata, created_at
                     FROM audit_events
                     WHERE account_id = ?1
                     ORDER BY created_at DESC",
                )
                .map_err(map_sql_error)?;
            let events = stmt
                .query_map(params![account_id.to_string()], map_event_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(events)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl AuditWriter for SqliteAuditRepository {
    async fn append(&self, event: &AuditEvent) -> Result<()> {
        let db = Arc::clone(&self.db);
        let event = event.clone();

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            insert_event(&conn, &event)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn insert_event(conn: &Connection, event: &AuditEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_events
             (id, action, account_id, actor_user_id, source_ip, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.id.to_string(),
            event.action.as_str(),
            event.account_id.map(|id| id.to_string()),
            event.actor_user_id.map(|id| id.to_string()),
            event.source_ip,
            event.metadata.to_string(),
            event.created_at.to_rfc3339(),
        ],
    )
    .map_err(map_sql_error)?;
    Ok(())
}

fn map_event_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    let action_raw: String = row.get(1)?;
    let action = AuditAction::parse(&action_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown audit action: {action_raw}").into(),
        )
    })?;
    let metadata_raw: String = row.get(5)?;
    let metadata = serde_json::from_str(&metadata_raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(err))
    })?;

    Ok(AuditEvent {
        id: parse_uuid(row, 0)?,
        action,
        account_id: parse_optional_uuid(row, 2)?,
        actor_user_id: parse_optional_uuid(row, 3)?,
        source_ip: row.get(4)?,
        metadata,
        created_at: parse_timestamp(row, 6)?,
    })
}

fn parse_optional_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(_) => parse_uuid(row, idx).map(Some),
    }
}
