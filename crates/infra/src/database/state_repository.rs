//! Sqlite-backed store for pending authorizations.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tokenbridge_core::ports::{ConsumeError, StateStore};
use tokenbridge_domain::{PendingAuthorization, Result};
use tokio::task;
use tracing::debug;
use uuid::Uuid;

use super::manager::{map_join_error, map_sql_error, DbManager};

pub struct SqliteStateRepository {
    db: Arc<DbManager>,
}

impl SqliteStateRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StateStore for SqliteStateRepository {
    async fn create(&self, pending: &PendingAuthorization) -> Result<()> {
        let db = Arc::clone(&self.db);
        let pending = pending.clone();

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            insert_pending(&conn, &pending).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn consume_once(
        &self,
        state_id: &str,
    ) -> std::result::Result<PendingAuthorization, ConsumeError> {
        let db = Arc::clone(&self.db);
        let state_id = state_id.to_string();

        let pending = task::spawn_blocking(
            move || -> std::result::Result<PendingAuthorization, ConsumeError> {
                let conn = db.get_connection()?;
                delete_returning(&conn, &state_id)
            },
        )
        .await
        .map_err(map_join_error)??;

        // Deleted either way; an expired record must never be redeemable.
        if pending.is_expired_at(Utc::now()) {
            return Err(ConsumeError::Expired);
        }
        Ok(pending)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let db = Arc::clone(&self.db);

        let purged = task::spawn_blocking(move || -> Result<usize> {
            let conn = db.get_connection()?;
            conn.execute(
                "DELETE FROM pending_authorizations WHERE expires_at < ?1",
                params![now.to_rfc3339()],
            )
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)??;

        if purged > 0 {
            debug!(purged, "expired pending authorizations swept");
        }
        Ok(purged)
    }
}

fn insert_pending(conn: &Connection, pending: &PendingAuthorization) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO pending_authorizations
             (state_id, code_verifier, requesting_user_id, domain, redirect_target,
              created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            pending.state_id,
            pending.code_verifier,
            pending.requesting_user_id.to_string(),
            pending.domain,
            pending.redirect_target,
            pending.created_at.to_rfc3339(),
            pending.expires_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Atomic read-and-delete. `DELETE ... RETURNING` executes as a single
/// statement, so two racing callbacks on the same state id cannot both
/// observe the row.
fn delete_returning(
    conn: &Connection,
    state_id: &str,
) -> std::result::Result<PendingAuthorization, ConsumeError> {
    let result = conn.query_row(
        "DELETE FROM pending_authorizations WHERE state_id = ?1
         RETURNING state_id, code_verifier, requesting_user_id, domain, redirect_target,
                   created_at, expires_at",
        params![state_id],
        map_pending_row,
    );
    match result {
        Ok(pending) => Ok(pending),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(ConsumeError::NotFound),
        Err(err) => Err(ConsumeError::Backend(map_sql_error(err))),
    }
}

fn map_pending_row(row: &Row<'_>) -> rusqlite::Result<PendingAuthorization> {
    Ok(PendingAuthorization {
        state_id: row.get(0)?,
        code_verifier: row.get(1)?,
        requesting_user_id: parse_uuid(row, 2)?,
        domain: row.get(3)?,
        redirect_target: row.get(4)?,
        created_at: parse_timestamp(row, 5)?,
        expires_at: parse_timestamp(row, 6)?,
    })
}

pub(crate) fn parse_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}

pub(crate) fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw).map(|dt| dt.with_timezone(&Utc)).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn setup() -> (SqliteStateRepository, Arc<DbManager>, TempDir) {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db_path = temp_dir.path().join("states.db");

        let manager = Arc::new(DbManager::new(&db_path, 4).expect("db manager created"));
        manager.run_migrations().expect("migrations run");

        let repo = SqliteStateRepository::new(Arc::clone(&manager));
        (repo, manager, temp_dir)
    }

    fn pending(state_id: &str) -> PendingAuthorization {
        PendingAuthorization::new(
            state_id.into(),
            "verifier-material".into(),
            Uuid::new_v4(),
            "api".into(),
            Some("https://dash.example.net/settings".into()),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn consume_returns_stored_record_exactly_once() {
        let (repo, _manager, _dir) = setup().await;

        let stored = pending("state-1");
        repo.create(&stored).await.expect("state created");

        let consumed = repo.consume_once("state-1").await.expect("first consume succeeds");
        assert_eq!(consumed.code_verifier, "verifier-material");
        assert_eq!(consumed.requesting_user_id, stored.requesting_user_id);
        assert_eq!(consumed.redirect_target, stored.redirect_target);

        let replay = repo.consume_once("state-1").await;
        assert!(matches!(replay, Err(ConsumeError::NotFound)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_state_is_not_found() {
        let (repo, _manager, _dir) = setup().await;
        let result = repo.consume_once("never-issued").await;
        assert!(matches!(result, Err(ConsumeError::NotFound)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expired_state_is_deleted_on_consume() {
        let (repo, _manager, _dir) = setup().await;

        let mut stored = pending("state-old");
        stored.created_at -= chrono::Duration::seconds(700);
        stored.expires_at -= chrono::Duration::seconds(700);
        repo.create(&stored).await.expect("state created");

        let result = repo.consume_once("state-old").await;
        assert!(matches!(result, Err(ConsumeError::Expired)));

        // The expired row was removed, not left for a later retry.
        let again = repo.consume_once("state-old").await;
        assert!(matches!(again, Err(ConsumeError::NotFound)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_consumers_race_to_a_single_winner() {
        let (repo, _manager, _dir) = setup().await;
        let repo = Arc::new(repo);

        repo.create(&pending("contested")).await.expect("state created");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move { repo.consume_once("contested").await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("task completed").is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "exactly one consumer must win the race");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn purge_removes_only_expired_rows() {
        let (repo, _manager, _dir) = setup().await;

        let mut old = pending("old");
        old.created_at -= chrono::Duration::seconds(700);
        old.expires_at -= chrono::Duration::seconds(700);
        repo.create(&old).await.expect("old created");
        repo.create(&pending("fresh")).await.expect("fresh created");

        let purged = repo.purge_expired(Utc::now()).await.expect("purge succeeded");
        assert_eq!(purged, 1);

        assert!(repo.consume_once("fresh").await.is_ok());
    }
}
