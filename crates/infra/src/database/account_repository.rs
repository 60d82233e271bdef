//! Sqlite-backed store for linked accounts.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokenbridge_core::ports::{AccountStore, CredentialUpdate};
use tokenbridge_domain::{BrokerError, EncryptedData, LinkedAccount, Result};
use tokio::task;
use uuid::Uuid;

use super::manager::{map_join_error, map_sql_error, DbManager};
use super::state_repository::{parse_timestamp, parse_uuid};

pub struct SqliteAccountRepository {
    db: Arc<DbManager>,
}

impl SqliteAccountRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountStore for SqliteAccountRepository {
    async fn upsert(&self, account: &LinkedAccount) -> Result<Uuid> {
        let db = Arc::clone(&self.db);
        let account = account.clone();

        task::spawn_blocking(move || -> Result<Uuid> {
            let conn = db.get_connection()?;
            upsert_account(&conn, &account)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get_for_use(&self, owner_user_id: Uuid) -> Result<Option<LinkedAccount>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<Option<LinkedAccount>> {
            let conn = db.get_connection()?;
            conn.query_row(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM linked_accounts
                     WHERE owner_user_id = ?1
                     ORDER BY updated_at DESC
                     LIMIT 1"
                ),
                params![owner_user_id.to_string()],
                map_account_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get_by_id(&self, account_id: Uuid) -> Result<Option<LinkedAccount>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<Option<LinkedAccount>> {
            let conn = db.get_connection()?;
            conn.query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM linked_accounts WHERE id = ?1"),
                params![account_id.to_string()],
                map_account_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn update_tokens(&self, account_id: Uuid, update: &CredentialUpdate) -> Result<()> {
        let db = Arc::clone(&self.db);
        let update = update.clone();

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let refresh_json =
                update.refresh_token_ciphertext.as_ref().map(encode_ciphertext).transpose()?;
            let updated = conn
                .execute(
                    "UPDATE linked_accounts SET
                         access_token_ciphertext = ?2,
                         refresh_token_ciphertext = COALESCE(?3, refresh_token_ciphertext),
                         token_expires_at = ?4,
                         last_refreshed_at = ?5,
                         updated_at = ?5
                     WHERE id = ?1",
                    params![
                        account_id.to_string(),
                        encode_ciphertext(&update.access_token_ciphertext)?,
                        refresh_json,
                        update.token_expires_at.to_rfc3339(),
                        update.refreshed_at.to_rfc3339(),
                    ],
                )
                .map_err(map_sql_error)?;
            if updated == 0 {
                return Err(BrokerError::NotFound("linked account not found".into()));
            }
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn mark_inactive(&self, account_id: Uuid) -> Result<()> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let updated = conn
                .execute(
                    "UPDATE linked_accounts SET is_active = 0, updated_at = ?2 WHERE id = ?1",
                    params![account_id.to_string(), chrono::Utc::now().to_rfc3339()],
                )
                .map_err(map_sql_error)?;
            if updated == 0 {
                return Err(BrokerError::NotFound("linked account not found".into()));
            }
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }
}

const ACCOUNT_COLUMNS: &str = "id, owner_user_id, external_account_id, external_handle, \
     display_name, access_token_ciphertext, refresh_token_ciphertext, granted_scopes, \
     token_expires_at, last_refreshed_at, is_active, created_at, updated_at";

/// Last-writer-wins by `(owner_user_id, external_account_id)`. A reconnect
/// replaces the credentials in place and reactivates the row; the stored row
/// id is stable across reconnects.
fn upsert_account(conn: &Connection, account: &LinkedAccount) -> Result<Uuid> {
    let id: String = conn
        .query_row(
            "INSERT INTO linked_accounts
                 (id, owner_user_id, external_account_id, external_handle, display_name,
                  access_token_ciphertext, refresh_token_ciphertext, granted_scopes,
                  token_expires_at, last_refreshed_at, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT (owner_user_id, external_account_id) DO UPDATE SET
                 external_handle = excluded.external_handle,
                 display_name = excluded.display_name,
                 access_token_ciphertext = excluded.access_token_ciphertext,
                 refresh_token_ciphertext = excluded.refresh_token_ciphertext,
                 granted_scopes = excluded.granted_scopes,
                 token_expires_at = excluded.token_expires_at,
                 last_refreshed_at = excluded.last_refreshed_at,
                 is_active = 1,
                 updated_at = excluded.updated_at
             RETURNING id",
            params![
                account.id.to_string(),
                account.owner_user_id.to_string(),
                account.external_account_id,
                account.external_handle,
                account.display_name,
                encode_ciphertext(&account.access_token_ciphertext)?,
                account.refresh_token_ciphertext.as_ref().map(encode_ciphertext).transpose()?,
                serde_json::to_string(&account.granted_scopes)
                    .map_err(|err| BrokerError::Internal(err.to_string()))?,
                account.token_expires_at.to_rfc3339(),
                account.last_refreshed_at.map(|dt| dt.to_rfc3339()),
                i32::from(account.is_active),
                account.created_at.to_rfc3339(),
                account.updated_at.to_rfc3339(),
            ],
            |row| row.get(0),
        )
        .map_err(map_sql_error)?;

    Uuid::parse_str(&id).map_err(|err| BrokerError::Database(format!("corrupt account id: {err}")))
}

fn encode_ciphertext(data: &EncryptedData) -> Result<String> {
    serde_json::to_string(data).map_err(|err| BrokerError::Internal(err.to_string()))
}

fn map_account_row(row: &Row<'_>) -> rusqlite::Result<LinkedAccount> {
    Ok(LinkedAccount {
        id: parse_uuid(row, 0)?,
        owner_user_id: parse_uuid(row, 1)?,
        external_account_id: row.get(2)?,
        external_handle: row.get(3)?,
        display_name: row.get(4)?,
        access_token_ciphertext: parse_json(row, 5)?,
        refresh_token_ciphertext: parse_optional_json(row, 6)?,
        granted_scopes: parse_json(row, 7)?,
        token_expires_at: parse_timestamp(row, 8)?,
        last_refreshed_at: parse_optional_timestamp(row, 9)?,
        is_active: row.get::<_, i32>(10)? != 0,
        created_at: parse_timestamp(row, 11)?,
        updated_at: parse_timestamp(row, 12)?,
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn parse_optional_json<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        serde_json::from_str(&raw).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
    })
    .transpose()
}

fn parse_optional_timestamp(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<chrono::DateTime<chrono::Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(_) => parse_timestamp(row, idx).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    use super::*;

    async fn setup() -> (SqliteAccountRepository, Arc<DbManager>, TempDir) {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db_path = temp_dir.path().join("accounts.db");

        let manager = Arc::new(DbManager::new(&db_path, 4).expect("db manager created"));
        manager.run_migrations().expect("migrations run");

        let repo = SqliteAccountRepository::new(Arc::clone(&manager));
        (repo, manager, temp_dir)
    }

    fn sample_account(owner: Uuid, external_id: &str) -> LinkedAccount {
        let now = Utc::now();
        LinkedAccount {
            id: Uuid::new_v4(),
            owner_user_id: owner,
            external_account_id: external_id.into(),
            external_handle: "someone".into(),
            display_name: Some("Someone".into()),
            access_token_ciphertext: EncryptedData {
                nonce: vec![1; 12],
                ciphertext: vec![2; 32],
                algorithm: "AES-256-GCM".into(),
            },
            refresh_token_ciphertext: Some(EncryptedData {
                nonce: vec![3; 12],
                ciphertext: vec![4; 32],
                algorithm: "AES-256-GCM".into(),
            }),
            granted_scopes: vec!["tweet.read".into(), "offline.access".into()],
            token_expires_at: now + Duration::seconds(7200),
            last_refreshed_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_and_read_back_round_trips() {
        let (repo, _manager, _dir) = setup().await;

        let owner = Uuid::new_v4();
        let account = sample_account(owner, "12345");
        let id = repo.upsert(&account).await.expect("upserted");

        let stored = repo.get_by_id(id).await.expect("queried").expect("present");
        assert_eq!(stored.external_handle, "someone");
        assert_eq!(stored.access_token_ciphertext, account.access_token_ciphertext);
        assert_eq!(stored.granted_scopes, account.granted_scopes);
        assert!(stored.is_active);

        let by_owner = repo.get_for_use(owner).await.expect("queried").expect("present");
        assert_eq!(by_owner.id, id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconnect_keeps_row_id_and_reactivates() {
        let (repo, _manager, _dir) = setup().await;

        let owner = Uuid::new_v4();
        let first = sample_account(owner, "12345");
        let id = repo.upsert(&first).await.expect("first upsert");
        repo.mark_inactive(id).await.expect("deactivated");

        let mut second = sample_account(owner, "12345");
        second.external_handle = "renamed".into();
        second.access_token_ciphertext.ciphertext = vec![9; 32];
        let id_again = repo.upsert(&second).await.expect("second upsert");

        assert_eq!(id, id_again, "conflict upsert must keep the canonical row id");
        let stored = repo.get_by_id(id).await.expect("queried").expect("present");
        assert!(stored.is_active, "reconnect reactivates a revoked row");
        assert_eq!(stored.external_handle, "renamed");
        assert_eq!(stored.access_token_ciphertext.ciphertext, vec![9; 32]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn different_external_accounts_get_distinct_rows() {
        let (repo, _manager, _dir) = setup().await;

        let owner = Uuid::new_v4();
        let a = repo.upsert(&sample_account(owner, "111")).await.expect("a");
        let b = repo.upsert(&sample_account(owner, "222")).await.expect("b");
        assert_ne!(a, b);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_tokens_preserves_refresh_when_not_rotated() {
        let (repo, _manager, _dir) = setup().await;

        let owner = Uuid::new_v4();
        let account = sample_account(owner, "12345");
        let original_refresh = account.refresh_token_ciphertext.clone().unwrap();
        let id = repo.upsert(&account).await.expect("upserted");

        let now = Utc::now();
        let update = CredentialUpdate {
            access_token_ciphertext: EncryptedData {
                nonce: vec![7; 12],
                ciphertext: vec![8; 32],
                algorithm: "AES-256-GCM".into(),
            },
            refresh_token_ciphertext: None,
            token_expires_at: now + Duration::seconds(7200),
            refreshed_at: now,
        };
        repo.update_tokens(id, &update).await.expect("updated");

        let stored = repo.get_by_id(id).await.expect("queried").expect("present");
        assert_eq!(stored.access_token_ciphertext.ciphertext, vec![8; 32]);
        assert_eq!(stored.refresh_token_ciphertext, Some(original_refresh));
        assert!(stored.last_refreshed_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_tokens_on_missing_account_is_not_found() {
        let (repo, _manager, _dir) = setup().await;

        let update = CredentialUpdate {
            access_token_ciphertext: EncryptedData {
                nonce: vec![0; 12],
                ciphertext: vec![0; 16],
                algorithm: "AES-256-GCM".into(),
            },
            refresh_token_ciphertext: None,
            token_expires_at: Utc::now(),
            refreshed_at: Utc::now(),
        };
        let result = repo.update_tokens(Uuid::new_v4(), &update).await;
        assert!(matches!(result, Err(BrokerError::NotFound(_))));
    }
}
