//! The storage backend contract.
//!
//! Decouples key storage from the manager logic so alternates (a hosted
//! relational backend, an in-memory test double) plug in via construction.
//! The default implementation rides the shared SQLite substrate: reads from
//! the pool, writes through the single writer.

use async_trait::async_trait;
use cortex_storage::{sql_params, ReadPool, WriteWorker};
use cortex_types::auth::{ApiKey, Role};
use cortex_types::error::AuthError;
use cortex_types::time::now_iso;
use rusqlite::Row;
use std::str::FromStr;
use std::sync::Arc;

/// What the manager needs from key storage.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Ensures the backend's schema exists.
    async fn initialize(&self) -> Result<(), AuthError>;

    /// Fetches an active key row by its SHA-256 hash.
    async fn get_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, AuthError>;

    /// Persists a new key row; returns its id.
    #[allow(clippy::too_many_arguments)]
    async fn store_key(
        &self,
        name: &str,
        key_hash: &str,
        key_prefix: &str,
        tenant_id: &str,
        role: Role,
        permissions: &[String],
        rate_limit: u32,
    ) -> Result<i64, AuthError>;

    /// Updates `last_used`, best-effort.
    async fn update_last_used(&self, key_id: i64) -> Result<(), AuthError>;

    /// Lists keys, optionally per tenant.
    async fn list_keys(&self, tenant_id: Option<&str>) -> Result<Vec<ApiKey>, AuthError>;

    /// Deactivates a key. Returns false when it did not exist.
    async fn revoke_key(&self, key_id: i64) -> Result<bool, AuthError>;
}

/// The default backend over the shared substrate.
pub struct SqliteAuthBackend {
    writer: Arc<WriteWorker>,
    pool: Arc<ReadPool>,
}

impl SqliteAuthBackend {
    /// A backend over the shared writer and pool.
    pub fn new(writer: Arc<WriteWorker>, pool: Arc<ReadPool>) -> Self {
        SqliteAuthBackend { writer, pool }
    }
}

fn decode_key_row(row: &Row<'_>) -> rusqlite::Result<ApiKey> {
    let role_text: String = row.get(5)?;
    let permissions_json: String = row.get(6)?;
    let permissions: Vec<String> = serde_json::from_str(&permissions_json).unwrap_or_default();
    Ok(ApiKey {
        id: row.get(0)?,
        name: row.get(1)?,
        key_prefix: row.get(3)?,
        tenant_id: row.get(4)?,
        role: Role::from_str(&role_text).unwrap_or(Role::Viewer),
        permissions,
        rate_limit: row.get::<_, i64>(7)? as u32,
        is_active: row.get::<_, i64>(8)? != 0,
        created_at: row.get(9)?,
        last_used: row.get(10)?,
    })
}

const KEY_COLUMNS: &str = "id, name, key_hash, key_prefix, tenant_id, role, permissions, \
     rate_limit, is_active, created_at, last_used";

#[async_trait]
impl AuthBackend for SqliteAuthBackend {
    async fn initialize(&self) -> Result<(), AuthError> {
        // The api_keys table ships with the base schema; nothing extra.
        Ok(())
    }

    async fn get_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, AuthError> {
        let key_hash = key_hash.to_string();
        self.pool
            .run(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {KEY_COLUMNS} FROM api_keys
                         WHERE key_hash = ?1 AND is_active = 1"
                    ),
                    [key_hash],
                    decode_key_row,
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })
            })
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))
    }

    async fn store_key(
        &self,
        name: &str,
        key_hash: &str,
        key_prefix: &str,
        tenant_id: &str,
        role: Role,
        permissions: &[String],
        rate_limit: u32,
    ) -> Result<i64, AuthError> {
        let permissions_json =
            serde_json::to_string(permissions).map_err(|e| AuthError::Backend(e.to_string()))?;
        let outcome = self
            .writer
            .execute(
                "INSERT INTO api_keys
                     (name, key_hash, key_prefix, tenant_id, role, permissions, rate_limit,
                      created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                sql_params![
                    name,
                    key_hash,
                    key_prefix,
                    tenant_id,
                    role.as_str(),
                    permissions_json,
                    i64::from(rate_limit),
                    now_iso()
                ],
            )
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        Ok(outcome.last_insert_rowid)
    }

    async fn update_last_used(&self, key_id: i64) -> Result<(), AuthError> {
        self.writer
            .execute(
                "UPDATE api_keys SET last_used = ?1 WHERE id = ?2",
                sql_params![now_iso(), key_id],
            )
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_keys(&self, tenant_id: Option<&str>) -> Result<Vec<ApiKey>, AuthError> {
        let tenant = tenant_id.map(str::to_string);
        self.pool
            .run(move |conn| {
                let mut sql = format!("SELECT {KEY_COLUMNS} FROM api_keys");
                let mut params: Vec<rusqlite::types::Value> = Vec::new();
                if let Some(tenant) = tenant {
                    sql.push_str(" WHERE tenant_id = ?");
                    params.push(rusqlite::types::Value::Text(tenant));
                }
                sql.push_str(" ORDER BY id");
                let mut stmt = conn.prepare(&sql)?;
                let keys = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), decode_key_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))
    }

    async fn revoke_key(&self, key_id: i64) -> Result<bool, AuthError> {
        let outcome = self
            .writer
            .execute(
                "UPDATE api_keys SET is_active = 0 WHERE id = ?1",
                sql_params![key_id],
            )
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        Ok(outcome.rows_affected > 0)
    }
}
