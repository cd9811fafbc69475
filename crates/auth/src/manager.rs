//! The API-key manager.
//!
//! Keys are `ctx_<64-hex>`; the raw key is returned exactly once at
//! creation and only its SHA-256 is persisted, with the first 12 chars
//! kept for display. Authentication hashes a dummy key when the format is
//! invalid so the invalid-format path costs the same as a real lookup, and
//! caches verdicts in a bounded LRU (values are immutable snapshots).

use crate::backend::AuthBackend;
use cortex_crypto::hash::content_hash;
use cortex_telemetry::auth_metrics;
use cortex_types::auth::{ApiKey, AuthResult, Role, API_KEY_DISPLAY_PREFIX_LEN, API_KEY_PREFIX};
use cortex_types::error::AuthError;
use lru::LruCache;
use rand::RngCore;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex as StdMutex};
use tracing::{info, warn};

/// Raw key entropy in bytes (hex-encoded to 64 chars).
const KEY_LENGTH: usize = 32;

/// Bound on the authentication verdict cache.
const CACHE_SIZE: usize = 256;

/// Manages API-key issuance and authentication.
pub struct AuthManager {
    backend: Arc<dyn AuthBackend>,
    cache: StdMutex<LruCache<String, AuthResult>>,
}

impl AuthManager {
    /// A manager over the given backend.
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        let capacity = NonZeroUsize::new(CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        AuthManager {
            backend,
            cache: StdMutex::new(LruCache::new(capacity)),
        }
    }

    /// Initializes the backend schema.
    pub async fn initialize(&self) -> Result<(), AuthError> {
        self.backend.initialize().await
    }

    /// Creates a key. Returns `(raw_key, metadata)`; the raw key is never
    /// recoverable afterwards.
    pub async fn create_key(
        &self,
        name: &str,
        tenant_id: &str,
        role: Role,
        permissions: Vec<String>,
        rate_limit: u32,
    ) -> Result<(String, ApiKey), AuthError> {
        let mut secret = [0u8; KEY_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        let raw_key = format!("{API_KEY_PREFIX}{}", hex::encode(secret));
        let key_hash = content_hash(&raw_key);
        let key_prefix: String = raw_key.chars().take(API_KEY_DISPLAY_PREFIX_LEN).collect();

        let key_id = self
            .backend
            .store_key(
                name,
                &key_hash,
                &key_prefix,
                tenant_id,
                role,
                &permissions,
                rate_limit,
            )
            .await?;
        auth_metrics().inc_keys_created();
        info!(name, tenant_id, role = role.as_str(), "created API key");

        let metadata = ApiKey {
            id: key_id,
            name: name.to_string(),
            key_prefix,
            tenant_id: tenant_id.to_string(),
            role,
            permissions,
            rate_limit,
            is_active: true,
            created_at: cortex_types::time::now_iso(),
            last_used: None,
        };
        Ok((raw_key, metadata))
    }

    /// Authenticates a candidate raw key.
    pub async fn authenticate(&self, raw_key: &str) -> Result<AuthResult, AuthError> {
        let valid_format = raw_key.starts_with(API_KEY_PREFIX);
        // Equalize timing: the invalid-format path hashes a dummy anyway.
        let key_hash = if valid_format {
            content_hash(raw_key)
        } else {
            content_hash("ctx_invalid_dummy_key_to_waste_time")
        };
        if !valid_format {
            auth_metrics().inc_auth_attempts("invalid_format");
            return Ok(AuthResult::denied("Invalid key format"));
        }

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key_hash) {
                auth_metrics().inc_auth_attempts("ok");
                return Ok(hit.clone());
            }
        }

        let row = self.backend.get_key_by_hash(&key_hash).await?;
        let result = match row {
            None => {
                auth_metrics().inc_auth_attempts("invalid_key");
                AuthResult::denied("Invalid or revoked key")
            }
            Some(key) => {
                if let Err(e) = self.backend.update_last_used(key.id).await {
                    warn!(key_id = key.id, "last_used update failed: {e}");
                }
                auth_metrics().inc_auth_attempts("ok");
                AuthResult {
                    authenticated: true,
                    tenant_id: Some(key.tenant_id),
                    role: Some(key.role),
                    permissions: key.permissions,
                    key_name: Some(key.name),
                    error: None,
                }
            }
        };

        if result.authenticated {
            if let Ok(mut cache) = self.cache.lock() {
                cache.put(key_hash, result.clone());
            }
        }
        Ok(result)
    }

    /// Lists keys, optionally per tenant.
    pub async fn list_keys(&self, tenant_id: Option<&str>) -> Result<Vec<ApiKey>, AuthError> {
        self.backend.list_keys(tenant_id).await
    }

    /// Revokes a key and forgets any cached verdict for it.
    pub async fn revoke_key(&self, key_id: i64) -> Result<bool, AuthError> {
        let revoked = self.backend.revoke_key(key_id).await?;
        if revoked {
            if let Ok(mut cache) = self.cache.lock() {
                cache.clear();
            }
        }
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteAuthBackend;
    use cortex_storage::{ReadPool, WriteWorker};
    use tempfile::tempdir;

    async fn fixture() -> (tempfile::TempDir, Arc<WriteWorker>, AuthManager) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("auth.db");
        let conn = cortex_storage::open_writer(&path).unwrap();
        cortex_storage::migrations::initialize(&conn).unwrap();
        drop(conn);
        let writer = Arc::new(WriteWorker::start(&path).unwrap());
        let pool = Arc::new(ReadPool::open(&path, 1, 4).unwrap());
        let backend = Arc::new(SqliteAuthBackend::new(Arc::clone(&writer), pool));
        (dir, writer, AuthManager::new(backend))
    }

    #[tokio::test]
    async fn create_and_authenticate_round_trip() {
        let (_dir, writer, manager) = fixture().await;
        let (raw, meta) = manager
            .create_key("ci-agent", "tenant-1", Role::Agent, vec![], 100)
            .await
            .unwrap();
        assert!(raw.starts_with("ctx_"));
        assert_eq!(raw.len(), 4 + 64);
        assert_eq!(meta.key_prefix, &raw[..12]);

        let result = manager.authenticate(&raw).await.unwrap();
        assert!(result.authenticated);
        assert_eq!(result.tenant_id.as_deref(), Some("tenant-1"));
        assert_eq!(result.role, Some(Role::Agent));
        assert_eq!(result.key_name.as_deref(), Some("ci-agent"));
        writer.stop().await;
    }

    #[tokio::test]
    async fn bad_format_and_unknown_keys_are_denied() {
        let (_dir, writer, manager) = fixture().await;
        let bad = manager.authenticate("sk-not-a-cortex-key").await.unwrap();
        assert!(!bad.authenticated);
        assert_eq!(bad.error.as_deref(), Some("Invalid key format"));

        let unknown = manager
            .authenticate(&format!("ctx_{}", "0".repeat(64)))
            .await
            .unwrap();
        assert!(!unknown.authenticated);
        assert_eq!(unknown.error.as_deref(), Some("Invalid or revoked key"));
        writer.stop().await;
    }

    #[tokio::test]
    async fn revocation_takes_effect_despite_cache() {
        let (_dir, writer, manager) = fixture().await;
        let (raw, meta) = manager
            .create_key("temp", "t", Role::Viewer, vec![], 10)
            .await
            .unwrap();
        assert!(manager.authenticate(&raw).await.unwrap().authenticated);
        assert!(manager.revoke_key(meta.id).await.unwrap());
        assert!(!manager.authenticate(&raw).await.unwrap().authenticated);
        writer.stop().await;
    }

    #[tokio::test]
    async fn raw_key_is_not_persisted() {
        let (_dir, writer, manager) = fixture().await;
        let (raw, _) = manager
            .create_key("secret", "t", Role::Agent, vec![], 10)
            .await
            .unwrap();
        let row = writer
            .query_row("SELECT key_hash, key_prefix FROM api_keys WHERE name = 'secret'", vec![])
            .await
            .unwrap()
            .unwrap();
        let stored_hash = row[0].as_str().unwrap();
        assert_ne!(stored_hash, raw);
        assert_eq!(stored_hash, content_hash(&raw));
        assert_eq!(row[1].as_str(), Some(&raw[..12]));
        writer.stop().await;
    }

    #[tokio::test]
    async fn list_keys_filters_by_tenant() {
        let (_dir, writer, manager) = fixture().await;
        manager.create_key("a", "t1", Role::Agent, vec![], 10).await.unwrap();
        manager.create_key("b", "t2", Role::Agent, vec![], 10).await.unwrap();
        assert_eq!(manager.list_keys(Some("t1")).await.unwrap().len(), 1);
        assert_eq!(manager.list_keys(None).await.unwrap().len(), 2);
        writer.stop().await;
    }
}
