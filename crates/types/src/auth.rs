//! API key metadata, authentication results and the RBAC vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Prefix of every raw API key. The wire format is `ctx_<64-hex>`.
pub const API_KEY_PREFIX: &str = "ctx_";

/// Number of leading characters of the raw key stored for display.
pub const API_KEY_DISPLAY_PREFIX_LEN: usize = 12;

/// Persisted metadata for an API key. The raw key itself is shown exactly
/// once at creation; only its SHA-256 is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// Key row id.
    pub id: i64,
    /// Human-readable key name.
    pub name: String,
    /// First characters of the raw key, for display only.
    pub key_prefix: String,
    /// Tenant the key is bound to.
    pub tenant_id: String,
    /// The key's role.
    pub role: Role,
    /// Explicit permission grants beyond the role's defaults.
    pub permissions: Vec<String>,
    /// Requests allowed per rate window.
    pub rate_limit: u32,
    /// False once revoked.
    pub is_active: bool,
    /// Creation timestamp (ISO-8601 UTC).
    pub created_at: String,
    /// Last successful authentication, best-effort.
    pub last_used: Option<String>,
}

/// The result of authenticating a candidate raw key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// True iff the key resolved to an active row.
    pub authenticated: bool,
    /// Tenant binding, when authenticated.
    pub tenant_id: Option<String>,
    /// Role, when authenticated.
    pub role: Option<Role>,
    /// Explicit permission grants, when authenticated.
    pub permissions: Vec<String>,
    /// The key's name, when authenticated.
    pub key_name: Option<String>,
    /// Failure reason, when not authenticated.
    pub error: Option<String>,
}

impl AuthResult {
    /// A failed authentication with the given reason.
    pub fn denied(reason: &str) -> Self {
        AuthResult {
            authenticated: false,
            tenant_id: None,
            role: None,
            permissions: Vec::new(),
            key_name: None,
            error: Some(reason.to_string()),
        }
    }
}

/// Predefined roles. Hierarchy: `System > Admin > Agent > Viewer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access including system configuration.
    System,
    /// Operational administration within a deployment.
    Admin,
    /// A working agent: read, write, search, sync.
    Agent,
    /// Read-only access.
    Viewer,
}

impl Role {
    /// The hierarchy closure: every role whose permissions this role
    /// inherits, including itself.
    pub fn closure(&self) -> &'static [Role] {
        match self {
            Role::System => &[Role::System, Role::Admin, Role::Agent, Role::Viewer],
            Role::Admin => &[Role::Admin, Role::Agent, Role::Viewer],
            Role::Agent => &[Role::Agent, Role::Viewer],
            Role::Viewer => &[Role::Viewer],
        }
    }

    /// Canonical lowercase string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Admin => "admin",
            Role::Agent => "agent",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "admin" => Ok(Role::Admin),
            "agent" => Ok(Role::Agent),
            "viewer" => Ok(Role::Viewer),
            other => Err(ValidationError::UnknownRole(other.to_string())),
        }
    }
}

/// Atomic permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    /// Read facts.
    #[serde(rename = "read:facts")]
    ReadFacts,
    /// Write facts.
    #[serde(rename = "write:facts")]
    WriteFacts,
    /// Deprecate facts.
    #[serde(rename = "delete:facts")]
    DeleteFacts,
    /// Hybrid / semantic / lexical search.
    #[serde(rename = "search")]
    Search,
    /// Synchronize with external stores.
    #[serde(rename = "sync")]
    Sync,
    /// Purge data (compaction beyond deprecation).
    #[serde(rename = "purge:data")]
    PurgeData,
    /// Create, list and revoke API keys.
    #[serde(rename = "manage:keys")]
    ManageKeys,
    /// Read audit and integrity logs.
    #[serde(rename = "view:logs")]
    ViewLogs,
    /// Override consensus outcomes.
    #[serde(rename = "consensus:override")]
    ConsensusOverride,
    /// Export database snapshots.
    #[serde(rename = "snapshot:export")]
    SnapshotExport,
    /// Change system configuration.
    #[serde(rename = "system:config")]
    SystemConfig,
}

impl Permission {
    /// Every defined permission.
    pub const ALL: &'static [Permission] = &[
        Permission::ReadFacts,
        Permission::WriteFacts,
        Permission::DeleteFacts,
        Permission::Search,
        Permission::Sync,
        Permission::PurgeData,
        Permission::ManageKeys,
        Permission::ViewLogs,
        Permission::ConsensusOverride,
        Permission::SnapshotExport,
        Permission::SystemConfig,
    ];

    /// Canonical string form, e.g. `read:facts`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ReadFacts => "read:facts",
            Permission::WriteFacts => "write:facts",
            Permission::DeleteFacts => "delete:facts",
            Permission::Search => "search",
            Permission::Sync => "sync",
            Permission::PurgeData => "purge:data",
            Permission::ManageKeys => "manage:keys",
            Permission::ViewLogs => "view:logs",
            Permission::ConsensusOverride => "consensus:override",
            Permission::SnapshotExport => "snapshot:export",
            Permission::SystemConfig => "system:config",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_is_transitive() {
        assert!(Role::System.closure().contains(&Role::Viewer));
        assert!(Role::Admin.closure().contains(&Role::Agent));
        assert!(!Role::Viewer.closure().contains(&Role::Agent));
    }

    #[test]
    fn role_round_trips() {
        for r in [Role::System, Role::Admin, Role::Agent, Role::Viewer] {
            assert_eq!(r.as_str().parse::<Role>().unwrap(), r);
        }
    }
}
