//! Role and permission evaluation.
//!
//! Authorization succeeds when any role in the authenticated role's
//! hierarchy closure carries the required permission, or the key holds it
//! as an explicit string grant.

use cortex_telemetry::auth_metrics;
use cortex_types::auth::{Permission, Role};
use cortex_types::error::AuthError;
use std::collections::BTreeSet;

fn default_policy(role: Role) -> BTreeSet<Permission> {
    match role {
        Role::Viewer => [Permission::ReadFacts, Permission::Search].into_iter().collect(),
        Role::Agent => [
            Permission::ReadFacts,
            Permission::WriteFacts,
            Permission::DeleteFacts,
            Permission::Search,
            Permission::Sync,
        ]
        .into_iter()
        .collect(),
        Role::Admin => [
            Permission::ReadFacts,
            Permission::WriteFacts,
            Permission::DeleteFacts,
            Permission::Search,
            Permission::Sync,
            Permission::PurgeData,
            Permission::ManageKeys,
            Permission::ViewLogs,
        ]
        .into_iter()
        .collect(),
        Role::System => Permission::ALL.iter().copied().collect(),
    }
}

/// Evaluates permissions against the role hierarchy and explicit grants.
#[derive(Debug, Clone, Default)]
pub struct RbacEvaluator;

impl RbacEvaluator {
    /// A fresh evaluator over the default policies.
    pub fn new() -> Self {
        RbacEvaluator
    }

    /// True when the role (through its hierarchy) or the explicit grants
    /// carry the permission.
    pub fn has_permission(
        &self,
        role: Role,
        explicit_grants: &[String],
        permission: Permission,
    ) -> bool {
        if explicit_grants.iter().any(|g| g == permission.as_str()) {
            return true;
        }
        role.closure()
            .iter()
            .any(|r| default_policy(*r).contains(&permission))
    }

    /// Errors with `PermissionDenied` when not authorized.
    pub fn authorize(
        &self,
        role: Role,
        explicit_grants: &[String],
        permission: Permission,
    ) -> Result<(), AuthError> {
        if self.has_permission(role, explicit_grants, permission) {
            Ok(())
        } else {
            auth_metrics().inc_rbac_denials();
            Err(AuthError::PermissionDenied {
                role: role.as_str().to_string(),
                permission: permission.as_str().to_string(),
            })
        }
    }
}
