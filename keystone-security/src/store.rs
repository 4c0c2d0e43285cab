//! Storage queries the security engine needs, kept behind a trait so the
//! engine itself stays storage-agnostic (it only ever talks to [`C1`] through
//! here, never to a concrete driver).
//!
//! [C1]: keystone_storage

use async_trait::async_trait;
use keystone_storage::StorageError;

use crate::model::{Action, Principal, Role};

/// Everything [`crate::engine::SecurityEngine`] needs to resolve an access
/// decision and look up audience for the event hub's permission filter.
#[async_trait]
pub trait SecurityStore: Send + Sync {
    /// Does a direct-user grant exist for `(resource_type, resource_id, action)`?
    /// `resource_id = None` matches a grant row recorded as "any instance".
    async fn has_direct_grant(
        &self,
        username: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        action: Action,
    ) -> Result<bool, StorageError>;

    /// Teams the user belongs to.
    async fn user_teams(&self, username: &str) -> Result<Vec<String>, StorageError>;

    /// Does team `team` hold a grant for `(resource_type, resource_id, action)`?
    async fn has_team_grant(
        &self,
        team: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        action: Action,
    ) -> Result<bool, StorageError>;

    /// The user's roles: global roles plus any scoped to `project_id`.
    async fn user_roles(&self, username: &str, project_id: Option<&str>) -> Result<Vec<Role>, StorageError>;

    /// The `security_level_id` attached to a concrete resource instance, if any.
    async fn resource_security_level(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<i64>, StorageError>;

    /// Whether any of `principals` is whitelisted in
    /// `security_level_permission_mapping` for `level_id`.
    async fn security_level_allows(&self, level_id: i64, principals: &[Principal]) -> Result<bool, StorageError>;

    /// The minimum role level configured for `action` in `project_id`'s
    /// project-role gate, if one is configured. `None` means no gate applies.
    async fn min_project_role_level(&self, project_id: &str, action: Action) -> Result<Option<u8>, StorageError>;

    /// Administration surface behind the `permission`/`team`/`account`
    /// special verbs (SPEC_FULL.md "Canonical object registry"). Every one
    /// of these is a write to a table `resolve_uncached` reads, so the
    /// dispatcher must call [`crate::engine::SecurityEngine::invalidate_user`]
    /// (or `invalidate_resource`) immediately after a successful call here
    /// (§3 invariant "Permission cache entries are invalidated...").
    async fn grant_permission(
        &self,
        principal: &Principal,
        resource_type: &str,
        resource_id: Option<&str>,
        action: Action,
        level: u8,
    ) -> Result<String, StorageError>;

    async fn revoke_permission(&self, grant_id: &str) -> Result<bool, StorageError>;

    async fn add_team_member(&self, team: &str, username: &str) -> Result<(), StorageError>;

    async fn remove_team_member(&self, team: &str, username: &str) -> Result<bool, StorageError>;

    async fn assign_role(&self, username: &str, role_name: &str, project_id: Option<&str>) -> Result<(), StorageError>;

    async fn revoke_role(&self, username: &str, role_name: &str, project_id: Option<&str>) -> Result<bool, StorageError>;
}
