//! SQL-backed implementations of the two storage contracts the security
//! engine (C3) depends on: [`SecurityStore`] (grants/teams/roles/security
//! levels) and [`AuditSink`] (the append-only `audit_log` table). Kept here
//! rather than in `keystone-security` so that crate stays storage-agnostic
//! (§9 "C1 is an abstract capability set... tests substitute an in-memory
//! backend").

use std::marker::PhantomData;

use async_trait::async_trait;
use keystone_security::audit::{AuditEntry, AuditSink};
use keystone_security::model::{Action, Principal, Role};
use keystone_security::store::SecurityStore;
use keystone_storage::{Dialect, StorageError};
use keystone_storage_sqlx::SqlxErrorExt;
use sqlx::{Database, Pool};
use uuid::Uuid;

fn placeholder(dialect: Dialect, index: usize) -> String {
    match dialect {
        Dialect::Postgres => format!("${index}"),
        Dialect::Generic | Dialect::Sqlite | Dialect::MySql => "?".to_string(),
    }
}

/// The `SecurityStore` implementation behind every deployed keystone
/// instance: queries `grants`, `teams`/`team_members`, `roles`/
/// `role_assignments`, `objects.security_level_id`,
/// `security_level_permission_mapping`, and `project_role_minimums`.
pub struct SqlSecurityStore<DB: Database> {
    pool: Pool<DB>,
    dialect: Dialect,
    _marker: PhantomData<DB>,
}

impl<DB: Database> SqlSecurityStore<DB> {
    pub fn new(pool: Pool<DB>, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<DB> SecurityStore for SqlSecurityStore<DB>
where
    DB: Database,
    for<'q> String: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    for<'q> i64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    for<'r> (i64,): sqlx::FromRow<'r, DB::Row>,
    for<'r> (String, i64, String): sqlx::FromRow<'r, DB::Row>,
    for<'r> (String,): sqlx::FromRow<'r, DB::Row>,
{
    async fn has_direct_grant(
        &self,
        username: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        action: Action,
    ) -> Result<bool, StorageError> {
        let rid = resource_id.unwrap_or("");
        let sql = format!(
            "SELECT 1 FROM grants WHERE principal_type = {} AND principal_id = {} \
             AND resource_type = {} AND (resource_id = {} OR resource_id = '') AND action = {} LIMIT 1",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
            placeholder(self.dialect, 3),
            placeholder(self.dialect, 4),
            placeholder(self.dialect, 5),
        );
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind("user".to_string())
            .bind(username.to_string())
            .bind(resource_type.to_string())
            .bind(rid.to_string())
            .bind(action.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(row.is_some())
    }

    async fn user_teams(&self, username: &str) -> Result<Vec<String>, StorageError> {
        let sql = format!(
            "SELECT team_name FROM team_members WHERE username = {}",
            placeholder(self.dialect, 1)
        );
        let rows: Vec<(String,)> = sqlx::query_as(&sql)
            .bind(username.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    async fn has_team_grant(
        &self,
        team: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        action: Action,
    ) -> Result<bool, StorageError> {
        let rid = resource_id.unwrap_or("");
        let sql = format!(
            "SELECT 1 FROM grants WHERE principal_type = {} AND principal_id = {} \
             AND resource_type = {} AND (resource_id = {} OR resource_id = '') AND action = {} LIMIT 1",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
            placeholder(self.dialect, 3),
            placeholder(self.dialect, 4),
            placeholder(self.dialect, 5),
        );
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind("team".to_string())
            .bind(team.to_string())
            .bind(resource_type.to_string())
            .bind(rid.to_string())
            .bind(action.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(row.is_some())
    }

    async fn user_roles(&self, username: &str, project_id: Option<&str>) -> Result<Vec<Role>, StorageError> {
        // Empty/absent project_id matches only global (project_id = '')
        // role assignments (§4.3 edge case, B1).
        let rows: Vec<(String, i64, String)> = match project_id {
            Some(pid) if !pid.is_empty() => {
                let sql = format!(
                    "SELECT r.name, r.level, r.project_id FROM role_assignments ra \
                     JOIN roles r ON r.name = ra.role_name AND r.project_id = ra.project_id \
                     WHERE ra.username = {} AND (ra.project_id = {} OR ra.project_id = '')",
                    placeholder(self.dialect, 1),
                    placeholder(self.dialect, 2),
                );
                sqlx::query_as(&sql)
                    .bind(username.to_string())
                    .bind(pid.to_string())
                    .fetch_all(&self.pool)
                    .await
            }
            _ => {
                let sql = format!(
                    "SELECT r.name, r.level, r.project_id FROM role_assignments ra \
                     JOIN roles r ON r.name = ra.role_name AND r.project_id = ra.project_id \
                     WHERE ra.username = {} AND ra.project_id = ''",
                    placeholder(self.dialect, 1),
                );
                sqlx::query_as(&sql).bind(username.to_string()).fetch_all(&self.pool).await
            }
        }
        .map_err(SqlxErrorExt::into_storage_error)?;

        Ok(rows
            .into_iter()
            .map(|(name, level, project_id)| Role {
                name,
                level: level as u8,
                project_id: if project_id.is_empty() { None } else { Some(project_id) },
            })
            .collect())
    }

    async fn resource_security_level(&self, resource_type: &str, resource_id: &str) -> Result<Option<i64>, StorageError> {
        let sql = format!(
            "SELECT security_level_id FROM objects WHERE object_type = {} AND id = {} AND security_level_id IS NOT NULL",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
        );
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(resource_type.to_string())
            .bind(resource_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(row.map(|(level,)| level))
    }

    async fn security_level_allows(&self, level_id: i64, principals: &[Principal]) -> Result<bool, StorageError> {
        if principals.is_empty() {
            return Ok(false);
        }
        // "any one grant suffices" across user, team, and role principals
        // (§9 Open Question, resolved in DESIGN.md).
        let mut clauses = Vec::new();
        let mut binds: Vec<(String, String)> = Vec::new();
        for p in principals {
            let (kind, id) = match p {
                Principal::User(u) => ("user", u.clone()),
                Principal::Team(t) => ("team", t.clone()),
                Principal::Role { name, .. } => ("role", name.clone()),
            };
            binds.push((kind.to_string(), id));
        }
        let mut idx = 2; // 1 is level_id
        for _ in &binds {
            clauses.push(format!(
                "(principal_type = {} AND principal_id = {})",
                placeholder(self.dialect, idx),
                placeholder(self.dialect, idx + 1)
            ));
            idx += 2;
        }
        let sql = format!(
            "SELECT 1 FROM security_level_permission_mapping WHERE security_level_id = {} AND ({}) LIMIT 1",
            placeholder(self.dialect, 1),
            clauses.join(" OR ")
        );
        let mut query = sqlx::query_as::<DB, (i64,)>(&sql).bind(level_id);
        for (kind, id) in binds {
            query = query.bind(kind).bind(id);
        }
        let row = query.fetch_optional(&self.pool).await.map_err(SqlxErrorExt::into_storage_error)?;
        Ok(row.is_some())
    }

    async fn min_project_role_level(&self, project_id: &str, action: Action) -> Result<Option<u8>, StorageError> {
        let sql = format!(
            "SELECT min_level FROM project_role_minimums WHERE project_id = {} AND action = {}",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
        );
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(project_id.to_string())
            .bind(action.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(row.map(|(level,)| level as u8))
    }

    async fn grant_permission(
        &self,
        principal: &Principal,
        resource_type: &str,
        resource_id: Option<&str>,
        action: Action,
        level: u8,
    ) -> Result<String, StorageError> {
        let (principal_type, principal_id) = principal_kind(principal);
        let id = Uuid::new_v4().to_string();
        let sql = format!(
            "INSERT INTO grants (id, principal_type, principal_id, resource_type, resource_id, action, level) \
             VALUES ({}, {}, {}, {}, {}, {}, {})",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
            placeholder(self.dialect, 3),
            placeholder(self.dialect, 4),
            placeholder(self.dialect, 5),
            placeholder(self.dialect, 6),
            placeholder(self.dialect, 7),
        );
        sqlx::query(&sql)
            .bind(id.clone())
            .bind(principal_type)
            .bind(principal_id)
            .bind(resource_type.to_string())
            .bind(resource_id.unwrap_or("").to_string())
            .bind(action.to_string())
            .bind(level as i64)
            .execute(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(id)
    }

    async fn revoke_permission(&self, grant_id: &str) -> Result<bool, StorageError> {
        let sql = format!("DELETE FROM grants WHERE id = {}", placeholder(self.dialect, 1));
        let rows = sqlx::query(&sql)
            .bind(grant_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?
            .rows_affected();
        Ok(rows > 0)
    }

    async fn add_team_member(&self, team: &str, username: &str) -> Result<(), StorageError> {
        let ensure_team = format!(
            "INSERT INTO teams (name, created) VALUES ({}, {}) ON CONFLICT (name) DO NOTHING",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
        );
        sqlx::query(&ensure_team)
            .bind(team.to_string())
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;

        let sql = format!(
            "INSERT INTO team_members (team_name, username) VALUES ({}, {}) ON CONFLICT (team_name, username) DO NOTHING",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
        );
        sqlx::query(&sql)
            .bind(team.to_string())
            .bind(username.to_string())
            .execute(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(())
    }

    async fn remove_team_member(&self, team: &str, username: &str) -> Result<bool, StorageError> {
        let sql = format!(
            "DELETE FROM team_members WHERE team_name = {} AND username = {}",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
        );
        let rows = sqlx::query(&sql)
            .bind(team.to_string())
            .bind(username.to_string())
            .execute(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?
            .rows_affected();
        Ok(rows > 0)
    }

    async fn assign_role(&self, username: &str, role_name: &str, project_id: Option<&str>) -> Result<(), StorageError> {
        let pid = project_id.unwrap_or("");
        let sql = format!(
            "INSERT INTO role_assignments (username, role_name, project_id) VALUES ({}, {}, {}) \
             ON CONFLICT (username, role_name, project_id) DO NOTHING",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
            placeholder(self.dialect, 3),
        );
        sqlx::query(&sql)
            .bind(username.to_string())
            .bind(role_name.to_string())
            .bind(pid.to_string())
            .execute(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(())
    }

    async fn revoke_role(&self, username: &str, role_name: &str, project_id: Option<&str>) -> Result<bool, StorageError> {
        let pid = project_id.unwrap_or("");
        let sql = format!(
            "DELETE FROM role_assignments WHERE username = {} AND role_name = {} AND project_id = {}",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
            placeholder(self.dialect, 3),
        );
        let rows = sqlx::query(&sql)
            .bind(username.to_string())
            .bind(role_name.to_string())
            .bind(pid.to_string())
            .execute(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?
            .rows_affected();
        Ok(rows > 0)
    }
}

/// `(principal_type, principal_id)` as stored in `grants`/
/// `security_level_permission_mapping` (§3 "Permission grant" principal tuple).
fn principal_kind(principal: &Principal) -> (&'static str, String) {
    match principal {
        Principal::User(u) => ("user", u.clone()),
        Principal::Team(t) => ("team", t.clone()),
        Principal::Role { name, .. } => ("role", name.clone()),
    }
}

/// Writes every `check_access` decision to the append-only `audit_log`
/// table (§3 "Audit entry"). Always invoked off the decision path via
/// `AuditQueue` — a slow or failing write never delays a response.
pub struct SqlAuditSink<DB: Database> {
    pool: Pool<DB>,
    dialect: Dialect,
    _marker: PhantomData<DB>,
}

impl<DB: Database> SqlAuditSink<DB> {
    pub fn new(pool: Pool<DB>, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<DB> AuditSink for SqlAuditSink<DB>
where
    DB: Database,
    for<'q> String: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    for<'q> i64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
{
    async fn write(&self, entry: AuditEntry) {
        let sql = format!(
            "INSERT INTO audit_log (created, username, resource_type, resource_id, action, allowed, \
             cache_hit, reason, ip, user_agent, context, severity) VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
            placeholder(self.dialect, 3),
            placeholder(self.dialect, 4),
            placeholder(self.dialect, 5),
            placeholder(self.dialect, 6),
            placeholder(self.dialect, 7),
            placeholder(self.dialect, 8),
            placeholder(self.dialect, 9),
            placeholder(self.dialect, 10),
            placeholder(self.dialect, 11),
            placeholder(self.dialect, 12),
        );
        let context_json = serde_json::to_string(&entry.context).unwrap_or_else(|_| "{}".to_string());
        let result = sqlx::query(&sql)
            .bind(entry.timestamp)
            .bind(entry.principal)
            .bind(entry.resource_type)
            .bind(entry.resource_id.unwrap_or_default())
            .bind(entry.action)
            .bind(entry.allowed as i64)
            .bind(entry.cache_hit as i64)
            .bind(entry.reason)
            .bind(entry.ip.unwrap_or_default())
            .bind(entry.user_agent.unwrap_or_default())
            .bind(context_json)
            .bind(format!("{:?}", entry.severity).to_uppercase())
            .execute(&self.pool)
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "failed to persist audit entry");
        }
    }
}

/// Backs the `authenticate`/`register` convenience paths: a single `users`
/// table of `(username, argon2 password_hash, created)`, outside the
/// `objects` skeleton since credentials aren't a domain entity (§3 only
/// lists domain entities; auth is a SUPPLEMENT per SPEC_FULL.md).
pub struct SqlUserStore<DB: Database> {
    pool: Pool<DB>,
    dialect: Dialect,
    _marker: PhantomData<DB>,
}

impl<DB: Database> SqlUserStore<DB> {
    pub fn new(pool: Pool<DB>, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            _marker: PhantomData,
        }
    }
}

impl<DB> SqlUserStore<DB>
where
    DB: Database,
    for<'q> String: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    for<'q> i64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    for<'r> (String,): sqlx::FromRow<'r, DB::Row>,
{
    /// Creates a new user row. Fails with `StorageError::Other` if the
    /// username is already taken (caller surfaces this as a validation error).
    pub async fn register(&self, username: &str, password_hash: &str, now: i64) -> Result<(), StorageError> {
        let exists_sql = format!("SELECT username FROM users WHERE username = {}", placeholder(self.dialect, 1));
        let existing: Option<(String,)> = sqlx::query_as(&exists_sql)
            .bind(username.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        if existing.is_some() {
            return Err(StorageError::Other(format!("username '{username}' already registered")));
        }
        let sql = format!(
            "INSERT INTO users (username, password_hash, created) VALUES ({}, {}, {})",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
            placeholder(self.dialect, 3),
        );
        sqlx::query(&sql)
            .bind(username.to_string())
            .bind(password_hash.to_string())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(())
    }

    /// The stored password hash for `username`, if the user exists.
    pub async fn password_hash(&self, username: &str) -> Result<Option<String>, StorageError> {
        let sql = format!(
            "SELECT password_hash FROM users WHERE username = {}",
            placeholder(self.dialect, 1)
        );
        let row: Option<(String,)> = sqlx::query_as(&sql)
            .bind(username.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(row.map(|(h,)| h))
    }
}

/// Prunes `audit_log` rows older than `retention_days` (§3 "pruned by a
/// background sweeper after retention"). Wired up as a daily
/// `keystone_scheduler` task by the binary crate.
pub async fn prune_audit_log<DB>(pool: &Pool<DB>, dialect: Dialect, retention_days: i64, now: i64) -> Result<u64, StorageError>
where
    DB: Database,
    for<'q> i64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
{
    let cutoff = now - retention_days * 86_400;
    let sql = format!("DELETE FROM audit_log WHERE created < {}", placeholder(dialect, 1));
    let result = sqlx::query(&sql)
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(SqlxErrorExt::into_storage_error)?;
    Ok(result.rows_affected())
}
