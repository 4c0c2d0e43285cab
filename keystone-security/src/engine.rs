//! The security engine (C3): the single source of authorization truth.

use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditEntry, AuditQueue, Severity};
use crate::cache::{CacheKey, DecisionCache};
use crate::model::{AccessRequest, Action, Decision, DecisionSource, PermissionSet, Principal};
use crate::store::SecurityStore;

/// Metadata about the request carried alongside an [`AccessRequest`] purely
/// for audit purposes — it never affects the decision.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

pub struct SecurityEngine {
    store: Arc<dyn SecurityStore>,
    cache: Arc<DecisionCache>,
    audit: AuditQueue,
}

impl SecurityEngine {
    pub fn new(store: Arc<dyn SecurityStore>, cache: Arc<DecisionCache>, audit: AuditQueue) -> Self {
        Self { store, cache, audit }
    }

    /// Background cleaner cadence per §4.2; call once at startup.
    pub fn spawn_cache_cleaner(&self, interval: Duration) {
        self.cache.spawn_cleaner(interval);
    }

    /// §4.2 "Explicit invalidation surfaces" / §3 invariant: call whenever a
    /// user's role, team membership, or grants change, before the caller
    /// that made the change returns.
    pub fn invalidate_user(&self, username: &str) {
        self.cache.invalidate_user(username);
    }

    /// Call whenever a resource's security level changes (§3 invariant).
    pub fn invalidate_resource(&self, resource_type: &str, resource_id: &str) {
        self.cache.invalidate_resource(resource_type, resource_id);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// `check_access(request) → decision`, per §4.3's six-step resolution
    /// algorithm. Always writes exactly one audit entry, asynchronously.
    pub async fn check_access(&self, request: &AccessRequest, meta: &RequestMeta) -> Decision {
        let decision = self.resolve(request).await;
        self.emit_audit(request, &decision, meta);
        decision
    }

    async fn resolve(&self, request: &AccessRequest) -> Decision {
        let key = CacheKey::new(
            &request.username,
            &request.resource_type,
            request.resource_id.as_deref(),
            &request.action.to_string(),
            &request.context,
        );
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let decision = match self.resolve_uncached(request).await {
            Ok(decision) => decision,
            Err(_) => Decision {
                allowed: false,
                reason: DecisionSource::StorageError.to_string(),
                cache_hit: false,
                permission_set: None,
            },
        };

        self.cache.insert(
            key,
            &request.username,
            &request.resource_type,
            request.resource_id.as_deref(),
            decision.allowed,
            decision.reason.clone(),
            decision.permission_set,
        );
        decision
    }

    /// Steps 1-6 of the resolution algorithm. Storage errors bubble up so
    /// the caller can apply the fail-safe-deny default without caching the
    /// (transient) failure.
    async fn resolve_uncached(&self, req: &AccessRequest) -> Result<Decision, keystone_storage::StorageError> {
        let resource_id = req.resource_id.as_deref();

        // Steps 1-3: tentative allow, most-specific source first.
        let mut source: Option<DecisionSource> = None;
        let mut allow_principals: Vec<Principal> = Vec::new();

        allow_principals.push(Principal::User(req.username.clone()));

        if self
            .store
            .has_direct_grant(&req.username, &req.resource_type, resource_id, req.action)
            .await?
        {
            source = Some(DecisionSource::DirectUser);
        }

        let teams = self.store.user_teams(&req.username).await?;
        if source.is_none() {
            for team in &teams {
                if self
                    .store
                    .has_team_grant(team, &req.resource_type, resource_id, req.action)
                    .await?
                {
                    source = Some(DecisionSource::Team(team.clone()));
                    break;
                }
            }
        }
        for team in &teams {
            allow_principals.push(Principal::Team(team.clone()));
        }

        let roles = self.store.user_roles(&req.username, req.project_id()).await?;
        if source.is_none() {
            for role in &roles {
                if role.level >= req.action.min_role_level() {
                    source = Some(DecisionSource::Role(role.name.clone()));
                    break;
                }
            }
        }
        for role in &roles {
            allow_principals.push(Principal::Role {
                name: role.name.clone(),
                project_id: role.project_id.clone(),
            });
        }

        let Some(source) = source else {
            return Ok(Decision {
                allowed: false,
                reason: DecisionSource::NoGrant.to_string(),
                cache_hit: false,
                permission_set: Some(self.permission_set(&roles)),
            });
        };

        // Step 4: security-level gate.
        if let Some(resource_id) = resource_id {
            if let Some(level_id) = self
                .store
                .resource_security_level(&req.resource_type, resource_id)
                .await?
            {
                let allowed = self.store.security_level_allows(level_id, &allow_principals).await?;
                if !allowed {
                    return Ok(Decision {
                        allowed: false,
                        reason: DecisionSource::SecurityLevelDenied.to_string(),
                        cache_hit: false,
                        permission_set: Some(self.permission_set(&roles)),
                    });
                }
            }
        }

        // Step 5: project-role gate.
        if let Some(project_id) = req.project_id() {
            if let Some(min_level) = self.store.min_project_role_level(project_id, req.action).await? {
                let effective_level = roles
                    .iter()
                    .filter(|r| r.project_id.as_deref() == Some(project_id) || r.project_id.is_none())
                    .map(|r| r.level)
                    .max()
                    .unwrap_or(0);
                if effective_level < min_level {
                    return Ok(Decision {
                        allowed: false,
                        reason: DecisionSource::ProjectRoleDenied.to_string(),
                        cache_hit: false,
                        permission_set: Some(self.permission_set(&roles)),
                    });
                }
            }
        }

        // Step 6: allow.
        Ok(Decision {
            allowed: true,
            reason: source.to_string(),
            cache_hit: false,
            permission_set: Some(self.permission_set(&roles)),
        })
    }

    fn permission_set(&self, roles: &[crate::model::Role]) -> PermissionSet {
        let max_level = roles.iter().map(|r| r.level).max().unwrap_or(0);
        [Action::Read, Action::Create, Action::Update, Action::Execute, Action::Delete]
            .into_iter()
            .fold(PermissionSet::EMPTY, |set, action| {
                if max_level >= action.min_role_level() {
                    set.with(action)
                } else {
                    set
                }
            })
    }

    fn emit_audit(&self, req: &AccessRequest, decision: &Decision, meta: &RequestMeta) {
        let severity = if decision.reason == DecisionSource::StorageError.to_string() {
            Severity::Error
        } else if decision.allowed {
            Severity::Info
        } else {
            Severity::Warning
        };
        self.audit.submit(AuditEntry {
            timestamp: chrono::Utc::now().timestamp(),
            principal: req.username.clone(),
            resource_type: req.resource_type.clone(),
            resource_id: req.resource_id.clone(),
            action: req.action.to_string(),
            allowed: decision.allowed,
            reason: decision.reason.clone(),
            cache_hit: decision.cache_hit,
            ip: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
            context: req.context.clone(),
            severity,
        });
    }

    async fn can(&self, username: &str, resource_type: &str, resource_id: Option<&str>, action: Action) -> bool {
        let request = AccessRequest {
            username: username.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(str::to_string),
            action,
            context: Default::default(),
        };
        self.check_access(&request, &RequestMeta::default()).await.allowed
    }

    pub async fn can_user_create(&self, username: &str, resource_type: &str) -> bool {
        self.can(username, resource_type, None, Action::Create).await
    }

    pub async fn can_user_read(&self, username: &str, resource_type: &str, resource_id: Option<&str>) -> bool {
        self.can(username, resource_type, resource_id, Action::Read).await
    }

    pub async fn can_user_update(&self, username: &str, resource_type: &str, resource_id: &str) -> bool {
        self.can(username, resource_type, Some(resource_id), Action::Update).await
    }

    pub async fn can_user_delete(&self, username: &str, resource_type: &str, resource_id: &str) -> bool {
        self.can(username, resource_type, Some(resource_id), Action::Delete).await
    }

    pub async fn can_user_list(&self, username: &str, resource_type: &str) -> bool {
        self.can(username, resource_type, Some(""), Action::Read).await
    }

    /// Derived permission set for a target, for UI hints.
    pub async fn get_access_summary(&self, username: &str, resource_type: &str, resource_id: Option<&str>) -> PermissionSet {
        let request = AccessRequest {
            username: username.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(str::to_string),
            action: Action::Read,
            context: Default::default(),
        };
        self.check_access(&request, &RequestMeta::default())
            .await
            .permission_set
            .unwrap_or(PermissionSet::EMPTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NullAuditSink;
    use crate::model::Role;
    use async_trait::async_trait;
    use keystone_storage::StorageError;
    use std::collections::HashMap as StdHashMap;

    struct FakeStore {
        direct: bool,
        teams: Vec<String>,
        team_grant: Option<String>,
        roles: Vec<Role>,
        security_level: Option<i64>,
        security_level_allows: bool,
        min_project_role: Option<u8>,
    }

    #[async_trait]
    impl SecurityStore for FakeStore {
        async fn has_direct_grant(&self, _u: &str, _rt: &str, _rid: Option<&str>, _a: Action) -> Result<bool, StorageError> {
            Ok(self.direct)
        }
        async fn user_teams(&self, _u: &str) -> Result<Vec<String>, StorageError> {
            Ok(self.teams.clone())
        }
        async fn has_team_grant(&self, team: &str, _rt: &str, _rid: Option<&str>, _a: Action) -> Result<bool, StorageError> {
            Ok(self.team_grant.as_deref() == Some(team))
        }
        async fn user_roles(&self, _u: &str, _p: Option<&str>) -> Result<Vec<Role>, StorageError> {
            Ok(self.roles.clone())
        }
        async fn resource_security_level(&self, _rt: &str, _rid: &str) -> Result<Option<i64>, StorageError> {
            Ok(self.security_level)
        }
        async fn security_level_allows(&self, _level: i64, _p: &[Principal]) -> Result<bool, StorageError> {
            Ok(self.security_level_allows)
        }
        async fn min_project_role_level(&self, _p: &str, _a: Action) -> Result<Option<u8>, StorageError> {
            Ok(self.min_project_role)
        }
        async fn grant_permission(
            &self,
            _p: &Principal,
            _rt: &str,
            _rid: Option<&str>,
            _a: Action,
            _level: u8,
        ) -> Result<String, StorageError> {
            Ok("grant-1".to_string())
        }
        async fn revoke_permission(&self, _id: &str) -> Result<bool, StorageError> {
            Ok(true)
        }
        async fn add_team_member(&self, _team: &str, _u: &str) -> Result<(), StorageError> {
            Ok(())
        }
        async fn remove_team_member(&self, _team: &str, _u: &str) -> Result<bool, StorageError> {
            Ok(true)
        }
        async fn assign_role(&self, _u: &str, _r: &str, _p: Option<&str>) -> Result<(), StorageError> {
            Ok(())
        }
        async fn revoke_role(&self, _u: &str, _r: &str, _p: Option<&str>) -> Result<bool, StorageError> {
            Ok(true)
        }
    }

    fn engine(store: FakeStore) -> SecurityEngine {
        SecurityEngine::new(
            Arc::new(store),
            DecisionCache::new(Duration::from_secs(60), 100),
            AuditQueue::spawn(Arc::new(NullAuditSink), 16),
        )
    }

    fn request(action: Action, resource_id: Option<&str>) -> AccessRequest {
        AccessRequest {
            username: "alice".into(),
            resource_type: "ticket".into(),
            resource_id: resource_id.map(str::to_string),
            action,
            context: StdHashMap::new(),
        }
    }

    #[tokio::test]
    async fn direct_grant_allows() {
        let e = engine(FakeStore {
            direct: true,
            teams: vec![],
            team_grant: None,
            roles: vec![],
            security_level: None,
            security_level_allows: false,
            min_project_role: None,
        });
        let d = e.check_access(&request(Action::Read, Some("T-1")), &RequestMeta::default()).await;
        assert!(d.allowed);
        assert_eq!(d.reason, "direct_user");
    }

    #[tokio::test]
    async fn no_grant_denies() {
        let e = engine(FakeStore {
            direct: false,
            teams: vec![],
            team_grant: None,
            roles: vec![],
            security_level: None,
            security_level_allows: false,
            min_project_role: None,
        });
        let d = e.check_access(&request(Action::Read, Some("T-1")), &RequestMeta::default()).await;
        assert!(!d.allowed);
        assert_eq!(d.reason, "no_grant");
    }

    #[tokio::test]
    async fn security_level_vetoes_otherwise_allowed_direct_grant() {
        let e = engine(FakeStore {
            direct: true,
            teams: vec![],
            team_grant: None,
            roles: vec![],
            security_level: Some(3),
            security_level_allows: false,
            min_project_role: None,
        });
        let d = e.check_access(&request(Action::Read, Some("T-1")), &RequestMeta::default()).await;
        assert!(!d.allowed);
        assert_eq!(d.reason, "security_level_denied");
    }

    #[tokio::test]
    async fn second_lookup_is_a_cache_hit() {
        let e = engine(FakeStore {
            direct: true,
            teams: vec![],
            team_grant: None,
            roles: vec![],
            security_level: None,
            security_level_allows: false,
            min_project_role: None,
        });
        let r = request(Action::Read, Some("T-1"));
        let first = e.check_access(&r, &RequestMeta::default()).await;
        let second = e.check_access(&r, &RequestMeta::default()).await;
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
    }

    #[tokio::test]
    async fn team_grant_wins_over_no_direct_grant() {
        let e = engine(FakeStore {
            direct: false,
            teams: vec!["eng".into()],
            team_grant: Some("eng".into()),
            roles: vec![],
            security_level: None,
            security_level_allows: false,
            min_project_role: None,
        });
        let d = e.check_access(&request(Action::Read, Some("T-1")), &RequestMeta::default()).await;
        assert!(d.allowed);
        assert_eq!(d.reason, "team:eng");
    }
}
