//! The unified `/do` dispatch pipeline (§4.4, C4): the single entrypoint
//! every mutating and read action passes through. [`Dispatcher::dispatch`]
//! runs stages 2-7 in order — stage 1 (body parse) happens once, in the
//! axum handler, before a [`RequestContext`] is ever built.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::Database;
use uuid::Uuid;

use keystone_events::event::{Event, EventContext};
use keystone_events::hub::EventHub;
use keystone_rate_limit::{PreAuthRateLimitGuard, RateLimit, RateLimitGuard, RateLimitKeyKind, RateLimitRegistry};
use keystone_security::jwt::{extract_bearer, JwtIssuer, JwtValidator};
use keystone_security::model::{AccessRequest, Action};
use keystone_security::{RequestMeta, SecurityEngine};
use keystone_storage::{Page, Pageable, StorageError};

use crate::envelope::{DispatchRequest, DispatchResponse, RequestContext};
use crate::error::{DispatchError, DispatchFailure, DispatchResult};
use crate::object::{DbObjectRow, ObjectRecord};
use crate::registry::{object_spec, DeleteMode, ProjectIdSource, VersionState};
use crate::repository::{ObjectPatch, ObjectStore};
use crate::store::SqlUserStore;

/// Actions that bypass authentication and authorization entirely (§4.4
/// stage 3).
const NO_AUTH_ACTIONS: &[&str] = &["authenticate", "version", "jwtCapable", "dbCapable", "health"];

fn action_for_verb(verb: &str) -> Option<Action> {
    match verb {
        "create" => Some(Action::Create),
        "read" | "list" => Some(Action::Read),
        "modify" => Some(Action::Update),
        "remove" => Some(Action::Delete),
        "versionRelease" | "versionArchive" | "watcherAdd" | "watcherRemove" | "filterShare" | "customFieldValueSet" => {
            Some(Action::Execute)
        }
        _ => None,
    }
}

/// Reserved `data` keys that are skeleton columns, not part of the opaque
/// per-type property bag, and so are never folded into the `data` JSON blob.
const RESERVED_DATA_KEYS: &[&str] = &["id", "projectId", "securityLevelId", "version", "limit", "offset", "page", "size", "sort"];

fn strip_reserved(data: &Map<String, Value>) -> Map<String, Value> {
    data.iter()
        .filter(|(k, _)| !RESERVED_DATA_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// One successful mutation's side effects: the response to send and,
/// for actions that changed state, the event to publish (§4.4 stage 6).
struct ExecutionResult {
    response: DispatchResponse,
    event: Option<PendingEvent>,
}

struct PendingEvent {
    object: String,
    verb: String,
    entity_id: String,
    data: Value,
    project_id: Option<String>,
}

impl ExecutionResult {
    fn no_event(response: DispatchResponse) -> Self {
        Self { response, event: None }
    }
}

/// Owns everything the pipeline needs: the object store, the security
/// engine, the event hub, JWT issuance/validation, and rate-limit guards.
/// One instance is built at startup and shared (cheaply cloned) across
/// every request.
pub struct Dispatcher<DB: Database> {
    store: Arc<ObjectStore<DB>>,
    users: Arc<SqlUserStore<DB>>,
    engine: Arc<SecurityEngine>,
    hub: EventHub,
    jwt_validator: Arc<JwtValidator>,
    jwt_issuer: Arc<JwtIssuer>,
    general_guard: RateLimitGuard,
    pre_auth_guard: PreAuthRateLimitGuard,
}

impl<DB> Dispatcher<DB>
where
    DB: Database,
    DbObjectRow: for<'r> sqlx::FromRow<'r, DB::Row>,
    for<'q> String: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    for<'q> i64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    for<'r> (String,): sqlx::FromRow<'r, DB::Row>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ObjectStore<DB>>,
        users: Arc<SqlUserStore<DB>>,
        engine: Arc<SecurityEngine>,
        hub: EventHub,
        jwt_validator: Arc<JwtValidator>,
        jwt_issuer: Arc<JwtIssuer>,
        rate_limit_registry: RateLimitRegistry,
    ) -> Self {
        Self {
            store,
            users,
            engine,
            hub,
            jwt_validator,
            jwt_issuer,
            general_guard: RateLimitGuard::new(
                "dispatch",
                RateLimit::new(120, std::time::Duration::from_secs(60)),
                rate_limit_registry.clone(),
            ),
            pre_auth_guard: PreAuthRateLimitGuard::with_defaults(rate_limit_registry),
        }
    }

    /// Runs stages 2-7 of the pipeline. Never returns an `Err` — every
    /// failure is folded into a [`DispatchResponse`] with the canonical
    /// error code (§7), so callers always get HTTP 200 with the decision
    /// carried in `errorCode`, except where the failure itself implies a
    /// transport-level status (handled by the axum layer via `http_status`).
    pub async fn dispatch(&self, mut ctx: RequestContext) -> DispatchResponse {
        match self.try_dispatch(&mut ctx).await {
            Ok(response) => response,
            Err(failure) => failure.into_response(),
        }
    }

    async fn try_dispatch(&self, ctx: &mut RequestContext) -> DispatchResult<DispatchResponse> {
        // Stage 2: attack-prevention. General per-IP throttle for every
        // action, plus a tighter brute-force counter specifically for
        // `authenticate` (§4.4 stage 2).
        if !self.general_guard.allow(&RateLimitKeyKind::Ip(ctx.client_ip.clone())) {
            return Err(DispatchError::RateLimited.with_message("rate limit exceeded"));
        }
        let action = ctx.request.action.clone();
        let object = ctx.request.object.clone();
        if action == "authenticate" && !self.pre_auth_guard.allow(&ctx.client_ip) {
            return Err(DispatchError::RateLimited.with_message("too many authentication attempts"));
        }

        if NO_AUTH_ACTIONS.contains(&action.as_str()) {
            return self.handle_meta_action(ctx, &action).await;
        }

        // Stage 3: authentication.
        self.authenticate(ctx).await?;
        let username = ctx.username.clone().expect("authenticate sets username on success");

        // Stage 4: authorization.
        let verb_action =
            action_for_verb(&action).ok_or_else(|| DispatchError::UnknownAction.with_message(format!("unknown action '{action}'")))?;
        self.authorize(ctx, &username, &object, &action, verb_action).await?;

        // Stage 5: execution.
        let result = self.execute(ctx, &username, &object, &action).await?;

        // Stage 6: event emission — best-effort, never blocks/fails the response.
        if let Some(event) = result.event {
            self.publish_event(&event, &username).await;
        }

        // Stage 7: response.
        Ok(result.response)
    }

    async fn handle_meta_action(&self, ctx: &mut RequestContext, action: &str) -> DispatchResult<DispatchResponse> {
        match action {
            "health" | "version" | "jwtCapable" | "dbCapable" => Ok(DispatchResponse::success(json!({
                "action": action,
                "ok": true,
            }))),
            "authenticate" => self.handle_authenticate(ctx).await,
            _ => unreachable!("handle_meta_action only called for NO_AUTH_ACTIONS"),
        }
    }

    async fn handle_authenticate(&self, ctx: &mut RequestContext) -> DispatchResult<DispatchResponse> {
        let username = ctx
            .request
            .data
            .get("username")
            .and_then(Value::as_str)
            .ok_or_else(|| DispatchError::Validation.with_message("username is required"))?;
        let password = ctx
            .request
            .data
            .get("password")
            .and_then(Value::as_str)
            .ok_or_else(|| DispatchError::Validation.with_message("password is required"))?;

        let stored_hash = self
            .users
            .password_hash(username)
            .await
            .map_err(DispatchFailure::from)?
            .ok_or_else(|| DispatchError::Forbidden.with_message("invalid credentials"))?;
        let parsed = PasswordHash::new(&stored_hash).map_err(|_| DispatchError::Internal.with_message("corrupt password hash"))?;
        if Argon2::default().verify_password(password.as_bytes(), &parsed).is_err() {
            return Err(DispatchError::Forbidden.with_message("invalid credentials"));
        }

        let token = self.jwt_issuer.issue(username).map_err(DispatchFailure::from)?;
        Ok(DispatchResponse::success(json!({ "jwt": token, "username": username })))
    }

    /// Registers a new user. Called directly by `POST /api/auth/register`
    /// (§6 "Dedicated endpoints"), bypassing the authenticate/authorize
    /// stages since no identity exists yet.
    pub async fn register(&self, username: &str, password: &str) -> DispatchResult<DispatchResponse> {
        if username.trim().is_empty() || password.len() < 8 {
            return Err(DispatchError::Validation.with_message("username required, password must be at least 8 characters"));
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| DispatchError::Internal.with_message("failed to hash password"))?
            .to_string();
        self.users
            .register(username, &hash, Utc::now().timestamp())
            .await
            .map_err(|e| match e {
                StorageError::Other(msg) => DispatchError::Validation.with_message(msg),
                other => DispatchFailure::from(other),
            })?;
        Ok(DispatchResponse::success_empty())
    }

    async fn authenticate(&self, ctx: &mut RequestContext) -> DispatchResult<()> {
        let token = match &ctx.header_auth {
            Some(header) => extract_bearer(header).map_err(DispatchFailure::from)?.to_string(),
            None => ctx
                .request
                .jwt
                .clone()
                .ok_or_else(|| DispatchError::JwtRequired.with_message("authentication required"))?,
        };
        let user = self.jwt_validator.validate(&token).map_err(DispatchFailure::from)?;
        ctx.username = Some(user.username);
        Ok(())
    }

    async fn authorize(&self, ctx: &mut RequestContext, username: &str, object: &str, action: &str, verb_action: Action) -> DispatchResult<()> {
        let resource_id = match action {
            "create" => None,
            "list" => Some(String::new()),
            _ => Some(
                ctx.resource_id
                    .clone()
                    .ok_or_else(|| DispatchError::BadRequest.with_message("data.id is required"))?,
            ),
        };

        let project_id = self.resolve_project_id_for_authorize(ctx, object, action, resource_id.as_deref()).await?;
        ctx.resolved_project_id = project_id.clone();

        let mut context = HashMap::new();
        if let Some(pid) = &project_id {
            context.insert("project_id".to_string(), pid.clone());
        }

        let request = AccessRequest {
            username: username.to_string(),
            resource_type: object.to_string(),
            resource_id,
            action: verb_action,
            context,
        };
        let meta = RequestMeta {
            ip: Some(ctx.client_ip.clone()),
            user_agent: ctx.user_agent.clone(),
        };
        let decision = self.engine.check_access(&request, &meta).await;
        if !decision.allowed {
            return Err(DispatchError::Forbidden.with_message(format!("access denied: {}", decision.reason)));
        }
        Ok(())
    }

    /// Resolves `project_id` ahead of the authorization check so the
    /// project-role gate (§4.3 step 5) sees it even for hierarchical
    /// objects that have no `project_id` column of their own.
    async fn resolve_project_id_for_authorize(
        &self,
        ctx: &RequestContext,
        object: &str,
        action: &str,
        resource_id: Option<&str>,
    ) -> DispatchResult<Option<String>> {
        match object_spec(object).project_id_source {
            ProjectIdSource::OwnColumn => {
                if action == "create" {
                    Ok(ctx.request.project_id().map(str::to_string))
                } else if let Some(id) = resource_id.filter(|id| !id.is_empty()) {
                    let row = self.store.find_by_id_typed(object, id).await.map_err(DispatchFailure::from)?;
                    Ok(row.and_then(|r| r.project_id))
                } else {
                    Ok(ctx.request.project_id().map(str::to_string))
                }
            }
            ProjectIdSource::ViaParent {
                parent_field,
                parent_object_type: _,
            } => {
                if action == "create" {
                    let parent_id = ctx
                        .request
                        .data
                        .get(parent_field)
                        .and_then(Value::as_str)
                        .ok_or_else(|| DispatchError::Validation.with_message(format!("{parent_field} is required")))?;
                    self.store.resolve_project_id(parent_id).await.map_err(DispatchFailure::from)
                } else if let Some(id) = resource_id.filter(|id| !id.is_empty()) {
                    let row = self.store.find_by_id_typed(object, id).await.map_err(DispatchFailure::from)?;
                    match row {
                        Some(row) => {
                            let data: Map<String, Value> = serde_json::from_str(&row.data).unwrap_or_default();
                            match data.get(parent_field).and_then(Value::as_str) {
                                Some(parent_id) => self.store.resolve_project_id(parent_id).await.map_err(DispatchFailure::from),
                                None => Ok(None),
                            }
                        }
                        None => Ok(None),
                    }
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn execute(&self, ctx: &RequestContext, username: &str, object: &str, action: &str) -> DispatchResult<ExecutionResult> {
        match action {
            "create" => self.execute_create(ctx, username, object).await,
            "read" => self.execute_read(ctx, object).await,
            "list" => self.execute_list(ctx, object).await,
            "modify" => self.execute_modify(ctx, object).await,
            "remove" => self.execute_remove(ctx, object).await,
            "versionRelease" => self.execute_version_transition(ctx, VersionState::Released, "released").await,
            "versionArchive" => self.execute_version_transition(ctx, VersionState::Archived, "archived").await,
            "watcherAdd" => self.execute_watcher_add(ctx, username).await,
            "watcherRemove" => self.execute_watcher_remove(ctx).await,
            "filterShare" => self.execute_filter_share(ctx).await,
            "customFieldValueSet" => self.execute_custom_field_value_set(ctx).await,
            _ => Err(DispatchError::UnknownAction.with_message(format!("unknown action '{action}'"))),
        }
    }

    async fn execute_create(&self, ctx: &RequestContext, username: &str, object: &str) -> DispatchResult<ExecutionResult> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let project_id = ctx.resolved_project_id.clone();
        let security_level_id = ctx.request.data.get("securityLevelId").and_then(Value::as_i64);
        let body = strip_reserved(&ctx.request.data);
        let row = DbObjectRow {
            id: id.clone(),
            object_type: object.to_string(),
            project_id: project_id.clone(),
            security_level_id,
            created: now,
            modified: now,
            version: 1,
            deleted: 0,
            data: serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string()),
        };
        self.store.insert(&row).await.map_err(DispatchFailure::from)?;
        let record = ObjectRecord::from(row);
        let data_json = record.to_json();
        Ok(ExecutionResult {
            response: DispatchResponse::success(data_json.clone()),
            event: Some(PendingEvent {
                object: object.to_string(),
                verb: "created".to_string(),
                entity_id: id,
                data: data_json,
                project_id,
            }),
        })
    }

    async fn execute_read(&self, ctx: &RequestContext, object: &str) -> DispatchResult<ExecutionResult> {
        let id = ctx.resource_id.as_deref().ok_or_else(|| DispatchError::BadRequest.with_message("data.id is required"))?;
        let row = self
            .store
            .find_by_id_typed(object, id)
            .await
            .map_err(DispatchFailure::from)?
            .ok_or_else(|| DispatchError::NotFound.with_message(format!("{object} '{id}' not found")))?;
        Ok(ExecutionResult::no_event(DispatchResponse::success(ObjectRecord::from(row).to_json())))
    }

    async fn execute_list(&self, ctx: &RequestContext, object: &str) -> DispatchResult<ExecutionResult> {
        let pageable = Pageable::from_data(&ctx.request.data);
        let project_id = ctx.request.project_id();
        let page = self
            .store
            .list_paged(object, project_id, &[], &pageable)
            .await
            .map_err(DispatchFailure::from)?;
        let records = Page {
            content: page.content.into_iter().map(ObjectRecord::from).collect(),
            page: page.page,
            size: page.size,
            total_elements: page.total_elements,
            total_pages: page.total_pages,
        };
        Ok(ExecutionResult::no_event(DispatchResponse::success(
            serde_json::to_value(records).unwrap_or(Value::Null),
        )))
    }

    async fn execute_modify(&self, ctx: &RequestContext, object: &str) -> DispatchResult<ExecutionResult> {
        let id = ctx.resource_id.as_deref().ok_or_else(|| DispatchError::BadRequest.with_message("data.id is required"))?;
        let existing = self
            .store
            .find_by_id_typed(object, id)
            .await
            .map_err(DispatchFailure::from)?
            .ok_or_else(|| DispatchError::NotFound.with_message(format!("{object} '{id}' not found")))?;

        let mut merged: Map<String, Value> = serde_json::from_str(&existing.data).unwrap_or_default();
        for (k, v) in strip_reserved(&ctx.request.data) {
            merged.insert(k, v);
        }
        let patch = ObjectPatch {
            data: Some(serde_json::to_string(&merged).unwrap_or_else(|_| "{}".to_string())),
            project_id: ctx.request.project_id().map(|p| Some(p.to_string())),
            security_level_id: ctx.request.data.get("securityLevelId").map(Value::as_i64),
        };

        let now = Utc::now().timestamp();
        self.store
            .update_versioned(id, existing.version, &patch, now)
            .await
            .map_err(DispatchFailure::from)?;

        // §3 invariant: "entries for a resource are invalidated when its
        // security level changes" — do this before the cache can serve a
        // decision resolved under the old level.
        if ctx.request.data.contains_key("securityLevelId") {
            self.engine.invalidate_resource(object, id);
        }

        let updated = self
            .store
            .find_by_id_typed(object, id)
            .await
            .map_err(DispatchFailure::from)?
            .ok_or_else(|| DispatchError::Internal.with_message("row disappeared immediately after update"))?;
        let project_id = updated.project_id.clone();
        let record = ObjectRecord::from(updated);
        let data_json = record.to_json();
        Ok(ExecutionResult {
            response: DispatchResponse::success(data_json.clone()),
            event: Some(PendingEvent {
                object: object.to_string(),
                verb: "updated".to_string(),
                entity_id: id.to_string(),
                data: data_json,
                project_id,
            }),
        })
    }

    async fn execute_remove(&self, ctx: &RequestContext, object: &str) -> DispatchResult<ExecutionResult> {
        let id = ctx.resource_id.as_deref().ok_or_else(|| DispatchError::BadRequest.with_message("data.id is required"))?;
        let existing = self
            .store
            .find_by_id_typed(object, id)
            .await
            .map_err(DispatchFailure::from)?
            .ok_or_else(|| DispatchError::NotFound.with_message(format!("{object} '{id}' not found")))?;

        let project_id = self
            .resolve_project_id_for_authorize(ctx, object, "remove", Some(id))
            .await
            .unwrap_or(None)
            .or_else(|| existing.project_id.clone());

        let now = Utc::now().timestamp();
        let deleted = match object_spec(object).delete_mode {
            DeleteMode::Soft => self.store.soft_delete(id, now).await.map_err(DispatchFailure::from)?,
            DeleteMode::Hard => self.store.hard_delete(id).await.map_err(DispatchFailure::from)?,
        };
        if !deleted {
            return Err(DispatchError::NotFound.with_message(format!("{object} '{id}' not found")));
        }

        Ok(ExecutionResult {
            response: DispatchResponse::success_empty(),
            event: Some(PendingEvent {
                object: object.to_string(),
                verb: "deleted".to_string(),
                entity_id: id.to_string(),
                data: json!({ "id": id }),
                project_id,
            }),
        })
    }

    /// §4.4 "State machine for special verbs": Version transitions
    /// `created -> released -> archived`, invalid moves rejected outright.
    async fn execute_version_transition(&self, ctx: &RequestContext, target: VersionState, verb: &str) -> DispatchResult<ExecutionResult> {
        let id = ctx.resource_id.as_deref().ok_or_else(|| DispatchError::BadRequest.with_message("data.id is required"))?;
        let existing = self
            .store
            .find_by_id_typed("version", id)
            .await
            .map_err(DispatchFailure::from)?
            .ok_or_else(|| DispatchError::NotFound.with_message(format!("version '{id}' not found")))?;

        let mut data: Map<String, Value> = serde_json::from_str(&existing.data).unwrap_or_default();
        let current = data
            .get("state")
            .and_then(Value::as_str)
            .and_then(VersionState::parse)
            .unwrap_or(VersionState::Created);
        if !current.can_transition_to(target) {
            return Err(DispatchError::InvalidState.with_message(format!(
                "cannot transition version '{id}' from {} to {}",
                current.as_str(),
                target.as_str()
            )));
        }
        data.insert("state".to_string(), Value::String(target.as_str().to_string()));

        let patch = ObjectPatch {
            data: Some(serde_json::to_string(&data).unwrap_or_else(|_| "{}".to_string())),
            project_id: None,
            security_level_id: None,
        };
        let now = Utc::now().timestamp();
        self.store
            .update_versioned(id, existing.version, &patch, now)
            .await
            .map_err(DispatchFailure::from)?;

        Ok(ExecutionResult {
            response: DispatchResponse::success_empty(),
            event: Some(PendingEvent {
                object: "version".to_string(),
                verb: verb.to_string(),
                entity_id: id.to_string(),
                data: json!({ "id": id, "state": target.as_str() }),
                project_id: existing.project_id,
            }),
        })
    }

    async fn execute_watcher_add(&self, ctx: &RequestContext, username: &str) -> DispatchResult<ExecutionResult> {
        let ticket_id = ctx
            .request
            .data
            .get("ticketId")
            .and_then(Value::as_str)
            .ok_or_else(|| DispatchError::Validation.with_message("ticketId is required"))?;
        let project_id = self.store.resolve_project_id(ticket_id).await.map_err(DispatchFailure::from)?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let body = json!({ "ticketId": ticket_id, "username": username });
        let row = DbObjectRow {
            id: id.clone(),
            object_type: "watcher".to_string(),
            project_id: project_id.clone(),
            security_level_id: None,
            created: now,
            modified: now,
            version: 1,
            deleted: 0,
            data: body.to_string(),
        };
        self.store.insert(&row).await.map_err(DispatchFailure::from)?;

        Ok(ExecutionResult {
            response: DispatchResponse::success(ObjectRecord::from(row).to_json()),
            event: Some(PendingEvent {
                object: "watcher".to_string(),
                verb: "added".to_string(),
                entity_id: id,
                data: body,
                project_id,
            }),
        })
    }

    async fn execute_watcher_remove(&self, ctx: &RequestContext) -> DispatchResult<ExecutionResult> {
        let id = ctx.resource_id.as_deref().ok_or_else(|| DispatchError::BadRequest.with_message("data.id is required"))?;
        let existing = self
            .store
            .find_by_id_typed("watcher", id)
            .await
            .map_err(DispatchFailure::from)?
            .ok_or_else(|| DispatchError::NotFound.with_message(format!("watcher '{id}' not found")))?;
        let deleted = self.store.hard_delete(id).await.map_err(DispatchFailure::from)?;
        if !deleted {
            return Err(DispatchError::NotFound.with_message(format!("watcher '{id}' not found")));
        }
        Ok(ExecutionResult {
            response: DispatchResponse::success_empty(),
            event: Some(PendingEvent {
                object: "watcher".to_string(),
                verb: "removed".to_string(),
                entity_id: id.to_string(),
                data: json!({ "id": id }),
                project_id: existing.project_id,
            }),
        })
    }

    async fn execute_filter_share(&self, ctx: &RequestContext) -> DispatchResult<ExecutionResult> {
        let id = ctx.resource_id.as_deref().ok_or_else(|| DispatchError::BadRequest.with_message("data.id is required"))?;
        let existing = self
            .store
            .find_by_id_typed("filter", id)
            .await
            .map_err(DispatchFailure::from)?
            .ok_or_else(|| DispatchError::NotFound.with_message(format!("filter '{id}' not found")))?;

        let mut data: Map<String, Value> = serde_json::from_str(&existing.data).unwrap_or_default();
        let shared_with = ctx
            .request
            .data
            .get("sharedWith")
            .cloned()
            .ok_or_else(|| DispatchError::Validation.with_message("sharedWith is required"))?;
        data.insert("sharedWith".to_string(), shared_with);

        let patch = ObjectPatch {
            data: Some(serde_json::to_string(&data).unwrap_or_else(|_| "{}".to_string())),
            project_id: None,
            security_level_id: None,
        };
        let now = Utc::now().timestamp();
        self.store
            .update_versioned(id, existing.version, &patch, now)
            .await
            .map_err(DispatchFailure::from)?;

        Ok(ExecutionResult {
            response: DispatchResponse::success_empty(),
            event: Some(PendingEvent {
                object: "filter".to_string(),
                verb: "shared".to_string(),
                entity_id: id.to_string(),
                data: Value::Object(data),
                project_id: existing.project_id,
            }),
        })
    }

    async fn execute_custom_field_value_set(&self, ctx: &RequestContext) -> DispatchResult<ExecutionResult> {
        let entity_id = ctx
            .request
            .data
            .get("entityId")
            .and_then(Value::as_str)
            .ok_or_else(|| DispatchError::Validation.with_message("entityId is required"))?;
        let field_id = ctx
            .request
            .data
            .get("fieldId")
            .and_then(Value::as_str)
            .ok_or_else(|| DispatchError::Validation.with_message("fieldId is required"))?;
        let value = ctx
            .request
            .data
            .get("value")
            .cloned()
            .ok_or_else(|| DispatchError::Validation.with_message("value is required"))?;

        let existing = self
            .store
            .find_by_id(entity_id)
            .await
            .map_err(DispatchFailure::from)?
            .ok_or_else(|| DispatchError::NotFound.with_message(format!("entity '{entity_id}' not found")))?;

        let mut data: Map<String, Value> = serde_json::from_str(&existing.data).unwrap_or_default();
        let custom_fields = data.entry("customFields").or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = custom_fields {
            map.insert(field_id.to_string(), value.clone());
        }

        let patch = ObjectPatch {
            data: Some(serde_json::to_string(&data).unwrap_or_else(|_| "{}".to_string())),
            project_id: None,
            security_level_id: None,
        };
        let now = Utc::now().timestamp();
        self.store
            .update_versioned(entity_id, existing.version, &patch, now)
            .await
            .map_err(DispatchFailure::from)?;

        Ok(ExecutionResult {
            response: DispatchResponse::success_empty(),
            event: Some(PendingEvent {
                object: existing.object_type.clone(),
                verb: "valueSet".to_string(),
                entity_id: entity_id.to_string(),
                data: json!({ "fieldId": field_id, "value": value }),
                project_id: existing.project_id,
            }),
        })
    }

    /// §4.4 stage 6: best-effort, logged on failure, never propagated to
    /// the caller's response.
    async fn publish_event(&self, pending: &PendingEvent, username: &str) {
        // §4.5 step 2: a project-scoped event only reaches subscribers who
        // can still READ that project; project-less events skip the check.
        let context = match &pending.project_id {
            Some(pid) => {
                let mut ctx = EventContext::with_project(pid.clone());
                ctx.permissions = vec!["READ".to_string()];
                ctx
            }
            None => EventContext::default(),
        };
        let event = Event::new(
            pending.object.clone(),
            pending.verb.clone(),
            pending.entity_id.clone(),
            username.to_string(),
            Utc::now().timestamp(),
            pending.data.clone(),
            context,
        );
        self.hub.publish(event).await;
    }
}
