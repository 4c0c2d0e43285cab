//! End-to-end dispatch scenarios driven against a real `Dispatcher<Sqlite>`
//! over an in-memory database — no mocks below the SQL layer. Mirrors the
//! concrete scenarios used to validate the authorization/dispatch/event
//! fabric (authorize-then-mutate-then-event, deny-by-missing-role,
//! optimistic concurrency, hierarchical event context, the version state
//! machine, soft-delete exclusion, and idempotent remove).

use std::sync::Arc;
use std::time::Duration;

use keystone_dispatch::envelope::{DispatchRequest, RequestContext};
use keystone_dispatch::pipeline::Dispatcher;
use keystone_dispatch::repository::{ObjectPatch, ObjectStore};
use keystone_dispatch::store::{SqlAuditSink, SqlSecurityStore, SqlUserStore};
use keystone_events::event::ServerFrame;
use keystone_events::hub::EventHub;
use keystone_rate_limit::RateLimitRegistry;
use keystone_security::audit::AuditQueue;
use keystone_security::jwt::JwtIssuer;
use keystone_security::jwt::JwtValidator;
use keystone_security::store::SecurityStore;
use keystone_security::{DecisionCache, SecurityConfig, SecurityEngine};
use keystone_storage::{Dialect, StorageError};
use keystone_storage_sqlx::SqlxRepository;
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

type Db = Sqlite;

struct Harness {
    dispatcher: Dispatcher<Db>,
    hub: EventHub,
    jwt_issuer: Arc<JwtIssuer>,
    pool: Pool<Db>,
}

async fn test_pool() -> Pool<Db> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    sqlx::migrate!("./migrations").run(&pool).await.expect("run migrations");
    pool
}

async fn harness() -> Harness {
    let pool = test_pool().await;
    let dialect = Dialect::Sqlite;
    let security_config = SecurityConfig::new("test-secret", "keystone-test");

    let store: Arc<dyn SecurityStore> = Arc::new(SqlSecurityStore::<Db>::new(pool.clone(), dialect));
    let audit_sink: Arc<dyn keystone_security::audit::AuditSink> = Arc::new(SqlAuditSink::<Db>::new(pool.clone(), dialect));
    let audit_queue = AuditQueue::spawn(audit_sink, 64);
    let cache = DecisionCache::new(Duration::from_secs(300), 1000);
    let engine = Arc::new(SecurityEngine::new(store, cache, audit_queue));

    let jwt_issuer = Arc::new(JwtIssuer::new(security_config.clone()));
    let jwt_validator = Arc::new(JwtValidator::new(security_config.clone()));

    let users = Arc::new(SqlUserStore::<Db>::new(pool.clone(), dialect));
    let repo = SqlxRepository::new(pool.clone(), dialect);
    let object_store = Arc::new(ObjectStore::new(repo, dialect));

    let hub = EventHub::new(engine.clone());

    let dispatcher = Dispatcher::new(
        object_store,
        users,
        engine,
        hub.clone(),
        jwt_validator,
        jwt_issuer.clone(),
        RateLimitRegistry::default(),
    );

    Harness {
        dispatcher,
        hub,
        jwt_issuer,
        pool,
    }
}

/// Grants `username` a global role (`project_id = ''`, so it applies under
/// every project) at `level`. Good enough for every scenario here since none
/// of them exercise the project-role-minimum gate.
async fn seed_global_role(pool: &Pool<Db>, username: &str, role_name: &str, level: i64) {
    sqlx::query("INSERT OR IGNORE INTO roles (name, project_id, level) VALUES (?, '', ?)")
        .bind(role_name)
        .bind(level)
        .execute(pool)
        .await
        .expect("seed role");
    sqlx::query("INSERT OR IGNORE INTO role_assignments (username, role_name, project_id) VALUES (?, ?, '')")
        .bind(username)
        .bind(role_name)
        .execute(pool)
        .await
        .expect("seed role assignment");
}

async fn seed_object(pool: &Pool<Db>, id: &str, object_type: &str, project_id: &str, version: i64, data: &Value) {
    sqlx::query(
        "INSERT INTO objects (id, object_type, project_id, security_level_id, created, modified, version, deleted, data) \
         VALUES (?, ?, ?, NULL, 1700000000, 1700000000, ?, 0, ?)",
    )
    .bind(id)
    .bind(object_type)
    .bind(project_id)
    .bind(version)
    .bind(data.to_string())
    .execute(pool)
    .await
    .expect("seed object");
}

fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut m = Map::new();
    for (k, v) in pairs {
        m.insert(k.to_string(), v.clone());
    }
    m
}

fn ctx(action: &str, object: &str, data: Map<String, Value>, jwt: &str) -> RequestContext {
    RequestContext::new(
        DispatchRequest {
            action: action.to_string(),
            object: object.to_string(),
            data,
            jwt: Some(jwt.to_string()),
        },
        "127.0.0.1".to_string(),
        Some("integration-test".to_string()),
        None,
    )
}

/// S1: an authorized user creates a ticket; the mutation succeeds and a
/// subscriber that can still read the owning project receives exactly one
/// `ticket.created` event.
#[tokio::test]
async fn authorize_mutate_and_publish_event() {
    let h = harness().await;
    seed_global_role(&h.pool, "alice", "Lead", 5).await;
    let token = h.jwt_issuer.issue("alice").unwrap();

    let client = h.hub.connect("alice".to_string());
    h.hub.subscribe(client.id, &["ticket.created".to_string()]).await;

    let response = h
        .dispatcher
        .dispatch(ctx(
            "create",
            "ticket",
            obj(&[("projectId", json!("P1")), ("title", json!("Something broke"))]),
            &token,
        ))
        .await;

    assert_eq!(response.error_code, -1);
    let data = response.data.expect("create response carries the new record");
    assert_eq!(data["project_id"], "P1");

    let frames = tokio::time::timeout(Duration::from_secs(1), client.next_frames())
        .await
        .expect("event delivered within 1s");
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ServerFrame::Event { event } => {
            assert_eq!(event.object, "ticket");
            assert_eq!(event.action, "created");
            assert_eq!(event.context.project_id.as_deref(), Some("P1"));
        }
        other => panic!("expected an Event frame, got {other:?}"),
    }
}

/// S2: a user with no role or grant anywhere is denied, with no DB change.
#[tokio::test]
async fn deny_by_missing_role() {
    let h = harness().await;
    let token = h.jwt_issuer.issue("bob").unwrap();

    let response = h
        .dispatcher
        .dispatch(ctx(
            "create",
            "ticket",
            obj(&[("projectId", json!("P1")), ("title", json!("Should not land"))]),
            &token,
        ))
        .await;

    assert_eq!(response.error_code, 2100);
    assert!(response.error_message.unwrap().contains("access denied"));

    let page = h
        .dispatcher
        .dispatch(ctx("list", "ticket", obj(&[("projectId", json!("P1"))]), &h.jwt_issuer.issue("alice").unwrap()))
        .await;
    // no role seeded for alice either in this test, so this call also
    // proves nothing was ever written under project P1.
    assert_eq!(page.error_code, 2100);
}

/// S3 (optimistic concurrency), split into its two independently-true
/// halves: the storage-level conflict contract, and that a successful
/// `modify` through the full pipeline publishes exactly one event. Driving
/// true thread-level concurrency through a single-connection in-memory
/// SQLite pool can't be made deterministic, so the conflict half exercises
/// the same `ObjectStore::update_versioned` call the dispatcher itself
/// makes, directly.
#[tokio::test]
async fn stale_version_update_is_rejected_after_a_concurrent_write_wins() {
    let h = harness().await;
    seed_object(&h.pool, "T2", "ticket", "P1", 3, &json!({})).await;

    let repo = SqlxRepository::new(h.pool.clone(), Dialect::Sqlite);
    let store = ObjectStore::new(repo, Dialect::Sqlite);
    let patch = ObjectPatch {
        data: Some("{}".to_string()),
        project_id: None,
        security_level_id: None,
    };

    // First writer, still believing version = 3, wins.
    store.update_versioned("T2", 3, &patch, 1_700_000_001).await.expect("first writer succeeds");

    // Second writer read the row before the first writer's commit and is
    // still carrying version = 3 — its update now affects zero rows.
    let err = store.update_versioned("T2", 3, &patch, 1_700_000_002).await.unwrap_err();
    assert!(matches!(err, StorageError::VersionConflict { expected_version: 3, .. }));
}

#[tokio::test]
async fn successful_modify_publishes_exactly_one_updated_event() {
    let h = harness().await;
    seed_global_role(&h.pool, "alice", "Lead", 5).await;
    seed_object(&h.pool, "T3", "ticket", "P1", 1, &json!({"title": "original"})).await;
    let token = h.jwt_issuer.issue("alice").unwrap();

    let client = h.hub.connect("alice".to_string());
    h.hub.subscribe(client.id, &["ticket.updated".to_string()]).await;

    let response = h
        .dispatcher
        .dispatch(ctx("modify", "ticket", obj(&[("id", json!("T3")), ("title", json!("fixed"))]), &token))
        .await;
    assert_eq!(response.error_code, -1);
    assert_eq!(response.data.unwrap()["version"], 2);

    let frames = tokio::time::timeout(Duration::from_secs(1), client.next_frames()).await.expect("event delivered");
    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], ServerFrame::Event { event } if event.action == "updated"));
}

/// S4: a comment has no `project_id` of its own; its `deleted` event must
/// still carry the project resolved through its parent ticket.
#[tokio::test]
async fn hierarchical_delete_resolves_project_id_through_parent() {
    let h = harness().await;
    seed_global_role(&h.pool, "alice", "Lead", 5).await;
    let token = h.jwt_issuer.issue("alice").unwrap();

    let created = h
        .dispatcher
        .dispatch(ctx("create", "ticket", obj(&[("projectId", json!("P1")), ("title", json!("Parent"))]), &token))
        .await;
    let ticket_id = created.data.unwrap()["id"].as_str().unwrap().to_string();

    let created_comment = h
        .dispatcher
        .dispatch(ctx(
            "create",
            "comment",
            obj(&[("ticketId", json!(ticket_id)), ("body", json!("hi"))]),
            &token,
        ))
        .await;
    assert_eq!(created_comment.error_code, -1);
    let comment_id = created_comment.data.unwrap()["id"].as_str().unwrap().to_string();

    let client = h.hub.connect("alice".to_string());
    h.hub.subscribe(client.id, &["comment.deleted".to_string()]).await;

    let removed = h.dispatcher.dispatch(ctx("remove", "comment", obj(&[("id", json!(comment_id))]), &token)).await;
    assert_eq!(removed.error_code, -1);

    let frames = tokio::time::timeout(Duration::from_secs(1), client.next_frames()).await.expect("event delivered");
    match &frames[0] {
        ServerFrame::Event { event } => {
            assert_eq!(event.object, "comment");
            assert_eq!(event.action, "deleted");
            assert_eq!(event.context.project_id.as_deref(), Some("P1"));
        }
        other => panic!("expected an Event frame, got {other:?}"),
    }
}

/// S5: a project-scoped event only reaches subscribers who can still read
/// that project. Both clients stay connected either way.
#[tokio::test]
async fn subscription_and_permission_filter() {
    let h = harness().await;
    seed_global_role(&h.pool, "alice", "Lead", 5).await;
    let creator_token = h.jwt_issuer.issue("alice").unwrap();

    let client_a = h.hub.connect("alice".to_string());
    h.hub.subscribe(client_a.id, &["ticket.created".to_string()]).await;
    let client_b = h.hub.connect("bob".to_string());
    h.hub.subscribe(client_b.id, &["ticket.created".to_string()]).await;

    let response = h
        .dispatcher
        .dispatch(ctx("create", "ticket", obj(&[("projectId", json!("P1")), ("title", json!("Visible to A"))]), &creator_token))
        .await;
    assert_eq!(response.error_code, -1);

    let frames_a = tokio::time::timeout(Duration::from_secs(1), client_a.next_frames())
        .await
        .expect("A receives the event within 1s");
    assert_eq!(frames_a.len(), 1);

    let timed_out = tokio::time::timeout(Duration::from_millis(200), client_b.next_frames()).await;
    assert!(timed_out.is_err(), "B has no permission on P1 and must not receive the event");

    assert_eq!(h.hub.stats().connected_clients, 2);
}

/// S6: the version lifecycle state machine — `created -> released ->
/// archived`, with a repeated `released` transition rejected outright.
#[tokio::test]
async fn version_release_and_archive_state_machine() {
    let h = harness().await;
    seed_global_role(&h.pool, "alice", "Lead", 5).await;
    let token = h.jwt_issuer.issue("alice").unwrap();

    let created = h
        .dispatcher
        .dispatch(ctx("create", "version", obj(&[("projectId", json!("P1")), ("name", json!("1.0"))]), &token))
        .await;
    let version_id = created.data.unwrap()["id"].as_str().unwrap().to_string();

    let released = h
        .dispatcher
        .dispatch(ctx("versionRelease", "version", obj(&[("id", json!(version_id.clone()))]), &token))
        .await;
    assert_eq!(released.error_code, -1);

    let released_again = h
        .dispatcher
        .dispatch(ctx("versionRelease", "version", obj(&[("id", json!(version_id.clone()))]), &token))
        .await;
    assert_eq!(released_again.error_code, 3002, "re-releasing an already-released version is an invalid transition");

    let archived = h
        .dispatcher
        .dispatch(ctx("versionArchive", "version", obj(&[("id", json!(version_id))]), &token))
        .await;
    assert_eq!(archived.error_code, -1);
}

/// P9: a soft-deleted entity disappears from both `read` and `list`.
#[tokio::test]
async fn soft_deleted_entity_is_excluded_from_read_and_list() {
    let h = harness().await;
    seed_global_role(&h.pool, "alice", "Lead", 5).await;
    let token = h.jwt_issuer.issue("alice").unwrap();

    let created = h
        .dispatcher
        .dispatch(ctx("create", "ticket", obj(&[("projectId", json!("P1")), ("title", json!("Transient"))]), &token))
        .await;
    let id = created.data.unwrap()["id"].as_str().unwrap().to_string();

    let removed = h.dispatcher.dispatch(ctx("remove", "ticket", obj(&[("id", json!(id.clone()))]), &token)).await;
    assert_eq!(removed.error_code, -1);

    let read_after = h.dispatcher.dispatch(ctx("read", "ticket", obj(&[("id", json!(id.clone()))]), &token)).await;
    assert_eq!(read_after.error_code, 3000);

    let listed = h
        .dispatcher
        .dispatch(ctx("list", "ticket", obj(&[("projectId", json!("P1"))]), &token))
        .await;
    let content = listed.data.unwrap()["content"].as_array().cloned().unwrap_or_default();
    assert!(content.iter().all(|row| row["id"] != id));
}

/// R3: removing an already-removed entity is idempotent — the second call
/// reports not-found rather than re-deleting or erroring differently.
#[tokio::test]
async fn repeated_remove_is_idempotent() {
    let h = harness().await;
    seed_global_role(&h.pool, "alice", "Lead", 5).await;
    let token = h.jwt_issuer.issue("alice").unwrap();

    let created = h
        .dispatcher
        .dispatch(ctx("create", "ticket", obj(&[("projectId", json!("P1")), ("title", json!("Once"))]), &token))
        .await;
    let id = created.data.unwrap()["id"].as_str().unwrap().to_string();

    let first = h.dispatcher.dispatch(ctx("remove", "ticket", obj(&[("id", json!(id.clone()))]), &token)).await;
    assert_eq!(first.error_code, -1);

    let second = h.dispatcher.dispatch(ctx("remove", "ticket", obj(&[("id", json!(id))]), &token)).await;
    assert_eq!(second.error_code, 3000);
}
