//! Assembles the HTTP surface (§6): the unified `/do` dispatch endpoint, the
//! `/api/auth/*` convenience wrappers, the WebSocket event hub, and the
//! operational endpoints (`/health*`, `/metrics`).
//!
//! [`AppState`] is generic over the SQL backend so the same router works
//! against either the embedded SQLite deployment or the Postgres one;
//! `src/main.rs` picks the concrete `DB` at compile time via Cargo features.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRef, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sqlx::{Database, Pool};
use tower_http::trace::TraceLayer;

use keystone_core::health::{health_handler, liveness_handler, readiness_handler, HealthState};
use keystone_dispatch::envelope::{DispatchRequest, DispatchResponse, RequestContext};
use keystone_dispatch::object::DbObjectRow;
use keystone_dispatch::pipeline::Dispatcher;
use keystone_events::ws::{ws_handler, WsState};
use keystone_metrics::{metrics_handler, MetricsConfig, PrometheusLayer};
use keystone_observability::OtelTraceLayer;
use keystone_scheduler::ScheduledJobRegistry;
use keystone_security::{DecisionCache, JwtIssuer};

/// Trait bounds `Dispatcher<DB>` requires, repeated on every handler and on
/// [`build_router`] since axum handlers can't inherit bounds from a struct.
macro_rules! db_bounds {
    () => {
        DB: Database,
        DbObjectRow: for<'r> sqlx::FromRow<'r, DB::Row>,
        for<'q> String: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
        for<'q> i64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
        for<'r> (String,): sqlx::FromRow<'r, DB::Row>,
    };
}

/// Everything a request handler needs, cheaply `Clone`-able (every field is
/// an `Arc` or itself cheap to clone).
pub struct AppState<DB: Database> {
    pub dispatcher: Arc<Dispatcher<DB>>,
    pub jwt_issuer: Arc<JwtIssuer>,
    pub ws: WsState,
    pub health: Arc<HealthState>,
    pub pool: Pool<DB>,
    pub cache: Arc<DecisionCache>,
    pub jobs: ScheduledJobRegistry,
}

impl<DB: Database> Clone for AppState<DB> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            jwt_issuer: self.jwt_issuer.clone(),
            ws: self.ws.clone(),
            health: self.health.clone(),
            pool: self.pool.clone(),
            cache: self.cache.clone(),
            jobs: self.jobs.clone(),
        }
    }
}

impl<DB: Database> FromRef<AppState<DB>> for WsState {
    fn from_ref(state: &AppState<DB>) -> Self {
        state.ws.clone()
    }
}

impl<DB: Database> FromRef<AppState<DB>> for Arc<HealthState> {
    fn from_ref(state: &AppState<DB>) -> Self {
        state.health.clone()
    }
}

/// Wires every route named in §6 onto one router, with Prometheus and
/// OpenTelemetry tracing layers applied at the top so every request —
/// including the health and metrics endpoints themselves — is measured.
pub fn build_router<DB>(state: AppState<DB>, metrics_config: MetricsConfig, otel_layer: OtelTraceLayer) -> Router
where
    db_bounds!(),
{
    let api = Router::new()
        .route("/do", post(do_handler::<DB>))
        .route("/api/auth/register", post(register_handler::<DB>))
        .route("/api/auth/login", post(login_handler::<DB>))
        .route("/api/auth/logout", post(logout_handler))
        .route("/ws", get(ws_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone());

    let health = Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state.health.clone());

    let stats = Router::new()
        .route("/stats/db", get(stats_db_handler::<DB>))
        .route("/stats/cache", get(stats_cache_handler::<DB>))
        .route("/stats/events", get(stats_events_handler::<DB>))
        .route("/stats/scheduler", get(stats_scheduler_handler::<DB>))
        .with_state(state.clone());

    Router::new()
        .merge(api)
        .merge(health)
        .merge(stats)
        .layer(PrometheusLayer::new(metrics_config))
        .layer(otel_layer)
        .layer(TraceLayer::new_for_http())
}

/// `GET /stats/db` — connection pool occupancy (§6 "debug views on DB pool stats").
async fn stats_db_handler<DB>(State(state): State<AppState<DB>>) -> Json<Value>
where
    db_bounds!(),
{
    Json(json!({
        "size": state.pool.size(),
        "idle": state.pool.num_idle(),
    }))
}

/// `GET /stats/cache` — permission decision cache hit rate and occupancy.
async fn stats_cache_handler<DB>(State(state): State<AppState<DB>>) -> Json<Value>
where
    db_bounds!(),
{
    let stats = state.cache.stats();
    Json(json!({
        "entries": state.cache.len(),
        "hits": stats.hits,
        "misses": stats.misses,
        "evictions": stats.evictions,
        "hitRate": stats.hit_rate,
    }))
}

/// `GET /stats/events` — connected WebSocket clients and drop counters.
async fn stats_events_handler<DB>(State(state): State<AppState<DB>>) -> Json<Value>
where
    db_bounds!(),
{
    let stats = state.ws.hub.stats();
    Json(json!({
        "connectedClients": stats.connected_clients,
        "totalDropped": stats.total_dropped,
    }))
}

/// `GET /stats/scheduler` — the registered background jobs and their cadence.
async fn stats_scheduler_handler<DB>(State(state): State<AppState<DB>>) -> Json<Value>
where
    db_bounds!(),
{
    let jobs: Vec<Value> = state
        .jobs
        .list_jobs()
        .into_iter()
        .map(|job| json!({"name": job.name, "schedule": job.schedule}))
        .collect();
    Json(json!({ "jobs": jobs }))
}

fn extract_meta(headers: &HeaderMap, addr: SocketAddr) -> (String, Option<String>, Option<String>) {
    let client_ip = addr.ip().to_string();
    let user_agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()).map(str::to_string);
    let header_auth = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).map(str::to_string);
    (client_ip, user_agent, header_auth)
}

/// `POST /do` — the unified action-dispatch endpoint (§6). Always answers
/// `200 OK`; the decision is carried in the body's `errorCode`.
async fn do_handler<DB>(
    State(state): State<AppState<DB>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<DispatchRequest>,
) -> Json<DispatchResponse>
where
    db_bounds!(),
{
    let (client_ip, user_agent, header_auth) = extract_meta(&headers, addr);
    let ctx = RequestContext::new(request, client_ip, user_agent, header_auth);
    Json(state.dispatcher.dispatch(ctx).await)
}

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

/// `POST /api/auth/register` — a thin wrapper around [`Dispatcher::register`]
/// (§6 "Dedicated endpoints"), bypassing authenticate/authorize since no
/// identity exists yet.
async fn register_handler<DB>(State(state): State<AppState<DB>>, Json(body): Json<Credentials>) -> (StatusCode, Json<DispatchResponse>)
where
    db_bounds!(),
{
    match state.dispatcher.register(&body.username, &body.password).await {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(failure) => {
            let status = failure.http_status();
            (status, Json(failure.into_response()))
        }
    }
}

/// `POST /api/auth/login` — routes through the same `authenticate` action
/// the `/do` pipeline runs, so brute-force throttling and password
/// verification live in exactly one place.
async fn login_handler<DB>(
    State(state): State<AppState<DB>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<Credentials>,
) -> Json<DispatchResponse>
where
    db_bounds!(),
{
    let mut data = Map::new();
    data.insert("username".to_string(), Value::String(body.username));
    data.insert("password".to_string(), Value::String(body.password));
    let request = DispatchRequest {
        action: "authenticate".to_string(),
        object: "session".to_string(),
        data,
        jwt: None,
    };
    let (client_ip, user_agent, _) = extract_meta(&headers, addr);
    let ctx = RequestContext::new(request, client_ip, user_agent, None);
    Json(state.dispatcher.dispatch(ctx).await)
}

/// `POST /api/auth/logout` — JWTs are stateless (§4.3), so there is nothing
/// to revoke server-side; this always succeeds.
async fn logout_handler() -> Json<DispatchResponse> {
    Json(DispatchResponse::success_empty())
}
