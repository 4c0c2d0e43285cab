//! Process entrypoint: loads configuration, assembles every crate into one
//! [`app::AppState`], binds a listener, and serves until a shutdown signal
//! arrives. The concrete SQL driver (`Db`) is picked at compile time by the
//! `sqlite`/`postgres` Cargo features (§6 "database.type").

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use keystone_core::health::HealthBuilder;
use keystone_core::KeystoneConfig;
use keystone_dispatch::pipeline::Dispatcher;
use keystone_dispatch::repository::ObjectStore;
use keystone_dispatch::store::{prune_audit_log, SqlAuditSink, SqlSecurityStore, SqlUserStore};
use keystone_events::hub::EventHub;
use keystone_events::ws::WsState;
use keystone_metrics::MetricsConfig;
use keystone_observability::ObservabilityConfig;
use keystone_rate_limit::RateLimitRegistry;
use keystone_scheduler::{start_scheduler, ScheduleConfig, ScheduledTask, ScheduledTaskDef};
use keystone_security::audit::{AuditQueue, AuditSink};
use keystone_security::jwt::{JwtIssuer, JwtValidator};
use keystone_security::store::SecurityStore;
use keystone_security::{DecisionCache, SecurityConfig, SecurityEngine};
use keystone_storage::Dialect;
use keystone_storage_sqlx::backend::DbHealthIndicator;
use keystone_storage_sqlx::SqlxBackend;
use keystone::app;
use sqlx::Pool;

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
type Db = sqlx::Postgres;
#[cfg(not(all(feature = "postgres", not(feature = "sqlite"))))]
type Db = sqlx::Sqlite;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let profile = std::env::var("KEYSTONE_PROFILE").unwrap_or_else(|_| "dev".to_string());
    let config = KeystoneConfig::load(&profile).unwrap_or_else(|err| {
        eprintln!("warning: {err}, falling back to an empty configuration");
        KeystoneConfig::empty()
    });

    let observability_config = ObservabilityConfig::from_keystone_config(&config, "keystone");
    let (_otel_guard, otel_layer) = keystone_observability::init_observability(&observability_config);

    let (pool, dialect) = connect_database(&config).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let security_config = build_security_config(&config);

    let store: Arc<dyn SecurityStore> = Arc::new(SqlSecurityStore::<Db>::new(pool.clone(), dialect));
    let audit_sink: Arc<dyn AuditSink> = Arc::new(SqlAuditSink::<Db>::new(pool.clone(), dialect));
    let audit_queue = AuditQueue::spawn(audit_sink, security_config.audit_queue_capacity);
    let cache = DecisionCache::new(
        Duration::from_secs(security_config.cache_ttl_s),
        security_config.cache_capacity,
    );
    let engine = Arc::new(SecurityEngine::new(store, cache.clone(), audit_queue));

    let jwt_issuer = Arc::new(JwtIssuer::new(security_config.clone()));
    let jwt_validator = Arc::new(JwtValidator::new(security_config.clone()));

    let users = Arc::new(SqlUserStore::<Db>::new(pool.clone(), dialect));
    let repo = keystone_storage_sqlx::SqlxRepository::new(pool.clone(), dialect);
    let object_store = Arc::new(ObjectStore::new(repo, dialect));

    let hub = EventHub::new(engine.clone());
    let rate_limit_registry = RateLimitRegistry::default();

    let dispatcher = Arc::new(Dispatcher::new(
        object_store,
        users,
        engine,
        hub.clone(),
        jwt_validator.clone(),
        jwt_issuer.clone(),
        rate_limit_registry,
    ));

    let mut ws = WsState::new(hub.clone(), jwt_validator);
    ws.ping_interval = Duration::from_secs(config.get_or("websocket.ping_interval_s", 60));
    ws.pong_timeout = Duration::from_secs(config.get_or("websocket.pong_timeout_s", 10));

    let health = Arc::new(
        HealthBuilder::new()
            .check(DbHealthIndicator::new("database", SqlxBackend::new(pool.clone(), dialect)))
            .cache_ttl(Duration::from_secs(5))
            .build(),
    );

    let (scheduler, jobs) = start_scheduler(scheduled_tasks(pool.clone(), dialect, cache.clone(), &security_config, &config));

    let state = app::AppState {
        dispatcher,
        jwt_issuer,
        ws,
        health,
        pool: pool.clone(),
        cache,
        jobs,
    };

    let metrics_config = MetricsConfig::default();
    let router = app::build_router(state, metrics_config, otel_layer);

    let bind_addr = config.get_or::<String>("listeners.0.address", "0.0.0.0".to_string());
    let bind_port: i64 = config.get_or("listeners.0.port", 3000);
    let addr = format!("{bind_addr}:{bind_port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, profile = %config.profile(), "keystone listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // §4.5 "Cancellation": push a close frame to every connected WebSocket
    // client and give them a bounded window to disconnect.
    hub.shutdown(Duration::from_secs(5)).await;

    scheduler.cancel();
    tracing::info!("keystone stopped");
    Ok(())
}

fn build_security_config(config: &KeystoneConfig) -> SecurityConfig {
    let secret = config.get::<String>("jwt.secret").unwrap_or_else(|_| {
        tracing::warn!("jwt.secret not configured, using an insecure development default");
        "keystone-dev-secret-change-in-production".to_string()
    });
    let issuer = config.get_or("jwt.issuer", "keystone".to_string());

    SecurityConfig::new(secret, issuer)
        .with_jwt_expiry(config.get_or("jwt.expiry_s", 86_400))
        .with_cache_ttl(config.get_or("security.cache.ttl_s", 300))
        .with_cache_capacity(config.get_or::<i64>("security.cache.max_size", 10_000) as usize)
}

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
async fn connect_database(config: &KeystoneConfig) -> Result<(Pool<Db>, Dialect), Box<dyn std::error::Error>> {
    use sqlx::postgres::PgPoolOptions;

    let host = config.get_or("database.host", "localhost".to_string());
    let port: i64 = config.get_or("database.port", 5432);
    let name = config.get_or("database.name", "keystone".to_string());
    let user = config.get_or("database.user", "keystone".to_string());
    let password = config.get_or("database.password", String::new());
    let url = format!("postgres://{user}:{password}@{host}:{port}/{name}");

    let pool = PgPoolOptions::new()
        .max_connections(config.get_or::<i64>("database.pool.max_connections", 100) as u32)
        .min_connections(config.get_or::<i64>("database.pool.min_connections", 25) as u32)
        .connect(&url)
        .await?;

    Ok((pool, Dialect::Postgres))
}

#[cfg(not(all(feature = "postgres", not(feature = "sqlite"))))]
async fn connect_database(config: &KeystoneConfig) -> Result<(Pool<Db>, Dialect), Box<dyn std::error::Error>> {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::str::FromStr;

    let path = config.get_or("database.path", "keystone.db".to_string());
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .shared_cache(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.get_or::<i64>("database.pool.max_connections", 5) as u32)
        .connect_with(options)
        .await?;

    Ok((pool, Dialect::Sqlite))
}

/// The two housekeeping jobs every deployment runs (§3, §4.2): the
/// permission cache's expired-entry sweep and the audit-log retention
/// sweeper. Both are cancelled together by the `SchedulerHandle` returned
/// alongside them, and show up in `GET /stats/scheduler`.
fn scheduled_tasks(
    pool: Pool<Db>,
    dialect: Dialect,
    cache: Arc<DecisionCache>,
    security_config: &SecurityConfig,
    config: &KeystoneConfig,
) -> Vec<Box<dyn ScheduledTask>> {
    let cache_cleaner = ScheduledTaskDef {
        name: "permission-cache-sweep".to_string(),
        schedule: ScheduleConfig::Interval(Duration::from_secs(security_config.cache_cleaner_interval_s)),
        state: cache,
        task: Box::new(|cache: Arc<DecisionCache>| -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(async move {
                let removed = cache.evict_expired();
                if removed > 0 {
                    tracing::debug!(removed, "permission cache swept expired entries");
                }
            })
        }),
    };

    let retention_days = config.get_or("security.audit.retention_days", 90);
    let audit_sweeper = ScheduledTaskDef {
        name: "audit-log-retention-sweep".to_string(),
        schedule: ScheduleConfig::IntervalWithDelay {
            interval: Duration::from_secs(86_400),
            initial_delay: Duration::from_secs(60),
        },
        state: (pool, dialect, retention_days),
        task: Box::new(
            |(pool, dialect, retention_days): (Pool<Db>, Dialect, i64)| -> Pin<Box<dyn Future<Output = ()> + Send>> {
                Box::pin(async move {
                    let now = chrono::Utc::now().timestamp();
                    match prune_audit_log(&pool, dialect, retention_days, now).await {
                        Ok(removed) if removed > 0 => tracing::info!(removed, "pruned expired audit log rows"),
                        Ok(_) => {}
                        Err(err) => tracing::error!(%err, "audit log retention sweep failed"),
                    }
                })
            },
        ),
    };

    vec![Box::new(cache_cleaner), Box::new(audit_sweeper)]
}

/// Waits for Ctrl-C or, on Unix, SIGTERM (§4.5 "Cancellation" / §5 shutdown drain).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl-C");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
