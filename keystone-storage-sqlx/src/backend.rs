//! The one concrete [`Backend`] every deployment registers with
//! `keystone_core::health` (§6 "GET /health ... DB"): a pool-and-dialect
//! liveness check, nothing more. Query execution and transactions go
//! through [`crate::SqlxRepository`]/[`crate::Tx`] instead — this type
//! exists purely so the binary crate has something to hand the health
//! builder without reaching into driver-specific types itself.

use keystone_core::health::{HealthIndicator, HealthStatus};
use keystone_storage::{Backend, BackendKind, Dialect, StorageError};
use sqlx::{Database, Pool};

use crate::error::SqlxErrorExt;

pub struct SqlxBackend<DB: Database> {
    pool: Pool<DB>,
    dialect: Dialect,
}

impl<DB: Database> SqlxBackend<DB> {
    pub fn new(pool: Pool<DB>, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }
}

#[async_trait::async_trait]
impl<DB: Database> Backend for SqlxBackend<DB> {
    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(SqlxErrorExt::into_storage_error)
    }

    fn kind(&self) -> BackendKind {
        match self.dialect {
            Dialect::Sqlite => BackendKind::Embedded,
            Dialect::Postgres | Dialect::MySql | Dialect::Generic => BackendKind::Server,
        }
    }
}

/// Adapts any [`Backend`] to `keystone_core`'s [`HealthIndicator`], so
/// `main.rs` can register the database under `GET /health` without either
/// crate depending on the other's health-check vocabulary directly.
pub struct DbHealthIndicator<B> {
    name: &'static str,
    backend: B,
}

impl<B: Backend> DbHealthIndicator<B> {
    pub fn new(name: &'static str, backend: B) -> Self {
        Self { name, backend }
    }
}

impl<B: Backend> HealthIndicator for DbHealthIndicator<B> {
    fn name(&self) -> &str {
        self.name
    }

    async fn check(&self) -> HealthStatus {
        match self.backend.ping().await {
            Ok(()) => HealthStatus::Up,
            Err(e) => HealthStatus::Down(e.to_string()),
        }
    }
}
