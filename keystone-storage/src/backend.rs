use crate::error::StorageError;

/// Which relational backend a [`Backend`] is talking to.
///
/// Exposed so callers can branch on dialect when a behavior is unavoidably
/// backend-specific; the common path never needs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Embedded, file-backed store (SQLite: WAL, single-writer-many-reader, shared cache).
    Embedded,
    /// Server-based store (Postgres).
    Server,
}

/// The storage-wide contract every backend implements: liveness and dialect
/// identification. Query execution and transactions are exposed by the
/// concrete backend crate (e.g. `keystone-storage-sqlx`), which is free to
/// use the driver's native row/argument types instead of a lowest-common
/// denominator row abstraction.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Check connectivity. Used by the health indicator.
    async fn ping(&self) -> Result<(), StorageError>;

    fn kind(&self) -> BackendKind;
}
