/// Errors that can occur in the data layer.
#[derive(Debug)]
pub enum StorageError {
    NotFound(String),
    /// An UPDATE targeting a specific `(id, version)` pair affected zero rows:
    /// the row was modified or deleted concurrently.
    VersionConflict { id: String, expected_version: i64 },
    Database(Box<dyn std::error::Error + Send + Sync>),
    Timeout,
    Other(String),
}

impl StorageError {
    /// Construct a `Database` variant from any error type.
    ///
    /// Used by backend crates (e.g. `keystone-storage-sqlx`) to wrap
    /// driver-specific errors without leaking the driver's error type.
    pub fn database(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StorageError::Database(Box::new(err))
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::NotFound(msg) => write!(f, "not found: {msg}"),
            StorageError::VersionConflict { id, expected_version } => {
                write!(f, "version conflict on {id}: expected version {expected_version}")
            }
            StorageError::Database(err) => write!(f, "database error: {err}"),
            StorageError::Timeout => write!(f, "storage operation timed out"),
            StorageError::Other(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<StorageError> for keystone_core::AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => keystone_core::AppError::NotFound(msg),
            StorageError::VersionConflict { id, expected_version } => keystone_core::AppError::Custom {
                status: axum::http::StatusCode::CONFLICT,
                body: serde_json::json!({
                    "error": "version_conflict",
                    "id": id,
                    "expectedVersion": expected_version,
                }),
            },
            StorageError::Database(e) => keystone_core::AppError::Internal(e.to_string()),
            StorageError::Timeout => keystone_core::AppError::Custom {
                status: axum::http::StatusCode::GATEWAY_TIMEOUT,
                body: serde_json::json!({"error": "storage_timeout"}),
            },
            StorageError::Other(msg) => keystone_core::AppError::Internal(msg),
        }
    }
}
