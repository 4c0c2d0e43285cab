use keystone_storage::StorageError;

/// Extension trait for converting `sqlx::Error` into [`StorageError`].
///
/// Due to Rust's orphan rules, `From<sqlx::Error> for StorageError` can't be
/// implemented in `keystone-storage` itself. Use `.into_storage_error()`, or
/// the `?` operator with [`SqlxResult`].
pub trait SqlxErrorExt {
    fn into_storage_error(self) -> StorageError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_storage_error(self) -> StorageError {
        match &self {
            sqlx::Error::RowNotFound => StorageError::NotFound("row not found".into()),
            sqlx::Error::PoolTimedOut => StorageError::Timeout,
            _ => StorageError::database(self),
        }
    }
}

/// Convenience alias for data-layer results using [`StorageError`].
pub type SqlxResult<T> = Result<T, StorageError>;
