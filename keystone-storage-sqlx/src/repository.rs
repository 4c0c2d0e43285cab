use crate::error::SqlxErrorExt;
use keystone_storage::{Dialect, QueryBuilder, StorageError};
use sqlx::{Database, Pool};
use std::marker::PhantomData;

/// A thin pool-and-dialect holder scoped to one entity type.
///
/// This is infrastructure, not a full generic ORM: it gives a concrete
/// entity's own repository module (in `keystone-dispatch`) a pre-configured
/// [`QueryBuilder`] plus parameterised fetch/execute helpers, so that module
/// only has to write the entity's own column mapping.
///
/// # Example
///
/// ```ignore
/// let repo = SqlxRepository::<Ticket, Sqlite>::new(pool.clone(), Dialect::Sqlite);
/// let (sql, params) = repo.query().where_eq("deleted", "0").build_select("*");
/// let tickets: Vec<Ticket> = repo.fetch_all(&sql, &params).await?;
/// ```
pub struct SqlxRepository<T, DB: Database> {
    pool: Pool<DB>,
    dialect: Dialect,
    _marker: PhantomData<T>,
}

impl<T, DB: Database> SqlxRepository<T, DB> {
    pub fn new(pool: Pool<DB>, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            _marker: PhantomData,
        }
    }

    pub fn pool(&self) -> &Pool<DB> {
        &self.pool
    }

    /// A `QueryBuilder` pre-configured for this entity's table and dialect.
    pub fn query(&self) -> QueryBuilder
    where
        T: keystone_storage::Entity,
    {
        QueryBuilder::new_with_dialect(T::table_name(), self.dialect)
    }

    /// Run a parameterised query expecting zero-or-one rows.
    pub async fn fetch_optional<R>(&self, sql: &str, params: &[String]) -> Result<Option<R>, StorageError>
    where
        R: Send + Unpin + for<'r> sqlx::FromRow<'r, DB::Row>,
        for<'q> String: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    {
        let mut query = sqlx::query_as::<DB, R>(sql);
        for p in params {
            query = query.bind(p.clone());
        }
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)
    }

    /// Run a parameterised query returning all matching rows.
    pub async fn fetch_all<R>(&self, sql: &str, params: &[String]) -> Result<Vec<R>, StorageError>
    where
        R: Send + Unpin + for<'r> sqlx::FromRow<'r, DB::Row>,
        for<'q> String: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    {
        let mut query = sqlx::query_as::<DB, R>(sql);
        for p in params {
            query = query.bind(p.clone());
        }
        query
            .fetch_all(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)
    }

    /// Run a scalar `COUNT(*)`-style query.
    pub async fn fetch_count(&self, sql: &str, params: &[String]) -> Result<u64, StorageError> {
        let mut query = sqlx::query_scalar::<DB, i64>(sql);
        for p in params {
            query = query.bind(p.clone());
        }
        let count: i64 = query
            .fetch_one(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(count.max(0) as u64)
    }

    /// Run a parameterised INSERT/UPDATE/DELETE, returning rows affected.
    pub async fn execute(&self, sql: &str, params: &[String]) -> Result<u64, StorageError> {
        let mut query = sqlx::query::<DB>(sql);
        for p in params {
            query = query.bind(p.clone());
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(result.rows_affected())
    }

    /// Run the optimistic-concurrency UPDATE protocol: execute `sql` (which
    /// must include `id = ?` and `version = ?` in its WHERE clause, in that
    /// bind order relative to `params`) and translate zero-rows-affected
    /// into [`StorageError::VersionConflict`] rather than silently
    /// succeeding with no effect.
    pub async fn execute_versioned(
        &self,
        sql: &str,
        params: &[String],
        id: &str,
        expected_version: i64,
    ) -> Result<(), StorageError> {
        let rows = self.execute(sql, params).await?;
        if rows == 0 {
            return Err(StorageError::VersionConflict {
                id: id.to_string(),
                expected_version,
            });
        }
        Ok(())
    }
}

impl<T, DB: Database> Clone for SqlxRepository<T, DB> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            dialect: self.dialect,
            _marker: PhantomData,
        }
    }
}
