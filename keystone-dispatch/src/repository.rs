//! [`ObjectStore`]: the one concrete repository the dispatcher's generic
//! CRUD execution stage (§4.4 stage 5) talks to, for every canonical object
//! name in §6. Built on [`keystone_storage_sqlx::SqlxRepository`] the same
//! way a hand-written per-entity repository would be, just parameterised by
//! `object_type` instead of by Rust type.

use keystone_storage::{Dialect, Page, Pageable, QueryBuilder, StorageError};
use keystone_storage_sqlx::SqlxRepository;
use sqlx::Database;

use crate::object::DbObjectRow;

fn placeholder(dialect: Dialect, index: usize) -> String {
    match dialect {
        Dialect::Postgres => format!("${index}"),
        Dialect::Generic | Dialect::Sqlite | Dialect::MySql => "?".to_string(),
    }
}

/// A non-identity field update applied by `modify`/special-verb handlers:
/// JSON-merge-patch semantics against the `data` blob, plus whichever
/// skeleton columns the handler chooses to touch (`project_id`,
/// `security_level_id`).
#[derive(Debug, Clone, Default)]
pub struct ObjectPatch {
    pub data: Option<String>,
    pub project_id: Option<Option<String>>,
    pub security_level_id: Option<Option<i64>>,
}

pub struct ObjectStore<DB: Database> {
    repo: SqlxRepository<DbObjectRow, DB>,
    dialect: Dialect,
}

impl<DB> ObjectStore<DB>
where
    DB: Database,
    DbObjectRow: for<'r> sqlx::FromRow<'r, DB::Row>,
    for<'q> String: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
{
    pub fn new(repo: SqlxRepository<DbObjectRow, DB>, dialect: Dialect) -> Self {
        Self { repo, dialect }
    }

    /// A non-deleted row by id, regardless of `object_type` (ids are globally unique).
    pub async fn find_by_id(&self, id: &str) -> Result<Option<DbObjectRow>, StorageError> {
        let (sql, params) = self.repo.query().where_eq("id", id).where_eq("deleted", "0").build_select("*");
        self.repo.fetch_optional(&sql, &params).await
    }

    /// A non-deleted row by id, scoped to the expected `object_type` — read
    /// and modify both check this so a `ticket` handler can't be pointed at
    /// a `project` row sharing the same id space.
    pub async fn find_by_id_typed(&self, object_type: &str, id: &str) -> Result<Option<DbObjectRow>, StorageError> {
        let (sql, params) = self
            .repo
            .query()
            .where_eq("id", id)
            .where_eq("object_type", object_type)
            .where_eq("deleted", "0")
            .build_select("*");
        self.repo.fetch_optional(&sql, &params).await
    }

    /// Paged listing scoped to `object_type`, with an optional `project_id`
    /// filter (the common case for hierarchical objects) and caller-supplied
    /// equality filters already whitelisted by the registered handler.
    pub async fn list_paged(
        &self,
        object_type: &str,
        project_id: Option<&str>,
        extra_filters: &[(&str, &str)],
        pageable: &Pageable,
    ) -> Result<Page<DbObjectRow>, StorageError> {
        let mut builder: QueryBuilder = self.repo.query().where_eq("object_type", object_type).where_eq("deleted", "0");
        if let Some(pid) = project_id {
            builder = builder.where_eq("project_id", pid);
        }
        for (col, val) in extra_filters {
            builder = builder.where_eq(col, val);
        }
        let (count_sql, count_params) = builder.clone().build_count();
        let total = self.repo.fetch_count(&count_sql, &count_params).await?;

        let (sql, params) = builder
            .order_by("created", false)
            .limit(pageable.size)
            .offset(pageable.page * pageable.size)
            .build_select("*");
        let content = self.repo.fetch_all(&sql, &params).await?;
        Ok(Page::new(content, pageable, total))
    }

    /// Insert a brand-new row. `id`, `created`, `modified` are caller-assigned
    /// (the execution stage mints a uuid and the current epoch) so this
    /// stays a pure storage operation.
    pub async fn insert(&self, row: &DbObjectRow) -> Result<(), StorageError> {
        let (sql, params) = {
            let cols = DbObjectRow::columns().join(", ");
            let placeholders = (1..=DbObjectRow::columns().len())
                .map(|i| placeholder(self.dialect, i))
                .collect::<Vec<_>>()
                .join(", ");
            (
                format!("INSERT INTO objects ({cols}) VALUES ({placeholders})"),
                vec![
                    row.id.clone(),
                    row.object_type.clone(),
                    row.project_id.clone().unwrap_or_default(),
                    row.security_level_id.map(|v| v.to_string()).unwrap_or_default(),
                    row.created.to_string(),
                    row.modified.to_string(),
                    row.version.to_string(),
                    row.deleted.to_string(),
                    row.data.clone(),
                ],
            )
        };
        self.repo.execute(&sql, &params).await?;
        Ok(())
    }

    /// The optimistic-concurrency UPDATE protocol (§4.4): `WHERE id = ? AND
    /// version = ?`, `SET ..., version = version + 1, modified = ?`. Zero
    /// rows affected surfaces as [`StorageError::VersionConflict`].
    pub async fn update_versioned(
        &self,
        id: &str,
        expected_version: i64,
        patch: &ObjectPatch,
        now: i64,
    ) -> Result<(), StorageError> {
        let mut idx = 1;
        let mut next = || {
            let p = placeholder(self.dialect, idx);
            idx += 1;
            p
        };

        let mut sets = vec![format!("modified = {}", next()), "version = version + 1".to_string()];
        let mut params = vec![now.to_string()];

        if let Some(data) = &patch.data {
            sets.push(format!("data = {}", next()));
            params.push(data.clone());
        }
        if let Some(project_id) = &patch.project_id {
            sets.push(format!("project_id = {}", next()));
            params.push(project_id.clone().unwrap_or_default());
        }
        if let Some(security_level_id) = &patch.security_level_id {
            sets.push(format!("security_level_id = {}", next()));
            params.push(security_level_id.map(|v| v.to_string()).unwrap_or_default());
        }

        let sql = format!(
            "UPDATE objects SET {} WHERE id = {} AND version = {}",
            sets.join(", "),
            next(),
            next()
        );
        params.push(id.to_string());
        params.push(expected_version.to_string());

        self.repo.execute_versioned(&sql, &params, id, expected_version).await
    }

    /// Soft delete: `deleted = 1, modified = now`. Returns `false` if no
    /// matching non-deleted row existed (§4.4 DELETE semantics, R3 idempotence).
    pub async fn soft_delete(&self, id: &str, now: i64) -> Result<bool, StorageError> {
        let sql = format!(
            "UPDATE objects SET deleted = 1, modified = {} WHERE id = {} AND deleted = 0",
            placeholder(self.dialect, 1),
            placeholder(self.dialect, 2),
        );
        let rows = self.repo.execute(&sql, &[now.to_string(), id.to_string()]).await?;
        Ok(rows > 0)
    }

    /// Hard delete, reserved for relationship tables the schema designates
    /// as hard-deleted (watchers, subscriptions — not soft-deletable rows).
    pub async fn hard_delete(&self, id: &str) -> Result<bool, StorageError> {
        let sql = format!("DELETE FROM objects WHERE id = {}", placeholder(self.dialect, 1));
        let rows = self.repo.execute(&sql, &[id.to_string()]).await?;
        Ok(rows > 0)
    }

    /// Resolve an ancestor's `project_id` via a chain of parent-id lookups,
    /// for hierarchical objects with no direct `project_id` column of their
    /// own (comments, watchers, attachments — §4.4 "Hierarchical
    /// authorization"). `parent_id` is read out of the child's own `data`
    /// blob by the caller before this is invoked.
    pub async fn resolve_project_id(&self, parent_id: &str) -> Result<Option<String>, StorageError> {
        Ok(self.find_by_id(parent_id).await?.and_then(|row| row.project_id))
    }
}
