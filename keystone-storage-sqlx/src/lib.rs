//! # keystone-storage-sqlx — SQLx backend for the keystone data layer
//!
//! Provides the [SQLx](https://github.com/launchbadge/sqlx)-specific
//! implementation for keystone's data access layer: a pool-and-dialect
//! wrapper ([`SqlxRepository`]), an explicit transaction wrapper ([`Tx`]),
//! and error bridging ([`SqlxErrorExt`]) from `sqlx::Error` into
//! [`keystone_storage::StorageError`].
//!
//! # Feature flags
//!
//! Enable exactly one database driver, matching the deployment mode:
//!
//! | Feature    | Driver | Deployment |
//! |------------|--------|------------|
//! | `sqlite`   | `sqlx/sqlite` | embedded |
//! | `postgres` | `sqlx/postgres` | server |
//!
//! # Quick start
//!
//! ```ignore
//! use keystone_storage_sqlx::{SqlxRepository, Tx, HasPool};
//! use keystone_storage::Dialect;
//! use sqlx::Sqlite;
//!
//! let repo = SqlxRepository::<Ticket, Sqlite>::new(pool.clone(), Dialect::Sqlite);
//! let (sql, params) = repo.query().where_eq("deleted", "0").build_select("*");
//! let tickets: Vec<Ticket> = repo.fetch_all(&sql, &params).await?;
//! ```
//!
//! # Transactions
//!
//! [`Tx`] wraps an `sqlx::Transaction` with explicit `begin`/`commit`; the
//! execution stage of the dispatcher opens one for any mutation spanning
//! more than one statement and commits it only after the optimistic-lock
//! check passes.
//!
//! ```ignore
//! let mut tx = Tx::begin(&pool).await?;
//! sqlx::query("UPDATE tickets SET title = ? WHERE id = ? AND version = ?")
//!     .bind(&new_title)
//!     .bind(&id)
//!     .bind(current_version)
//!     .execute(tx.as_mut())
//!     .await?;
//! tx.commit().await?;
//! ```
//!
//! # Error bridging
//!
//! Due to Rust's orphan rules, `From<sqlx::Error> for StorageError` can't be
//! implemented here. Use [`SqlxErrorExt::into_storage_error`] instead.

pub mod backend;
pub mod error;
pub mod migration;
pub mod repository;
pub mod tx;

pub use backend::SqlxBackend;
pub use error::{SqlxErrorExt, SqlxResult};
pub use repository::SqlxRepository;
pub use tx::{HasPool, Tx};

/// Re-exports of the most commonly used types from both `keystone-storage` and this crate.
pub mod prelude {
    pub use crate::{HasPool, SqlxErrorExt, SqlxRepository, Tx};
    pub use keystone_storage::prelude::*;
}
