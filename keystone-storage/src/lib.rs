//! # keystone-storage — Backend-agnostic data access abstractions
//!
//! This crate defines the **pure abstraction layer** for keystone's data
//! access: traits, types, and error handling with **zero database driver
//! dependencies**.
//!
//! The concrete backend lives in [`keystone-storage-sqlx`](https://docs.rs/keystone-storage-sqlx)
//! (SQLite for the embedded deployment, Postgres for the server deployment).
//!
//! # What's in this crate
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Entity`] | Trait mapping a Rust struct to a SQL table (table name, columns, id) |
//! | [`VersionedEntity`] | Extension for the common id/project/version/soft-delete skeleton |
//! | [`Backend`] | Liveness + dialect identification contract, one per process |
//! | [`Page`] / [`Pageable`] | Paginated result wrapper and page parameters |
//! | [`StorageError`] | Type-erased error enum (`NotFound`, `VersionConflict`, `Database`, ...) |
//! | [`QueryBuilder`] | Fluent builder for parameterised, dialect-aware SQL |
//!
//! # Usage
//!
//! Most users should depend on `keystone-storage-sqlx`, which re-exports
//! everything from this crate. Direct dependency on `keystone-storage` is
//! only needed when writing backend-agnostic library code.
//!
//! # Error bridging
//!
//! [`StorageError::Database`] holds a `Box<dyn Error + Send + Sync>`, so the
//! backend crate can wrap driver errors without leaking types. Use
//! [`StorageError::database()`] to construct from any error type.
//! `StorageError` converts into [`keystone_core::AppError`] automatically.

pub mod backend;
pub mod entity;
pub mod error;
pub mod page;
pub mod query;

pub use backend::{Backend, BackendKind};
pub use entity::{Entity, VersionedEntity};
pub use error::StorageError;
pub use page::{Page, Pageable};
pub use query::{Dialect, IdentifierPolicy, QueryBuilder, QueryError};

/// Re-exports of the most commonly used data types.
pub mod prelude {
    pub use crate::{Backend, BackendKind, Entity, Page, Pageable, QueryBuilder, StorageError, VersionedEntity};
}
