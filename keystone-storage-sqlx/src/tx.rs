//! Transaction wrapper with explicit lifecycle management.
//!
//! The dispatcher's execution stage opens a transaction for any mutation
//! that touches multiple tables, or that needs the read-modify-write pattern
//! used by optimistic locking, and commits or rolls back explicitly — there
//! is no per-route dependency-injection layer to do it implicitly.

use sqlx::{Database, Pool, Transaction};
use std::ops::{Deref, DerefMut};

/// Trait for application states that contain a database pool.
pub trait HasPool<DB: Database> {
    fn pool(&self) -> &Pool<DB>;
}

/// A thin wrapper around SQLx's [`Transaction`].
///
/// Callers drive the lifecycle themselves: [`Tx::begin`] starts it,
/// [`Tx::commit`] commits, and dropping without committing rolls back (the
/// inner `Transaction`'s own `Drop` impl does this).
pub struct Tx<'a, DB: Database>(Transaction<'a, DB>);

impl<'a, DB: Database> Deref for Tx<'a, DB> {
    type Target = Transaction<'a, DB>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a, DB: Database> DerefMut for Tx<'a, DB> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<DB: Database> Tx<'static, DB> {
    pub async fn begin(pool: &Pool<DB>) -> Result<Tx<'static, DB>, sqlx::Error> {
        Ok(Tx(pool.begin().await?))
    }
}

impl<'a, DB: Database> Tx<'a, DB> {
    /// Mutable reference to the underlying connection for `sqlx::query(...).execute(tx.as_mut())`.
    pub fn as_mut(&mut self) -> &mut <DB as Database>::Connection {
        &mut self.0
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        self.0.commit().await
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        self.0.rollback().await
    }
}
