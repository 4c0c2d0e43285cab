//! Schema migrations are declarative SQL, applied with [`sqlx::migrate!`] at
//! startup — this crate does not provide its own migration runner or DSL.
//!
//! Convention: put numbered `.sql` files under a `migrations/` directory next
//! to the binary crate's `Cargo.toml` (e.g. `0001_init.sql`,
//! `0002_add_security_levels.sql`) and run them once during boot:
//!
//! ```ignore
//! sqlx::migrate!("./migrations").run(&pool).await?;
//! ```
//!
//! Embedded and server deployments share the same migration files; dialect
//! differences (if any) are expressed with separate files per backend rather
//! than a templating layer.
