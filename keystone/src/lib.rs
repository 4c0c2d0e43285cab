//! keystone — JIRA/Confluence-style authorization and real-time event fabric.
//!
//! This crate wires together the authorization engine
//! ([`keystone_security`]), the storage abstraction ([`keystone_storage`] /
//! [`keystone_storage_sqlx`]), the unified action dispatcher
//! ([`keystone_dispatch`]), and the WebSocket event hub
//! ([`keystone_events`]) into a runnable server binary (`src/main.rs`).
//!
//! Library consumers — mainly integration tests in `tests/` — should prefer
//! `use keystone::prelude::*;` over reaching into the sub-crates directly.

pub use keystone_core;
pub use keystone_dispatch;
pub use keystone_events;
pub use keystone_metrics;
pub use keystone_observability;
pub use keystone_rate_limit;
pub use keystone_scheduler;
pub use keystone_security;
pub use keystone_storage;
pub use keystone_storage_sqlx;

pub mod app;

/// Import everything needed to assemble or test a running server with
/// `use keystone::prelude::*;`.
pub mod prelude {
    pub use keystone_core::prelude::*;
    pub use keystone_dispatch::prelude::*;
    pub use keystone_security::prelude::*;
    pub use keystone_storage::prelude::*;

    pub use crate::app::{build_router, AppState};
}
