//! # keystone-dispatch — the unified `POST /do` action-dispatch pipeline (C4)
//!
//! Every mutating and read operation against the domain model passes
//! through one endpoint: parse → attack-prevention → authenticate →
//! authorize (via `keystone-security`) → execute (generic CRUD over the
//! `objects` skeleton) → emit event (via `keystone-events`) → respond.
//!
//! [`pipeline::Dispatcher`] is the crate's single public entrypoint; the
//! other modules are its supporting cast: [`envelope`] (wire types),
//! [`error`] (the closed error-code set), [`object`]/[`repository`] (the
//! generic domain-entity skeleton and its storage), [`registry`]
//! (per-object-type hierarchy/delete-mode metadata and the Version state
//! machine), and [`store`] (SQL-backed `SecurityStore`/`AuditSink`/user auth).

pub mod envelope;
pub mod error;
pub mod object;
pub mod pipeline;
pub mod registry;
pub mod repository;
pub mod store;

pub mod prelude {
    //! Re-exports of the most commonly used dispatch types.
    pub use crate::envelope::{DispatchRequest, DispatchResponse, RequestContext};
    pub use crate::error::{DispatchError, DispatchFailure, DispatchResult};
    pub use crate::object::ObjectRecord;
    pub use crate::pipeline::Dispatcher;
    pub use crate::repository::ObjectStore;
    pub use crate::store::{SqlAuditSink, SqlSecurityStore, SqlUserStore};
}
