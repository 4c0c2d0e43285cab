//! The generic domain-entity skeleton (§3 "Domain entity").
//!
//! Per-type fields are explicitly opaque to the core ("the dispatcher treats
//! them as a typed property bag", §3) and entity-specific CRUD bodies are an
//! explicit non-goal (§1). Rather than hand-write thirty-odd near-identical
//! `Entity` implementations — one per canonical object name in §6 — every
//! canonical object is a row in one physical `objects` table, discriminated
//! by `object_type`, with its own fields carried in a `data` JSON column.
//! [`crate::registry`] is where object-specific behaviour (validation,
//! special verbs) actually lives; storage stays uniform underneath it.

use keystone_storage::{Entity, VersionedEntity};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The row shape bound directly by `sqlx::FromRow`. `data` is carried as raw
/// JSON text because `sqlx::Json<T>` needs a concrete `T`, and here `T` is
/// whatever the registered handler for `object_type` expects.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DbObjectRow {
    pub id: String,
    pub object_type: String,
    pub project_id: Option<String>,
    pub security_level_id: Option<i64>,
    pub created: i64,
    pub modified: i64,
    pub version: i64,
    pub deleted: i64,
    pub data: String,
}

impl Entity for DbObjectRow {
    type Id = String;

    fn table_name() -> &'static str {
        "objects"
    }

    fn id_column() -> &'static str {
        "id"
    }

    fn columns() -> &'static [&'static str] {
        &[
            "id",
            "object_type",
            "project_id",
            "security_level_id",
            "created",
            "modified",
            "version",
            "deleted",
            "data",
        ]
    }

    fn id(&self) -> &String {
        &self.id
    }
}

impl VersionedEntity for DbObjectRow {
    fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn is_deleted(&self) -> bool {
        self.deleted != 0
    }
}

/// Public-facing shape: the same skeleton with `data` parsed and `deleted`
/// as a real bool, for building response bodies and events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: String,
    pub object_type: String,
    pub project_id: Option<String>,
    pub security_level_id: Option<i64>,
    pub created: i64,
    pub modified: i64,
    pub version: i64,
    pub deleted: bool,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl From<DbObjectRow> for ObjectRecord {
    fn from(row: DbObjectRow) -> Self {
        let data = serde_json::from_str(&row.data).unwrap_or_default();
        Self {
            id: row.id,
            object_type: row.object_type,
            project_id: row.project_id,
            security_level_id: row.security_level_id,
            created: row.created,
            modified: row.modified,
            version: row.version,
            deleted: row.deleted != 0,
            data,
        }
    }
}

impl ObjectRecord {
    /// Serialize to the JSON shape returned in a `DispatchResponse`'s `data`
    /// field and embedded in change events.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
