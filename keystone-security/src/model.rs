use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One of the five actions the resolver understands. Ordered by the level
/// required to perform it via role inheritance (`READ` < `CREATE` <
/// `UPDATE` == `EXECUTE` < `DELETE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Read,
    Create,
    Update,
    Execute,
    Delete,
}

impl Action {
    /// Minimum role level (1..5) able to perform this action absent any
    /// more specific grant or project-role override.
    pub fn min_role_level(self) -> u8 {
        match self {
            Action::Read => 1,
            Action::Create => 2,
            Action::Update => 3,
            Action::Execute => 3,
            Action::Delete => 5,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "READ" => Some(Action::Read),
            "CREATE" => Some(Action::Create),
            "UPDATE" => Some(Action::Update),
            "EXECUTE" => Some(Action::Execute),
            "DELETE" => Some(Action::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Read => "READ",
            Action::Create => "CREATE",
            Action::Update => "UPDATE",
            Action::Execute => "EXECUTE",
            Action::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

/// Bitfield of actions a principal can perform on a target, used for UI
/// hints via [`crate::engine::SecurityEngine::get_access_summary`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet(u8);

impl PermissionSet {
    pub const EMPTY: PermissionSet = PermissionSet(0);

    fn bit(action: Action) -> u8 {
        match action {
            Action::Read => 1 << 0,
            Action::Create => 1 << 1,
            Action::Update => 1 << 2,
            Action::Execute => 1 << 3,
            Action::Delete => 1 << 4,
        }
    }

    pub fn with(mut self, action: Action) -> Self {
        self.0 |= Self::bit(action);
        self
    }

    pub fn contains(self, action: Action) -> bool {
        self.0 & Self::bit(action) != 0
    }
}

/// Who a grant, role, or cached decision is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    User(String),
    Team(String),
    /// A role attached to a project (or global, when `project_id` is `None`).
    Role { name: String, project_id: Option<String> },
}

/// A `(principal, resource_type, resource_id?, action, level)` permission grant row.
#[derive(Debug, Clone)]
pub struct Grant {
    pub principal: Principal,
    pub resource_type: String,
    /// `None` (or empty string at the storage layer) means "all of this type".
    pub resource_id: Option<String>,
    pub action: Action,
    pub level: u8,
}

impl Grant {
    /// Whether this grant's resource key matches a request's, honoring the
    /// "empty resource_id means any instance" rule.
    pub fn matches_resource(&self, resource_type: &str, resource_id: Option<&str>) -> bool {
        if self.resource_type != resource_type {
            return false;
        }
        match (&self.resource_id, resource_id) {
            (None, _) => true,
            (Some(g), Some(r)) => g == r,
            (Some(_), None) => false,
        }
    }
}

/// A named, leveled authorization bundle. Levels are totally ordered 1..5;
/// higher levels subsume lower levels' capabilities for inheritance checks.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub level: u8,
    /// `None` for a global role, `Some(project_id)` for a project-scoped one.
    pub project_id: Option<String>,
}

/// One `check_access` request.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub username: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub action: Action,
    pub context: HashMap<String, String>,
}

impl AccessRequest {
    pub fn project_id(&self) -> Option<&str> {
        self.context.get("project_id").map(String::as_str).filter(|s| !s.is_empty())
    }
}

/// Source of an allow/deny decision, most specific first — used only for
/// audit-reason reporting; it never changes the decision itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionSource {
    DirectUser,
    Team(String),
    Role(String),
    SecurityLevelDenied,
    ProjectRoleDenied,
    UnknownAction,
    StorageError,
    NoGrant,
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionSource::DirectUser => write!(f, "direct_user"),
            DecisionSource::Team(t) => write!(f, "team:{t}"),
            DecisionSource::Role(r) => write!(f, "role:{r}"),
            DecisionSource::SecurityLevelDenied => write!(f, "security_level_denied"),
            DecisionSource::ProjectRoleDenied => write!(f, "project_role_denied"),
            DecisionSource::UnknownAction => write!(f, "unknown_action"),
            DecisionSource::StorageError => write!(f, "storage_error"),
            DecisionSource::NoGrant => write!(f, "no_grant"),
        }
    }
}

/// Result of [`crate::engine::SecurityEngine::check_access`].
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    pub cache_hit: bool,
    pub permission_set: Option<PermissionSet>,
}
