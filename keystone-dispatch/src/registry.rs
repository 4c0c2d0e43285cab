//! Per-object-type metadata the execution stage consults (§4.4, §6
//! "Canonical object names"). Deliberately small: everything entity-specific
//! beyond this table is an explicit non-goal (§1).

use std::collections::HashMap;
use std::sync::OnceLock;

/// How a child object's `project_id` is resolved when it has no `project_id`
/// column of its own (§4.4 "Hierarchical authorization").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectIdSource {
    /// The object carries its own `project_id` column directly.
    OwnColumn,
    /// Resolve via a parent object referenced by `data.<field>`, itself
    /// looked up by `parent_object_type`.
    ViaParent {
        parent_field: &'static str,
        parent_object_type: &'static str,
    },
}

/// Whether `remove` soft-deletes (`deleted = 1`) or hard-deletes the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    Soft,
    Hard,
}

#[derive(Debug, Clone, Copy)]
pub struct ObjectSpec {
    pub project_id_source: ProjectIdSource,
    pub delete_mode: DeleteMode,
}

impl ObjectSpec {
    const fn own_column() -> Self {
        Self {
            project_id_source: ProjectIdSource::OwnColumn,
            delete_mode: DeleteMode::Soft,
        }
    }

    const fn via_parent(parent_field: &'static str, parent_object_type: &'static str) -> Self {
        Self {
            project_id_source: ProjectIdSource::ViaParent {
                parent_field,
                parent_object_type,
            },
            delete_mode: DeleteMode::Soft,
        }
    }

    const fn hard_deleted(mut self) -> Self {
        self.delete_mode = DeleteMode::Hard;
        self
    }
}

/// Registry of hierarchical/hard-delete exceptions (§6 "Canonical object
/// names", SPEC_FULL.md "Canonical object registry"). Every object name not
/// listed here defaults to `OwnColumn` + `Soft` — the common case.
fn specs() -> &'static HashMap<&'static str, ObjectSpec> {
    static SPECS: OnceLock<HashMap<&'static str, ObjectSpec>> = OnceLock::new();
    SPECS.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert("comment", ObjectSpec::via_parent("ticketId", "ticket"));
        m.insert("watcher", ObjectSpec::via_parent("ticketId", "ticket").hard_deleted());
        m.insert("attachment", ObjectSpec::via_parent("ticketId", "ticket"));
        m
    })
}

/// Look up an object's hierarchy/delete-mode metadata, defaulting to the
/// common case (own `project_id` column, soft delete) for anything not
/// explicitly registered.
pub fn object_spec(object_type: &str) -> ObjectSpec {
    specs().get(object_type).copied().unwrap_or_else(ObjectSpec::own_column)
}

/// The states a `version` object's lifecycle can be in (§4.4 "State machine
/// for special verbs").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    Created,
    Released,
    Archived,
}

impl VersionState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "released" => Some(Self::Released),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VersionState::Created => "created",
            VersionState::Released => "released",
            VersionState::Archived => "archived",
        }
    }

    /// `release` is allowed only from `created`; `archive` is allowed from
    /// either `created` or `released` (§4.4, illustrative state machine).
    pub fn can_transition_to(self, target: VersionState) -> bool {
        matches!(
            (self, target),
            (VersionState::Created, VersionState::Released) | (VersionState::Created, VersionState::Archived) | (VersionState::Released, VersionState::Archived)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_only_allowed_from_created() {
        assert!(VersionState::Created.can_transition_to(VersionState::Released));
        assert!(!VersionState::Released.can_transition_to(VersionState::Released));
        assert!(!VersionState::Archived.can_transition_to(VersionState::Released));
    }

    #[test]
    fn archive_allowed_from_created_or_released() {
        assert!(VersionState::Created.can_transition_to(VersionState::Archived));
        assert!(VersionState::Released.can_transition_to(VersionState::Archived));
        assert!(!VersionState::Archived.can_transition_to(VersionState::Archived));
    }

    #[test]
    fn comment_resolves_project_id_via_ticket() {
        let spec = object_spec("comment");
        assert_eq!(spec.delete_mode, DeleteMode::Soft);
        assert!(matches!(
            spec.project_id_source,
            ProjectIdSource::ViaParent {
                parent_field: "ticketId",
                parent_object_type: "ticket"
            }
        ));
    }

    #[test]
    fn watcher_is_hard_deleted() {
        assert_eq!(object_spec("watcher").delete_mode, DeleteMode::Hard);
    }

    #[test]
    fn unregistered_object_defaults_to_own_column_soft_delete() {
        let spec = object_spec("ticket");
        assert_eq!(spec.project_id_source, ProjectIdSource::OwnColumn);
        assert_eq!(spec.delete_mode, DeleteMode::Soft);
    }
}
