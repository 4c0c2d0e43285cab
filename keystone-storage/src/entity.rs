/// Trait representing a database entity with a table name, id column, and column list.
///
/// Intended to be implemented manually per concrete entity type (`Ticket`,
/// `Project`, `Comment`, ...).
///
/// # Example
///
/// ```ignore
/// impl Entity for Ticket {
///     type Id = String;
///     fn table_name() -> &'static str { "tickets" }
///     fn id_column() -> &'static str { "id" }
///     fn columns() -> &'static [&'static str] { &["id", "project_id", "title"] }
///     fn id(&self) -> &String { &self.id }
/// }
/// ```
pub trait Entity: Send + Sync + Unpin + 'static {
    type Id: Send + Sync + ToString + 'static;

    fn table_name() -> &'static str;
    fn id_column() -> &'static str;
    fn columns() -> &'static [&'static str];
    fn id(&self) -> &Self::Id;
}

/// Extension of [`Entity`] for the common domain-entity skeleton shared by
/// tickets, projects, comments, documents, etc.: an optional owning project,
/// creation/modification timestamps, a monotone `version` used for
/// optimistic locking, and a soft-delete flag.
///
/// The dispatcher's generic CRUD path and optimistic-concurrency protocol
/// are written against this trait rather than against each concrete type.
pub trait VersionedEntity: Entity {
    /// Owning project, if any. `None` means the entity is system-wide.
    fn project_id(&self) -> Option<&str>;
    /// Current optimistic-lock version.
    fn version(&self) -> i64;
    /// Whether the row is soft-deleted.
    fn is_deleted(&self) -> bool;
}
