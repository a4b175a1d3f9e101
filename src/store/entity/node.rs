use sea_orm::entity::prelude::*;

/// A node: the application-level event attached to a commit. The full
/// payload JSON is authoritative; `kind`, `role` and `response_id` are
/// mirrored into columns for filtering without payload decode.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "nodes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub project_id: String,
    pub commit_id: String,
    pub created_on_ref_id: String,
    /// Set only on merge nodes: the ref merged from.
    pub merge_from_ref_id: Option<String>,
    /// `message`, `state`, or `merge`.
    pub kind: String,
    pub role: Option<String>,
    pub response_id: Option<String>,
    /// Persisted node JSON in the wire shape, `id` embedded.
    pub payload: String,
    pub created_by: String,
    /// Millisecond UTC timestamp.
    pub timestamp: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Joins a node to the per-ref linearization rows of its commit, for
    /// latest-node-along-ref lookups.
    #[sea_orm(
        belongs_to = "super::commit_order::Entity",
        from = "Column::CommitId",
        to = "super::commit_order::Column::CommitId"
    )]
    CommitOrder,
}

impl ActiveModelBehavior for ActiveModel {}
