use sea_orm::entity::prelude::*;

/// An immutable canvas version tied to a commit. Exactly one row per
/// `(project, commit, kind)`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "artefacts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub project_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub commit_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub kind: String,
    /// Stable artefact id returned to callers.
    pub id: String,
    pub content: String,
    /// Lowercase hex SHA-256 of the UTF-8 content bytes.
    pub content_hash: String,
    /// Ref the artefact was written on.
    pub origin_ref_id: String,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Joins an artefact to the per-ref linearization rows of its commit,
    /// for latest-artefact-along-ref lookups.
    #[sea_orm(
        belongs_to = "super::commit_order::Entity",
        from = "Column::CommitId",
        to = "super::commit_order::Column::CommitId"
    )]
    CommitOrder,
}

impl ActiveModelBehavior for ActiveModel {}
