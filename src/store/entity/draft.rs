use sea_orm::entity::prelude::*;

/// A mutable per-(project, ref, user) canvas draft. Not part of history;
/// never appears in commit order and never seeds history reads.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "artefact_drafts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub project_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub ref_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    pub content: String,
    /// Lowercase hex SHA-256 of the UTF-8 content bytes.
    pub content_hash: String,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
