use sea_orm::entity::prelude::*;

/// A ref (branch): a named mutable pointer into the commit DAG with a
/// per-ref linear ordering and a provider binding. The ref named `main`
/// is the project's trunk.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "refs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub project_id: String,
    /// Display name, unique within the project.
    pub name: String,
    pub tip_commit_id: Option<String>,
    /// Max ordinal in this ref's commit order, or -1 when empty.
    pub tip_ordinal: i64,
    pub provider: String,
    pub model: String,
    /// Binds same-branch continuations to prior responses; only ever set
    /// for the responses-capable provider.
    pub previous_response_id: Option<String>,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
