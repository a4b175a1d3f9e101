use sea_orm::entity::prelude::*;

/// A commit in the provenance DAG. Zero parents for genesis, one for a
/// normal append, two for an "ours" merge (`parent2` is the source tip).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "commits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub project_id: String,
    pub parent1: Option<String>,
    pub parent2: Option<String>,
    pub message: String,
    pub author: String,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
