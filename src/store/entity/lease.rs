use sea_orm::entity::prelude::*;

/// The persisted per-ref writer lease. One row per `(project, ref)`;
/// treated as absent once `expires_at` has passed.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "ref_leases")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub project_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub ref_id: String,
    pub holder_user: String,
    pub holder_session: String,
    /// Millisecond UTC expiry.
    pub expires_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
