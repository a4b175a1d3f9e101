//! The persisted per-ref lease: cross-session writer serialization.
//!
//! One row per `(project, ref)` naming the holder `(user, session)` and an
//! expiry. An expired row is treated as absent; acquisition over it
//! displaces the old holder, whose in-flight stream then observes
//! `LeaseExpired` on its next gated write.

use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};

use crate::errors::CoreError;
use crate::model::{now_ms, ProjectId, RefId, SessionId, UserId};
use crate::store::{entity, load_ref, require_member, Store};

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone)]
pub enum LeaseGrant {
    Acquired { expires_at: i64 },
    Busy {
        holder_user: UserId,
        holder_session: SessionId,
        expires_at: i64,
    },
}

impl LeaseGrant {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LeaseGrant::Acquired { .. })
    }
}

/// Diagnostic projection of one lease row.
#[derive(Debug, Clone)]
pub struct LeaseState {
    pub ref_id: RefId,
    pub holder_user: UserId,
    pub holder_session: SessionId,
    pub expires_at: i64,
}

impl Store {
    /// Acquire or refresh the lease on a ref.
    ///
    /// - Absent or expired row: upsert with the TTL, `Acquired`.
    /// - Row held by this `(user, session)`: refresh, `Acquired`.
    /// - Otherwise: `Busy` with the holder and its expiry.
    pub async fn acquire_ref_lease(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        user: &UserId,
        session: &SessionId,
        ttl_ms: i64,
    ) -> Result<LeaseGrant, CoreError> {
        if ttl_ms <= 0 {
            return Err(CoreError::invalid("lease TTL must be positive"));
        }
        let txn = self.db.begin().await?;
        require_member(&txn, project, user).await?;
        load_ref(&txn, project, ref_id).await?;

        let now = now_ms();
        let existing = entity::lease::Entity::find_by_id((project.to_string(), ref_id.to_string()))
            .one(&txn)
            .await?;
        if let Some(lease) = &existing {
            let live = lease.expires_at > now;
            let is_holder =
                lease.holder_user == user.as_str() && lease.holder_session == session.as_str();
            if live && !is_holder {
                txn.commit().await?;
                return Ok(LeaseGrant::Busy {
                    holder_user: UserId::from(lease.holder_user.as_str()),
                    holder_session: SessionId::from(lease.holder_session.as_str()),
                    expires_at: lease.expires_at,
                });
            }
            if live && is_holder {
                tracing::debug!("lease refresh via acquire on {}", ref_id);
            } else if !live {
                tracing::debug!(
                    "displacing expired lease of session {} on {}",
                    lease.holder_session,
                    ref_id
                );
            }
        }

        let expires_at = now + ttl_ms;
        entity::lease::Entity::insert(entity::lease::ActiveModel {
            project_id: Set(project.to_string()),
            ref_id: Set(ref_id.to_string()),
            holder_user: Set(user.to_string()),
            holder_session: Set(session.to_string()),
            expires_at: Set(expires_at),
        })
        .on_conflict(
            OnConflict::columns([
                entity::lease::Column::ProjectId,
                entity::lease::Column::RefId,
            ])
            .update_columns([
                entity::lease::Column::HolderUser,
                entity::lease::Column::HolderSession,
                entity::lease::Column::ExpiresAt,
            ])
            .to_owned(),
        )
        .exec(&txn)
        .await?;
        txn.commit().await?;
        Ok(LeaseGrant::Acquired { expires_at })
    }

    /// Idempotent heartbeat: extends the caller's own lease; fails with
    /// `LeaseExpired` when the stored holder is someone else or gone.
    pub async fn refresh_ref_lease(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        user: &UserId,
        session: &SessionId,
        ttl_ms: i64,
    ) -> Result<i64, CoreError> {
        let txn = self.db.begin().await?;
        let existing = entity::lease::Entity::find_by_id((project.to_string(), ref_id.to_string()))
            .one(&txn)
            .await?;
        let Some(lease) = existing else {
            return Err(CoreError::LeaseExpired(ref_id.to_string()));
        };
        if lease.holder_user != user.as_str() || lease.holder_session != session.as_str() {
            return Err(CoreError::LeaseExpired(ref_id.to_string()));
        }
        let expires_at = now_ms() + ttl_ms;
        let mut active: entity::lease::ActiveModel = lease.into();
        active.expires_at = Set(expires_at);
        active.update(&txn).await?;
        txn.commit().await?;
        Ok(expires_at)
    }

    /// Remove the lease if `session` holds it, or unconditionally when
    /// `force`. Releasing a lease the caller does not hold is a no-op.
    pub async fn release_ref_lease(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        session: &SessionId,
        force: bool,
    ) -> Result<(), CoreError> {
        let mut delete = entity::lease::Entity::delete_many()
            .filter(entity::lease::Column::ProjectId.eq(project.to_string()))
            .filter(entity::lease::Column::RefId.eq(ref_id.to_string()));
        if !force {
            delete = delete.filter(entity::lease::Column::HolderSession.eq(session.to_string()));
        }
        delete.exec(&self.db).await?;
        Ok(())
    }

    /// Diagnostic read of the project's live leases.
    pub async fn list_ref_leases(&self, project: &ProjectId) -> Result<Vec<LeaseState>, CoreError> {
        let now = now_ms();
        let rows = entity::lease::Entity::find()
            .filter(entity::lease::Column::ProjectId.eq(project.to_string()))
            .filter(entity::lease::Column::ExpiresAt.gt(now))
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| LeaseState {
                ref_id: RefId::from(r.ref_id),
                holder_user: UserId::from(r.holder_user),
                holder_session: SessionId::from(r.holder_session),
                expires_at: r.expires_at,
            })
            .collect())
    }

    /// The live lease holder's session on a ref, if any. The stream
    /// coordinator consults this before its assistant append.
    pub async fn lease_holder_session(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
    ) -> Result<Option<SessionId>, CoreError> {
        let lease = crate::store::live_lease(&self.db, project, ref_id).await?;
        Ok(lease.map(|l| SessionId::from(l.holder_session)))
    }
}
