//! The storage layer: a sea-orm relational store persisting the DAG and
//! exposing the atomic engine operations.
//!
//! Every mutating operation acquires the in-process per-ref lock, then
//! runs as a single transaction; an operation that fails mid-way leaves no
//! partial history. Concurrency errors (`RefLocked`, `LeaseHeld`) surface
//! verbatim so the stream coordinator can translate them into user-visible
//! states.

pub mod append;
pub mod branch;
pub mod canvas;
pub mod entity;
pub mod history;
pub mod lease;
pub mod project;

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{
    ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait, JoinType, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Schema,
};

use crate::errors::CoreError;
use crate::lock::{RefGuard, RefLockManager};
use crate::model::{now_ms, ProjectId, Provider, ProviderBinding, RefId, SessionId, UserId};

pub use append::{AppendNode, AppendOutcome};
pub use branch::{BranchFromNodeOutcome, MergeOptions, MergeOutcome};
pub use canvas::{ArtefactSaveOutcome, CanvasSource, CanvasView, DraftState};
pub use history::{HistoryEntry, HistoryPage, RefSummary, TailNode};
pub use lease::{LeaseGrant, LeaseState};

/// Handle to the provenance database plus the in-process lock registry.
#[derive(Clone)]
pub struct Store {
    db: DatabaseConnection,
    locks: Arc<RefLockManager>,
}

impl Store {
    /// Connect and bootstrap the schema from the entity definitions.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let mut options = sea_orm::ConnectOptions::new(url.to_owned());
        // A pooled in-memory SQLite would hand each connection its own
        // empty database.
        if url.starts_with("sqlite::memory:") {
            options.max_connections(1);
        }
        let db = Database::connect(options).await?;
        init_schema(&db).await?;
        Ok(Self {
            db,
            locks: Arc::new(RefLockManager::new()),
        })
    }

    /// In-memory store, for tests and ephemeral workspaces.
    pub async fn in_memory() -> Result<Self, CoreError> {
        Self::connect("sqlite::memory:").await
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn locks(&self) -> &Arc<RefLockManager> {
        &self.locks
    }

    /// Acquire the per-ref write lock with the storage contention bound.
    pub(crate) async fn lock_ref(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        lock_timeout_ms: u64,
    ) -> Result<RefGuard, CoreError> {
        self.locks
            .lock(project, ref_id, Duration::from_millis(lock_timeout_ms))
            .await
    }
}

async fn init_schema(db: &DatabaseConnection) -> Result<(), sea_orm::DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    macro_rules! create {
        ($entity:path) => {{
            let mut stmt = schema.create_table_from_entity($entity);
            stmt.if_not_exists();
            db.execute(backend.build(&stmt)).await?;
        }};
    }

    create!(entity::project::Entity);
    create!(entity::member::Entity);
    create!(entity::refs::Entity);
    create!(entity::commit::Entity);
    create!(entity::node::Entity);
    create!(entity::artefact::Entity);
    create!(entity::draft::Entity);
    create!(entity::commit_order::Entity);
    create!(entity::lease::Entity);
    create!(entity::prefs::Entity);
    create!(entity::star::Entity);
    Ok(())
}

// Shared query helpers. All take any connection so they compose inside
// transactions.

pub(crate) async fn require_member<C: ConnectionTrait>(
    conn: &C,
    project: &ProjectId,
    user: &UserId,
) -> Result<(), CoreError> {
    let found = entity::member::Entity::find_by_id((project.to_string(), user.to_string()))
        .one(conn)
        .await?;
    if found.is_none() {
        return Err(CoreError::NotAuthorized(format!(
            "user {user} is not a member of project {project}"
        )));
    }
    Ok(())
}

pub(crate) async fn load_project<C: ConnectionTrait>(
    conn: &C,
    project: &ProjectId,
) -> Result<entity::project::Model, CoreError> {
    entity::project::Entity::find_by_id(project.to_string())
        .one(conn)
        .await?
        .ok_or_else(|| CoreError::ProjectNotFound(project.to_string()))
}

pub(crate) async fn load_ref<C: ConnectionTrait>(
    conn: &C,
    project: &ProjectId,
    ref_id: &RefId,
) -> Result<entity::refs::Model, CoreError> {
    let found = entity::refs::Entity::find_by_id(ref_id.to_string())
        .filter(entity::refs::Column::ProjectId.eq(project.to_string()))
        .one(conn)
        .await?;
    found.ok_or_else(|| CoreError::RefNotFound(ref_id.to_string()))
}

pub(crate) fn ref_binding(model: &entity::refs::Model) -> Result<ProviderBinding, CoreError> {
    let provider: Provider = model
        .provider
        .parse()
        .map_err(|e: String| CoreError::Internal(e))?;
    Ok(ProviderBinding::new(provider, model.model.clone()))
}

/// Latest artefact of `kind` along the ref's commit order, if any.
pub(crate) async fn latest_artefact_on_ref<C: ConnectionTrait>(
    conn: &C,
    project: &ProjectId,
    ref_id: &RefId,
    kind: &str,
) -> Result<Option<entity::artefact::Model>, CoreError> {
    let found = entity::artefact::Entity::find()
        .join(
            JoinType::InnerJoin,
            entity::artefact::Relation::CommitOrder.def(),
        )
        .filter(entity::commit_order::Column::ProjectId.eq(project.to_string()))
        .filter(entity::commit_order::Column::RefId.eq(ref_id.to_string()))
        .filter(entity::artefact::Column::ProjectId.eq(project.to_string()))
        .filter(entity::artefact::Column::Kind.eq(kind))
        .order_by_desc(entity::commit_order::Column::Ordinal)
        .one(conn)
        .await?;
    Ok(found)
}

/// Latest node along the ref's commit order, if any. Used to thread the
/// `parent` navigation hint through appends.
pub(crate) async fn latest_node_on_ref<C: ConnectionTrait>(
    conn: &C,
    project: &ProjectId,
    ref_id: &RefId,
) -> Result<Option<entity::node::Model>, CoreError> {
    let found = entity::node::Entity::find()
        .join(
            JoinType::InnerJoin,
            entity::node::Relation::CommitOrder.def(),
        )
        .filter(entity::commit_order::Column::ProjectId.eq(project.to_string()))
        .filter(entity::commit_order::Column::RefId.eq(ref_id.to_string()))
        .filter(entity::node::Column::ProjectId.eq(project.to_string()))
        .order_by_desc(entity::commit_order::Column::Ordinal)
        .one(conn)
        .await?;
    Ok(found)
}

/// The non-expired lease row for a ref, if any.
pub(crate) async fn live_lease<C: ConnectionTrait>(
    conn: &C,
    project: &ProjectId,
    ref_id: &RefId,
) -> Result<Option<entity::lease::Model>, CoreError> {
    let found = entity::lease::Entity::find_by_id((project.to_string(), ref_id.to_string()))
        .one(conn)
        .await?;
    Ok(found.filter(|l| l.expires_at > now_ms()))
}

/// Reject a gated write when a different session holds a live lease.
/// Absent or expired leases do not gate; UI-mediated flows pass their
/// lease session here.
pub(crate) async fn ensure_writable<C: ConnectionTrait>(
    conn: &C,
    project: &ProjectId,
    ref_id: &RefId,
    session: Option<&SessionId>,
) -> Result<(), CoreError> {
    if let Some(lease) = live_lease(conn, project, ref_id).await? {
        let held_by_caller = session.is_some_and(|s| s.as_str() == lease.holder_session);
        if !held_by_caller {
            return Err(CoreError::LeaseHeld {
                holder_user: lease.holder_user,
                holder_session: lease.holder_session,
                expires_at: lease.expires_at,
            });
        }
    }
    Ok(())
}
