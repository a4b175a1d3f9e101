//! The canvas engine: mutable per-user drafts and the immutable artefact
//! chain.
//!
//! Drafts are editor state, keyed by `(project, ref, user)`, and never
//! enter history. Artefacts enter history two ways: implicit promotion of
//! a changed draft inside a turn's append (no state node), or an explicit
//! save here, which commits an artefact plus a `state` node whose snapshot
//! is the content hash. Direct saves are allowed only on the trunk;
//! branches receive canvas changes through turn-bound promotion or merges.

use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use sea_orm::sea_query::OnConflict;

use crate::errors::CoreError;
use crate::hash::content_hash;
use crate::model::{
    now_ms, ArtefactId, CommitId, NodeCommon, NodeId, NodePayload, ProjectId, RefId, SessionId,
    StateNode, UserId, CANVAS_KIND, TRUNK_NAME,
};
use crate::store::{
    ensure_writable, entity, latest_artefact_on_ref, latest_node_on_ref, load_ref, require_member,
    Store,
};

/// Where the returned canvas content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanvasSource {
    Draft,
    Artefact,
    Empty,
}

/// The canvas visible to one user on one ref.
#[derive(Debug, Clone)]
pub struct CanvasView {
    pub content: String,
    pub hash: Option<String>,
    pub updated_at: Option<i64>,
    pub source: CanvasSource,
}

/// Result of a draft upsert.
#[derive(Debug, Clone)]
pub struct DraftState {
    pub content_hash: String,
    pub updated_at: i64,
}

/// Result of an explicit canvas save.
#[derive(Debug, Clone)]
pub struct ArtefactSaveOutcome {
    pub commit_id: CommitId,
    pub artefact_id: ArtefactId,
    pub state_node_id: Option<NodeId>,
    pub ordinal: i64,
    pub content_hash: String,
}

impl Store {
    /// Upsert the caller's draft. No commit; saving identical content
    /// twice yields the same hash and no history.
    pub async fn save_draft(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        user: &UserId,
        content: &str,
    ) -> Result<DraftState, CoreError> {
        let txn = self.db.begin().await?;
        require_member(&txn, project, user).await?;
        load_ref(&txn, project, ref_id).await?;
        let hash = content_hash(content);
        let now = now_ms();
        entity::draft::Entity::insert(entity::draft::ActiveModel {
            project_id: Set(project.to_string()),
            ref_id: Set(ref_id.to_string()),
            user_id: Set(user.to_string()),
            content: Set(content.to_string()),
            content_hash: Set(hash.clone()),
            updated_at: Set(now),
        })
        .on_conflict(
            OnConflict::columns([
                entity::draft::Column::ProjectId,
                entity::draft::Column::RefId,
                entity::draft::Column::UserId,
            ])
            .update_columns([
                entity::draft::Column::Content,
                entity::draft::Column::ContentHash,
                entity::draft::Column::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec(&txn)
        .await?;
        txn.commit().await?;
        Ok(DraftState {
            content_hash: hash,
            updated_at: now,
        })
    }

    /// Remove the caller's draft, if any.
    pub async fn delete_draft(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        user: &UserId,
    ) -> Result<(), CoreError> {
        require_member(&self.db, project, user).await?;
        entity::draft::Entity::delete_by_id((
            project.to_string(),
            ref_id.to_string(),
            user.to_string(),
        ))
        .exec(&self.db)
        .await?;
        Ok(())
    }

    /// The canvas visible to `user` on `ref`: the user's draft if present,
    /// else the most recent artefact along the ref's commit order, else
    /// empty.
    pub async fn get_canvas(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        user: &UserId,
    ) -> Result<CanvasView, CoreError> {
        require_member(&self.db, project, user).await?;
        load_ref(&self.db, project, ref_id).await?;

        let draft = entity::draft::Entity::find_by_id((
            project.to_string(),
            ref_id.to_string(),
            user.to_string(),
        ))
        .one(&self.db)
        .await?;
        if let Some(draft) = draft {
            return Ok(CanvasView {
                content: draft.content,
                hash: Some(draft.content_hash),
                updated_at: Some(draft.updated_at),
                source: CanvasSource::Draft,
            });
        }

        if let Some(artefact) =
            latest_artefact_on_ref(&self.db, project, ref_id, CANVAS_KIND).await?
        {
            return Ok(CanvasView {
                content: artefact.content,
                hash: Some(artefact.content_hash),
                updated_at: Some(artefact.created_at),
                source: CanvasSource::Artefact,
            });
        }

        Ok(CanvasView {
            content: String::new(),
            hash: None,
            updated_at: None,
            source: CanvasSource::Empty,
        })
    }

    /// Explicit canvas save: one transaction inserting a new commit, an
    /// artefact row, a `state` node whose snapshot is the content hash,
    /// the commit-order row, and the tip advance. Trunk only.
    pub async fn update_artefact(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        user: &UserId,
        session: Option<&SessionId>,
        content: &str,
        message: Option<String>,
        lock_timeout_ms: u64,
    ) -> Result<ArtefactSaveOutcome, CoreError> {
        let _guard = self.lock_ref(project, ref_id, lock_timeout_ms).await?;
        let txn = self.db.begin().await?;

        require_member(&txn, project, user).await?;
        let ref_row = load_ref(&txn, project, ref_id).await?;
        if ref_row.name != TRUNK_NAME {
            return Err(CoreError::invalid(format!(
                "direct canvas saves are allowed only on `{TRUNK_NAME}`, not `{}`",
                ref_row.name
            )));
        }
        ensure_writable(&txn, project, ref_id, session).await?;

        let new_ordinal = ref_row.tip_ordinal + 1;
        let commit_id = CommitId::new();
        let hash = content_hash(content);
        let now = now_ms();

        entity::commit::ActiveModel {
            id: Set(commit_id.to_string()),
            project_id: Set(project.to_string()),
            parent1: Set(ref_row.tip_commit_id.clone()),
            parent2: Set(None),
            message: Set(message.unwrap_or_else(|| "canvas save".to_string())),
            author: Set(user.to_string()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let artefact_id = ArtefactId::new();
        entity::artefact::ActiveModel {
            project_id: Set(project.to_string()),
            commit_id: Set(commit_id.to_string()),
            kind: Set(CANVAS_KIND.to_string()),
            id: Set(artefact_id.to_string()),
            content: Set(content.to_string()),
            content_hash: Set(hash.clone()),
            origin_ref_id: Set(ref_id.to_string()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let parent_node = latest_node_on_ref(&txn, project, ref_id).await?;
        let node_id = NodeId::new();
        let payload = NodePayload::State(StateNode {
            common: NodeCommon {
                id: node_id.clone(),
                timestamp: now,
                parent: parent_node.as_ref().map(|n| NodeId::from(n.id.as_str())),
            },
            artefact_snapshot: hash.clone(),
        });
        entity::node::ActiveModel {
            id: Set(node_id.to_string()),
            project_id: Set(project.to_string()),
            commit_id: Set(commit_id.to_string()),
            created_on_ref_id: Set(ref_id.to_string()),
            merge_from_ref_id: Set(None),
            kind: Set("state".to_string()),
            role: Set(None),
            response_id: Set(None),
            payload: Set(serde_json::to_string(&payload)?),
            created_by: Set(user.to_string()),
            timestamp: Set(now),
        }
        .insert(&txn)
        .await?;

        entity::commit_order::ActiveModel {
            project_id: Set(project.to_string()),
            ref_id: Set(ref_id.to_string()),
            ordinal: Set(new_ordinal),
            commit_id: Set(commit_id.to_string()),
        }
        .insert(&txn)
        .await?;

        let mut ref_active: entity::refs::ActiveModel = ref_row.into();
        ref_active.tip_commit_id = Set(Some(commit_id.to_string()));
        ref_active.tip_ordinal = Set(new_ordinal);
        ref_active.update(&txn).await?;

        txn.commit().await?;
        tracing::debug!("canvas save on {} at ordinal {}", ref_id, new_ordinal);
        Ok(ArtefactSaveOutcome {
            commit_id,
            artefact_id,
            state_node_id: Some(node_id),
            ordinal: new_ordinal,
            content_hash: hash,
        })
    }
}
