//! The append engine: atomically attach one node to a ref.
//!
//! A single transaction allocates the next ordinal, inserts the commit
//! with the current tip as parent, inserts the node, optionally promotes
//! the caller's canvas draft onto the same commit, appends the
//! commit-order row, and advances the tip. Binding draft promotion to the
//! turn's commit keeps node-to-artefact correspondence 1:1 per ref, so a
//! reader can reconstruct the canvas visible at any node by walking the
//! commit order backwards to the latest artefact hit.

use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};

use crate::errors::CoreError;
use crate::model::{
    now_ms, ArtefactId, CommitId, NodeId, NodePayload, ProjectId, RefId, SessionId, UserId,
    CANVAS_KIND,
};
use crate::store::{
    ensure_writable, entity, latest_artefact_on_ref, latest_node_on_ref, load_ref, require_member,
    Store,
};

/// Parameters for [`Store::append_node`].
pub struct AppendNode<'a> {
    pub project: &'a ProjectId,
    pub ref_id: &'a RefId,
    pub user: &'a UserId,
    /// Lease session for gated flows; `None` relies on the lease being
    /// absent.
    pub session: Option<&'a SessionId>,
    /// Node payload with a pre-allocated id. The engine threads the
    /// `parent` hint itself.
    pub payload: NodePayload,
    /// Commit message; defaults to the node kind.
    pub message: Option<String>,
    /// Promote the caller's canvas draft onto this commit when its hash
    /// differs from the latest artefact on the ref.
    pub attach_draft: bool,
    /// Skip the lease gate. Only the stream coordinator's preempted
    /// assistant write uses this; the node then carries `interrupted`.
    pub enforce_lease: bool,
    pub lock_timeout_ms: u64,
}

/// Result of a successful append.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub commit_id: CommitId,
    pub node_id: NodeId,
    pub ordinal: i64,
    /// Present when a draft was promoted: `(artefact_id, content_hash)`.
    pub artefact: Option<(ArtefactId, String)>,
}

impl Store {
    /// Append a node to a ref. See module docs for the transaction shape.
    pub async fn append_node(&self, req: AppendNode<'_>) -> Result<AppendOutcome, CoreError> {
        let _guard = self
            .lock_ref(req.project, req.ref_id, req.lock_timeout_ms)
            .await?;
        let txn = self.db.begin().await?;

        require_member(&txn, req.project, req.user).await?;
        let ref_row = load_ref(&txn, req.project, req.ref_id).await?;
        if req.enforce_lease {
            ensure_writable(&txn, req.project, req.ref_id, req.session).await?;
        }

        let new_ordinal = ref_row.tip_ordinal + 1;
        let commit_id = CommitId::new();
        let now = now_ms();

        entity::commit::ActiveModel {
            id: Set(commit_id.to_string()),
            project_id: Set(req.project.to_string()),
            parent1: Set(ref_row.tip_commit_id.clone()),
            parent2: Set(None),
            message: Set(req
                .message
                .unwrap_or_else(|| req.payload.kind().as_str().to_string())),
            author: Set(req.user.to_string()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        // Thread the previous node through as the navigation hint.
        let mut payload = req.payload;
        let parent_node = latest_node_on_ref(&txn, req.project, req.ref_id).await?;
        match &mut payload {
            NodePayload::Message(m) => m.common.parent = parent_node.as_ref().map(|n| n.id.as_str().into()),
            NodePayload::State(s) => s.common.parent = parent_node.as_ref().map(|n| n.id.as_str().into()),
            NodePayload::Merge(m) => m.common.parent = parent_node.as_ref().map(|n| n.id.as_str().into()),
        }
        let node_id = payload.id().clone();

        // Merge nodes are written by the branch engine's own transaction;
        // anything coming through here has no merge source.
        entity::node::ActiveModel {
            id: Set(node_id.to_string()),
            project_id: Set(req.project.to_string()),
            commit_id: Set(commit_id.to_string()),
            created_on_ref_id: Set(req.ref_id.to_string()),
            merge_from_ref_id: Set(None),
            kind: Set(payload.kind().as_str().to_string()),
            role: Set(payload.role().map(|r| r.as_str().to_string())),
            response_id: Set(payload.response_id().map(str::to_owned)),
            payload: Set(serde_json::to_string(&payload)?),
            created_by: Set(req.user.to_string()),
            timestamp: Set(payload.common().timestamp),
        }
        .insert(&txn)
        .await?;

        let mut artefact = None;
        if req.attach_draft {
            let draft = entity::draft::Entity::find_by_id((
                req.project.to_string(),
                req.ref_id.to_string(),
                req.user.to_string(),
            ))
            .one(&txn)
            .await?;
            if let Some(draft) = draft {
                let latest =
                    latest_artefact_on_ref(&txn, req.project, req.ref_id, CANVAS_KIND).await?;
                let unchanged = latest.is_some_and(|a| a.content_hash == draft.content_hash);
                if !unchanged {
                    let artefact_id = ArtefactId::new();
                    entity::artefact::ActiveModel {
                        project_id: Set(req.project.to_string()),
                        commit_id: Set(commit_id.to_string()),
                        kind: Set(CANVAS_KIND.to_string()),
                        id: Set(artefact_id.to_string()),
                        content: Set(draft.content),
                        content_hash: Set(draft.content_hash.clone()),
                        origin_ref_id: Set(req.ref_id.to_string()),
                        created_at: Set(now),
                    }
                    .insert(&txn)
                    .await?;
                    artefact = Some((artefact_id, draft.content_hash));
                }
            }
        }

        entity::commit_order::ActiveModel {
            project_id: Set(req.project.to_string()),
            ref_id: Set(req.ref_id.to_string()),
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
        tracing::debug!(
            "appended {} node {} at ordinal {} on {}",
            payload.kind(),
            node_id,
            new_ordinal,
            req.ref_id
        );
        Ok(AppendOutcome {
            commit_id,
            node_id,
            ordinal: new_ordinal,
            artefact,
        })
    }
}
