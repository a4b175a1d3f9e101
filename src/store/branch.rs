//! The branch engine: ref creation, renaming, deletion, and "ours"
//! merges.
//!
//! Branching never copies content. `create_ref_from_ref` aliases the
//! source's entire commit order; `create_ref_from_node` copies the prefix
//! ending at the parent of the named node, so a write on the new ref reads
//! as having answered differently at that point. An "ours" merge records
//! provenance only: a two-parent commit carrying a single merge node, with
//! the target's content untouched.

use std::collections::HashSet;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, JoinType, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait, Set, TransactionTrait,
};

use crate::errors::CoreError;
use crate::model::{
    now_ms, CommitId, MergeNode, NodeCommon, NodeId, NodePayload, ProjectId, Provider,
    ProviderBinding, RefId, SessionId, UserId, TRUNK_NAME,
};
use crate::store::{
    ensure_writable, entity, latest_node_on_ref, load_project, load_ref, ref_binding,
    require_member, Store,
};

/// Result of `create_ref_from_node`.
#[derive(Debug, Clone)]
pub struct BranchFromNodeOutcome {
    pub ref_id: RefId,
    /// Commit the new ref starts from, absent when the node was first on
    /// its ref.
    pub base_commit_id: Option<CommitId>,
    /// Ordinal of the base commit on the source ref, or -1.
    pub base_ordinal: i64,
}

/// Caller-tunable pieces of an "ours" merge.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Carry the source's last assistant content into the merge node.
    pub include_assistant: bool,
    /// Attach a canvas diff (source vs. target) to the merge node.
    pub include_canvas_diff: bool,
    pub message: Option<String>,
}

/// Result of `merge_ours`.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub commit_id: CommitId,
    pub node_id: NodeId,
    pub ordinal: i64,
}

/// Provider/model inheritance for a new branch: a caller provider matching
/// the source keeps the source's model unless overridden; a different
/// provider falls back to the caller's model or the provider default.
fn resolve_binding(
    source: &ProviderBinding,
    provider: Option<Provider>,
    model: Option<String>,
) -> ProviderBinding {
    match provider {
        None => ProviderBinding::new(source.provider, model.unwrap_or_else(|| source.model.clone())),
        Some(p) if p == source.provider => {
            ProviderBinding::new(p, model.unwrap_or_else(|| source.model.clone()))
        }
        Some(p) => match model {
            Some(m) => ProviderBinding::new(p, m),
            None => ProviderBinding::with_default_model(p),
        },
    }
}

/// `previous_response_id` crosses a branch point only when both sides are
/// the responses-capable provider and there is a response id to inherit.
fn propagate_response_id(
    source_provider: Provider,
    new_provider: Provider,
    inherited: Option<String>,
) -> Option<String> {
    if source_provider.is_responses_capable() && new_provider.is_responses_capable() {
        inherited
    } else {
        None
    }
}

async fn ensure_name_free<C: sea_orm::ConnectionTrait>(
    conn: &C,
    project: &ProjectId,
    name: &str,
) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::invalid("ref name must not be empty"));
    }
    let clash = entity::refs::Entity::find()
        .filter(entity::refs::Column::ProjectId.eq(project.to_string()))
        .filter(entity::refs::Column::Name.eq(name))
        .one(conn)
        .await?;
    if clash.is_some() {
        return Err(CoreError::Conflict(format!(
            "ref name `{name}` already exists in project {project}"
        )));
    }
    Ok(())
}

impl Store {
    /// Fork the source ref's current head: the new ref shares the entire
    /// commit-order prefix and diverges on its next append.
    pub async fn create_ref_from_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
        source_ref: &RefId,
        new_name: &str,
        provider: Option<Provider>,
        model: Option<String>,
        previous_response_id: Option<String>,
    ) -> Result<RefId, CoreError> {
        let txn = self.db.begin().await?;
        require_member(&txn, project, user).await?;
        let source = load_ref(&txn, project, source_ref).await?;
        ensure_name_free(&txn, project, new_name).await?;

        let source_binding = ref_binding(&source)?;
        let binding = resolve_binding(&source_binding, provider, model);
        let inherited = previous_response_id.or_else(|| source.previous_response_id.clone());
        let response_id =
            propagate_response_id(source_binding.provider, binding.provider, inherited);

        let new_ref_id = RefId::new();
        entity::refs::ActiveModel {
            id: Set(new_ref_id.to_string()),
            project_id: Set(project.to_string()),
            name: Set(new_name.to_string()),
            tip_commit_id: Set(source.tip_commit_id.clone()),
            tip_ordinal: Set(source.tip_ordinal),
            provider: Set(binding.provider.as_str().to_string()),
            model: Set(binding.model),
            previous_response_id: Set(response_id),
            created_at: Set(now_ms()),
        }
        .insert(&txn)
        .await?;

        copy_commit_order_prefix(&txn, project, source_ref, &new_ref_id, i64::MAX).await?;
        txn.commit().await?;
        tracing::debug!("forked {} from tip of {}", new_ref_id, source_ref);
        Ok(new_ref_id)
    }

    /// Branch from the parent of `node_id` on the source ref: the "edit an
    /// earlier message" flow. Branching from the first node yields an
    /// empty ref.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_ref_from_node(
        &self,
        project: &ProjectId,
        user: &UserId,
        source_ref: &RefId,
        new_name: &str,
        node_id: &NodeId,
        provider: Option<Provider>,
        model: Option<String>,
        previous_response_id: Option<String>,
    ) -> Result<BranchFromNodeOutcome, CoreError> {
        let txn = self.db.begin().await?;
        require_member(&txn, project, user).await?;
        let source = load_ref(&txn, project, source_ref).await?;
        ensure_name_free(&txn, project, new_name).await?;

        let node = entity::node::Entity::find_by_id(node_id.to_string())
            .filter(entity::node::Column::ProjectId.eq(project.to_string()))
            .one(&txn)
            .await?
            .ok_or_else(|| CoreError::NodeNotFound(node_id.to_string()))?;

        // Ordinal of the commit that introduced the node, on the source ref.
        let order_row = entity::commit_order::Entity::find()
            .filter(entity::commit_order::Column::ProjectId.eq(project.to_string()))
            .filter(entity::commit_order::Column::RefId.eq(source_ref.to_string()))
            .filter(entity::commit_order::Column::CommitId.eq(node.commit_id.clone()))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                CoreError::invalid(format!(
                    "node {node_id} is not on ref {source_ref}"
                ))
            })?;
        let base_ordinal = order_row.ordinal - 1;

        let base_commit_id = if base_ordinal >= 0 {
            let base_row = entity::commit_order::Entity::find_by_id((
                project.to_string(),
                source_ref.to_string(),
                base_ordinal,
            ))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                CoreError::internal(format!(
                    "commit order gap at ordinal {base_ordinal} on {source_ref}"
                ))
            })?;
            Some(CommitId::from(base_row.commit_id))
        } else {
            None
        };

        let source_binding = ref_binding(&source)?;
        let binding = resolve_binding(&source_binding, provider, model);
        // The lineage being inherited is the copied prefix: its newest
        // assistant response id, when one exists.
        let inherited = match previous_response_id {
            Some(explicit) => Some(explicit),
            None => latest_response_id_up_to(&txn, project, source_ref, base_ordinal).await?,
        };
        let response_id =
            propagate_response_id(source_binding.provider, binding.provider, inherited);

        let new_ref_id = RefId::new();
        entity::refs::ActiveModel {
            id: Set(new_ref_id.to_string()),
            project_id: Set(project.to_string()),
            name: Set(new_name.to_string()),
            tip_commit_id: Set(base_commit_id.as_ref().map(|c| c.to_string())),
            tip_ordinal: Set(base_ordinal),
            provider: Set(binding.provider.as_str().to_string()),
            model: Set(binding.model),
            previous_response_id: Set(response_id),
            created_at: Set(now_ms()),
        }
        .insert(&txn)
        .await?;

        copy_commit_order_prefix(&txn, project, source_ref, &new_ref_id, base_ordinal).await?;
        txn.commit().await?;
        tracing::debug!(
            "branched {} from {} at base ordinal {}",
            new_ref_id,
            source_ref,
            base_ordinal
        );
        Ok(BranchFromNodeOutcome {
            ref_id: new_ref_id,
            base_commit_id,
            base_ordinal,
        })
    }

    /// Structural "ours" merge: a two-parent commit carrying one merge
    /// node. Target content is unchanged; no artefact row is written even
    /// when the source canvas differs.
    #[allow(clippy::too_many_arguments)]
    pub async fn merge_ours(
        &self,
        project: &ProjectId,
        user: &UserId,
        session: Option<&SessionId>,
        target_ref: &RefId,
        source_ref: &RefId,
        summary: &str,
        opts: MergeOptions,
        lock_timeout_ms: u64,
    ) -> Result<MergeOutcome, CoreError> {
        if target_ref == source_ref {
            return Err(CoreError::invalid("cannot merge a ref into itself"));
        }
        let _guard = self.lock_ref(project, target_ref, lock_timeout_ms).await?;
        let txn = self.db.begin().await?;

        require_member(&txn, project, user).await?;
        let target = load_ref(&txn, project, target_ref).await?;
        let source = load_ref(&txn, project, source_ref).await?;
        ensure_writable(&txn, project, target_ref, session).await?;

        let source_tip = source.tip_commit_id.clone().ok_or_else(|| {
            CoreError::invalid(format!("source ref {source_ref} has no commits to merge"))
        })?;

        // Source-exclusive nodes since divergence: walk the source's
        // commit order backwards until a commit shared with the target.
        let target_commits: HashSet<String> = entity::commit_order::Entity::find()
            .filter(entity::commit_order::Column::ProjectId.eq(project.to_string()))
            .filter(entity::commit_order::Column::RefId.eq(target_ref.to_string()))
            .all(&txn)
            .await?
            .into_iter()
            .map(|r| r.commit_id)
            .collect();
        let source_order = entity::commit_order::Entity::find()
            .filter(entity::commit_order::Column::ProjectId.eq(project.to_string()))
            .filter(entity::commit_order::Column::RefId.eq(source_ref.to_string()))
            .order_by_desc(entity::commit_order::Column::Ordinal)
            .all(&txn)
            .await?;
        let mut exclusive_commits: Vec<String> = Vec::new();
        for row in source_order {
            if target_commits.contains(&row.commit_id) {
                break;
            }
            exclusive_commits.push(row.commit_id);
        }
        exclusive_commits.reverse();

        let mut source_node_ids: Vec<NodeId> = Vec::new();
        let mut merged_assistant: Option<(NodeId, String)> = None;
        if !exclusive_commits.is_empty() {
            let nodes = entity::node::Entity::find()
                .filter(entity::node::Column::ProjectId.eq(project.to_string()))
                .filter(entity::node::Column::CommitId.is_in(exclusive_commits.clone()))
                .all(&txn)
                .await?;
            // Commit order is the authoritative ordering, not insert order.
            let index: std::collections::HashMap<&str, usize> = exclusive_commits
                .iter()
                .enumerate()
                .map(|(i, c)| (c.as_str(), i))
                .collect();
            let mut nodes = nodes;
            nodes.sort_by_key(|n| index.get(n.commit_id.as_str()).copied().unwrap_or(usize::MAX));
            for node in &nodes {
                source_node_ids.push(NodeId::from(node.id.as_str()));
                if opts.include_assistant && node.role.as_deref() == Some("assistant") {
                    let payload: NodePayload = serde_json::from_str(&node.payload)?;
                    if let Some(m) = payload.as_message() {
                        merged_assistant = Some((NodeId::from(node.id.as_str()), m.content.clone()));
                    }
                }
            }
        }

        let canvas_diff = if opts.include_canvas_diff {
            let target_canvas = crate::store::latest_artefact_on_ref(
                &txn,
                project,
                target_ref,
                crate::model::CANVAS_KIND,
            )
            .await?;
            let source_canvas = crate::store::latest_artefact_on_ref(
                &txn,
                project,
                source_ref,
                crate::model::CANVAS_KIND,
            )
            .await?;
            let target_content = target_canvas.map(|a| a.content).unwrap_or_default();
            let source_content = source_canvas.map(|a| a.content).unwrap_or_default();
            crate::diff::unified_canvas_diff(
                &target.name,
                &source.name,
                &target_content,
                &source_content,
            )
        } else {
            None
        };

        let new_ordinal = target.tip_ordinal + 1;
        let commit_id = CommitId::new();
        let now = now_ms();

        entity::commit::ActiveModel {
            id: Set(commit_id.to_string()),
            project_id: Set(project.to_string()),
            parent1: Set(target.tip_commit_id.clone()),
            parent2: Set(Some(source_tip.clone())),
            message: Set(opts
                .message
                .unwrap_or_else(|| format!("merge {} (ours)", source.name))),
            author: Set(user.to_string()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let parent_node = latest_node_on_ref(&txn, project, target_ref).await?;
        let node_id = NodeId::new();
        let payload = NodePayload::Merge(MergeNode {
            common: NodeCommon {
                id: node_id.clone(),
                timestamp: now,
                parent: parent_node.as_ref().map(|n| NodeId::from(n.id.as_str())),
            },
            merge_from: source.name.clone(),
            merge_summary: summary.to_string(),
            source_commit: CommitId::from(source_tip.as_str()),
            source_node_ids,
            merged_assistant_node_id: merged_assistant.as_ref().map(|(id, _)| id.clone()),
            merged_assistant_content: merged_assistant.map(|(_, content)| content),
            canvas_diff,
        });
        entity::node::ActiveModel {
            id: Set(node_id.to_string()),
            project_id: Set(project.to_string()),
            commit_id: Set(commit_id.to_string()),
            created_on_ref_id: Set(target_ref.to_string()),
            merge_from_ref_id: Set(Some(source_ref.to_string())),
            kind: Set("merge".to_string()),
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
            ref_id: Set(target_ref.to_string()),
            ordinal: Set(new_ordinal),
            commit_id: Set(commit_id.to_string()),
        }
        .insert(&txn)
        .await?;

        let mut target_active: entity::refs::ActiveModel = target.into();
        target_active.tip_commit_id = Set(Some(commit_id.to_string()));
        target_active.tip_ordinal = Set(new_ordinal);
        target_active.update(&txn).await?;

        txn.commit().await?;
        tracing::debug!(
            "merged {} into {} at ordinal {}",
            source_ref,
            target_ref,
            new_ordinal
        );
        Ok(MergeOutcome {
            commit_id,
            node_id,
            ordinal: new_ordinal,
        })
    }

    /// Rename a non-trunk ref. The trunk keeps its name; nothing may take
    /// the trunk's name.
    pub async fn rename_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
        ref_id: &RefId,
        new_name: &str,
    ) -> Result<(), CoreError> {
        let txn = self.db.begin().await?;
        require_member(&txn, project, user).await?;
        let row = load_ref(&txn, project, ref_id).await?;
        if row.name == TRUNK_NAME {
            return Err(CoreError::invalid("the trunk cannot be renamed"));
        }
        if new_name == TRUNK_NAME {
            return Err(CoreError::Conflict(format!(
                "`{TRUNK_NAME}` is reserved for the trunk"
            )));
        }
        ensure_name_free(&txn, project, new_name).await?;
        let mut active: entity::refs::ActiveModel = row.into();
        active.name = Set(new_name.to_string());
        active.update(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Delete a non-trunk, non-pinned ref along with its commit-order
    /// rows, drafts, and lease. Commits and nodes stay; other refs may
    /// still reach them.
    pub async fn delete_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
        ref_id: &RefId,
    ) -> Result<(), CoreError> {
        let txn = self.db.begin().await?;
        require_member(&txn, project, user).await?;
        let row = load_ref(&txn, project, ref_id).await?;
        if row.name == TRUNK_NAME {
            return Err(CoreError::invalid("the trunk cannot be deleted"));
        }
        let project_row = load_project(&txn, project).await?;
        if project_row.pinned_ref_id.as_deref() == Some(ref_id.as_str()) {
            return Err(CoreError::invalid("a pinned ref cannot be deleted"));
        }
        entity::commit_order::Entity::delete_many()
            .filter(entity::commit_order::Column::ProjectId.eq(project.to_string()))
            .filter(entity::commit_order::Column::RefId.eq(ref_id.to_string()))
            .exec(&txn)
            .await?;
        entity::draft::Entity::delete_many()
            .filter(entity::draft::Column::ProjectId.eq(project.to_string()))
            .filter(entity::draft::Column::RefId.eq(ref_id.to_string()))
            .exec(&txn)
            .await?;
        entity::lease::Entity::delete_many()
            .filter(entity::lease::Column::ProjectId.eq(project.to_string()))
            .filter(entity::lease::Column::RefId.eq(ref_id.to_string()))
            .exec(&txn)
            .await?;
        entity::prefs::Entity::delete_many()
            .filter(entity::prefs::Column::ProjectId.eq(project.to_string()))
            .filter(entity::prefs::Column::CurrentRefId.eq(ref_id.to_string()))
            .exec(&txn)
            .await?;
        entity::refs::Entity::delete_by_id(ref_id.to_string())
            .exec(&txn)
            .await?;
        txn.commit().await?;
        tracing::debug!("deleted ref {}", ref_id);
        Ok(())
    }

    /// Re-bind a ref to a different provider/model, e.g. from the model
    /// picker before a turn. Follows the branch-creation inheritance
    /// rules; `previous_response_id` survives only when both the old and
    /// new binding are responses-capable.
    pub async fn rebind_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
        ref_id: &RefId,
        provider: Provider,
        model: Option<String>,
    ) -> Result<ProviderBinding, CoreError> {
        let txn = self.db.begin().await?;
        require_member(&txn, project, user).await?;
        let row = load_ref(&txn, project, ref_id).await?;
        let old_binding = ref_binding(&row)?;
        let binding = resolve_binding(&old_binding, Some(provider), model);
        let response_id = propagate_response_id(
            old_binding.provider,
            binding.provider,
            row.previous_response_id.clone(),
        );
        let mut active: entity::refs::ActiveModel = row.into();
        active.provider = Set(binding.provider.as_str().to_string());
        active.model = Set(binding.model.clone());
        active.previous_response_id = Set(response_id);
        active.update(&txn).await?;
        txn.commit().await?;
        tracing::debug!("rebound {} to {}/{}", ref_id, binding.provider, binding.model);
        Ok(binding)
    }

    /// Update the branch-locked `previous_response_id`. Only the stream
    /// coordinator calls this, under its lease.
    pub(crate) async fn set_previous_response_id(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        response_id: Option<String>,
    ) -> Result<(), CoreError> {
        let txn = self.db.begin().await?;
        let row = load_ref(&txn, project, ref_id).await?;
        let mut active: entity::refs::ActiveModel = row.into();
        active.previous_response_id = Set(response_id);
        active.update(&txn).await?;
        txn.commit().await?;
        Ok(())
    }
}

/// Copy the source ref's commit-order rows with `ordinal <= max_ordinal`
/// into the new ref, preserving ordinals and commit ids.
async fn copy_commit_order_prefix<C: sea_orm::ConnectionTrait>(
    conn: &C,
    project: &ProjectId,
    source_ref: &RefId,
    new_ref: &RefId,
    max_ordinal: i64,
) -> Result<(), CoreError> {
    let rows = entity::commit_order::Entity::find()
        .filter(entity::commit_order::Column::ProjectId.eq(project.to_string()))
        .filter(entity::commit_order::Column::RefId.eq(source_ref.to_string()))
        .filter(entity::commit_order::Column::Ordinal.lte(max_ordinal))
        .order_by_asc(entity::commit_order::Column::Ordinal)
        .all(conn)
        .await?;
    if rows.is_empty() {
        return Ok(());
    }
    let copies: Vec<entity::commit_order::ActiveModel> = rows
        .into_iter()
        .map(|r| entity::commit_order::ActiveModel {
            project_id: Set(r.project_id),
            ref_id: Set(new_ref.to_string()),
            ordinal: Set(r.ordinal),
            commit_id: Set(r.commit_id),
        })
        .collect();
    entity::commit_order::Entity::insert_many(copies)
        .exec(conn)
        .await?;
    Ok(())
}

/// Newest assistant response id on the source prefix `ordinal <=
/// max_ordinal`, if any.
async fn latest_response_id_up_to<C: sea_orm::ConnectionTrait>(
    conn: &C,
    project: &ProjectId,
    source_ref: &RefId,
    max_ordinal: i64,
) -> Result<Option<String>, CoreError> {
    if max_ordinal < 0 {
        return Ok(None);
    }
    let found = entity::node::Entity::find()
        .join(
            JoinType::InnerJoin,
            entity::node::Relation::CommitOrder.def(),
        )
        .filter(entity::commit_order::Column::ProjectId.eq(project.to_string()))
        .filter(entity::commit_order::Column::RefId.eq(source_ref.to_string()))
        .filter(entity::commit_order::Column::Ordinal.lte(max_ordinal))
        .filter(entity::node::Column::ProjectId.eq(project.to_string()))
        .filter(entity::node::Column::ResponseId.is_not_null())
        .order_by_desc(entity::commit_order::Column::Ordinal)
        .one(conn)
        .await?;
    Ok(found.and_then(|n| n.response_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(provider: Provider, model: &str) -> ProviderBinding {
        ProviderBinding::new(provider, model)
    }

    #[test]
    fn test_same_provider_inherits_model() {
        let source = binding(Provider::Anthropic, "claude-opus-4-1");
        let out = resolve_binding(&source, Some(Provider::Anthropic), None);
        assert_eq!(out.model, "claude-opus-4-1");
    }

    #[test]
    fn test_provider_switch_uses_default_model() {
        let source = binding(Provider::Anthropic, "claude-opus-4-1");
        let out = resolve_binding(&source, Some(Provider::Gemini), None);
        assert_eq!(out.model, Provider::Gemini.default_model());
    }

    #[test]
    fn test_no_provider_inherits_everything() {
        let source = binding(Provider::OpenaiResponses, "gpt-5");
        let out = resolve_binding(&source, None, None);
        assert_eq!(out, source);
    }

    #[test]
    fn test_response_id_requires_responses_capable_both_sides() {
        let id = Some("resp-1".to_string());
        assert_eq!(
            propagate_response_id(Provider::OpenaiResponses, Provider::OpenaiResponses, id.clone()),
            id
        );
        assert_eq!(
            propagate_response_id(Provider::OpenaiResponses, Provider::Anthropic, id.clone()),
            None
        );
        assert_eq!(
            propagate_response_id(Provider::OpenaiChat, Provider::OpenaiResponses, id),
            None
        );
    }
}
