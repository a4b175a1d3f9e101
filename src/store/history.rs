//! Read-side projections: ordinal-keyed history pages, typed tails for
//! the context builder, and ref listings.

use std::collections::{HashMap, HashSet};

use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, JoinType, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait,
};

use crate::errors::CoreError;
use crate::model::{CommitId, NodePayload, ProjectId, ProviderBinding, RefId, UserId, TRUNK_NAME};
use crate::store::{entity, load_project, load_ref, ref_binding, require_member, Store};

/// One history row: the node in its wire shape plus derived branch names.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub ordinal: i64,
    /// Node JSON with `createdOnBranch` injected; `rawResponse` stripped
    /// unless raw payloads were requested.
    pub node: serde_json::Value,
    pub created_on_ref: String,
    pub merge_from_ref: Option<String>,
}

/// A page of history, ascending by ordinal.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
}

/// Typed node for context assembly, raw payload included.
#[derive(Debug, Clone)]
pub struct TailNode {
    pub ordinal: i64,
    pub payload: NodePayload,
    pub created_on_ref_id: RefId,
}

/// Per-ref projection for clients.
#[derive(Debug, Clone)]
pub struct RefSummary {
    pub id: RefId,
    pub name: String,
    pub tip_commit_id: Option<CommitId>,
    pub tip_ordinal: i64,
    /// `tip_ordinal + 1`: the number of commits on the ref.
    pub node_count: i64,
    pub is_trunk: bool,
    pub is_pinned: bool,
    pub binding: ProviderBinding,
    pub previous_response_id: Option<String>,
}

impl Store {
    /// Ordinal-keyed history paging: the newest `limit` entries older than
    /// `before_ordinal` (when given), returned ascending.
    pub async fn get_history(
        &self,
        project: &ProjectId,
        user: &UserId,
        ref_id: &RefId,
        limit: u64,
        before_ordinal: Option<i64>,
        include_raw_response: bool,
    ) -> Result<HistoryPage, CoreError> {
        require_member(&self.db, project, user).await?;
        load_ref(&self.db, project, ref_id).await?;

        let mut query = entity::commit_order::Entity::find()
            .filter(entity::commit_order::Column::ProjectId.eq(project.to_string()))
            .filter(entity::commit_order::Column::RefId.eq(ref_id.to_string()));
        if let Some(before) = before_ordinal {
            query = query.filter(entity::commit_order::Column::Ordinal.lt(before));
        }
        let mut order_rows = query
            .order_by_desc(entity::commit_order::Column::Ordinal)
            .limit(limit)
            .all(&self.db)
            .await?;
        order_rows.reverse();
        if order_rows.is_empty() {
            return Ok(HistoryPage::default());
        }

        let commit_ids: Vec<String> = order_rows.iter().map(|r| r.commit_id.clone()).collect();
        let nodes = entity::node::Entity::find()
            .filter(entity::node::Column::ProjectId.eq(project.to_string()))
            .filter(entity::node::Column::CommitId.is_in(commit_ids))
            .all(&self.db)
            .await?;
        let by_commit: HashMap<&str, &entity::node::Model> =
            nodes.iter().map(|n| (n.commit_id.as_str(), n)).collect();

        let ref_names = self
            .resolve_ref_names(
                project,
                nodes
                    .iter()
                    .flat_map(|n| {
                        std::iter::once(n.created_on_ref_id.clone())
                            .chain(n.merge_from_ref_id.clone())
                    })
                    .collect(),
            )
            .await?;

        let mut entries = Vec::with_capacity(order_rows.len());
        for row in &order_rows {
            // Commits without a node (bare artefact commits) contribute no
            // history entry.
            let Some(node) = by_commit.get(row.commit_id.as_str()) else {
                continue;
            };
            let mut value: serde_json::Value = serde_json::from_str(&node.payload)?;
            if let Some(obj) = value.as_object_mut() {
                if !include_raw_response {
                    obj.remove("rawResponse");
                }
                let created_on = ref_names
                    .get(node.created_on_ref_id.as_str())
                    .cloned()
                    .unwrap_or_else(|| node.created_on_ref_id.clone());
                obj.insert("createdOnBranch".to_string(), created_on.into());
            }
            entries.push(HistoryEntry {
                ordinal: row.ordinal,
                node: value,
                created_on_ref: ref_names
                    .get(node.created_on_ref_id.as_str())
                    .cloned()
                    .unwrap_or_else(|| node.created_on_ref_id.clone()),
                merge_from_ref: node
                    .merge_from_ref_id
                    .as_ref()
                    .map(|id| ref_names.get(id.as_str()).cloned().unwrap_or_else(|| id.clone())),
            });
        }
        Ok(HistoryPage { entries })
    }

    /// The newest `limit` nodes on a ref, oldest-first, typed and with raw
    /// payloads. Internal feed for the context builder.
    pub async fn tail_nodes(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        limit: u64,
    ) -> Result<Vec<TailNode>, CoreError> {
        load_ref(&self.db, project, ref_id).await?;
        let mut rows: Vec<(entity::node::Model, i64)> = entity::node::Entity::find()
            .join(
                JoinType::InnerJoin,
                entity::node::Relation::CommitOrder.def(),
            )
            .filter(entity::commit_order::Column::ProjectId.eq(project.to_string()))
            .filter(entity::commit_order::Column::RefId.eq(ref_id.to_string()))
            .filter(entity::node::Column::ProjectId.eq(project.to_string()))
            .order_by_desc(entity::commit_order::Column::Ordinal)
            .limit(limit)
            .select_also(entity::commit_order::Entity)
            .all(&self.db)
            .await?
            .into_iter()
            .filter_map(|(node, order)| order.map(|o| (node, o.ordinal)))
            .collect();
        rows.reverse();

        let mut out = Vec::with_capacity(rows.len());
        for (node, ordinal) in rows {
            // Unknown node kinds written by newer versions are skipped,
            // not fatal.
            match serde_json::from_str::<NodePayload>(&node.payload) {
                Ok(payload) => out.push(TailNode {
                    ordinal,
                    payload,
                    created_on_ref_id: RefId::from(node.created_on_ref_id),
                }),
                Err(e) => {
                    tracing::warn!("skipping undecodable node {}: {}", node.id, e);
                }
            }
        }
        Ok(out)
    }

    /// All refs of a project with their client-facing projection.
    pub async fn list_refs(
        &self,
        project: &ProjectId,
        user: &UserId,
    ) -> Result<Vec<RefSummary>, CoreError> {
        require_member(&self.db, project, user).await?;
        let project_row = load_project(&self.db, project).await?;
        let rows = entity::refs::Entity::find()
            .filter(entity::refs::Column::ProjectId.eq(project.to_string()))
            .order_by_asc(entity::refs::Column::CreatedAt)
            .all(&self.db)
            .await?;
        rows.into_iter()
            .map(|row| summarize_ref(&project_row, row))
            .collect()
    }

    /// One ref's projection.
    pub async fn get_ref(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
    ) -> Result<RefSummary, CoreError> {
        let project_row = load_project(&self.db, project).await?;
        let row = load_ref(&self.db, project, ref_id).await?;
        summarize_ref(&project_row, row)
    }

    /// Provider bindings for a set of refs, for model-break detection.
    /// Missing (deleted) refs are simply absent from the map.
    pub async fn ref_bindings(
        &self,
        project: &ProjectId,
        ref_ids: &HashSet<RefId>,
    ) -> Result<HashMap<RefId, ProviderBinding>, CoreError> {
        if ref_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = entity::refs::Entity::find()
            .filter(entity::refs::Column::ProjectId.eq(project.to_string()))
            .filter(
                entity::refs::Column::Id
                    .is_in(ref_ids.iter().map(|r| r.to_string()).collect::<Vec<_>>()),
            )
            .all(&self.db)
            .await?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let id = RefId::from(row.id.as_str());
            map.insert(id, ref_binding(&row)?);
        }
        Ok(map)
    }

    async fn resolve_ref_names(
        &self,
        project: &ProjectId,
        ids: HashSet<String>,
    ) -> Result<HashMap<String, String>, CoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = entity::refs::Entity::find()
            .filter(entity::refs::Column::ProjectId.eq(project.to_string()))
            .filter(entity::refs::Column::Id.is_in(ids.into_iter().collect::<Vec<_>>()))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|r| (r.id, r.name)).collect())
    }
}

fn summarize_ref(
    project_row: &entity::project::Model,
    row: entity::refs::Model,
) -> Result<RefSummary, CoreError> {
    let binding = ref_binding(&row)?;
    Ok(RefSummary {
        is_trunk: row.name == TRUNK_NAME,
        is_pinned: project_row.pinned_ref_id.as_deref() == Some(row.id.as_str()),
        id: RefId::from(row.id),
        name: row.name,
        tip_commit_id: row.tip_commit_id.map(CommitId::from),
        tip_ordinal: row.tip_ordinal,
        node_count: row.tip_ordinal + 1,
        binding,
        previous_response_id: row.previous_response_id,
    })
}

/// Verify the storage invariants for one ref: dense ordinals from 0, tip
/// agreement, and merge-commit/merge-node pairing. Debug tooling and test
/// support; not part of the serving path.
pub async fn check_ref_invariants<C: ConnectionTrait>(
    conn: &C,
    project: &ProjectId,
    ref_id: &RefId,
) -> Result<(), CoreError> {
    let ref_row = entity::refs::Entity::find_by_id(ref_id.to_string())
        .filter(entity::refs::Column::ProjectId.eq(project.to_string()))
        .one(conn)
        .await?
        .ok_or_else(|| CoreError::RefNotFound(ref_id.to_string()))?;
    let rows = entity::commit_order::Entity::find()
        .filter(entity::commit_order::Column::ProjectId.eq(project.to_string()))
        .filter(entity::commit_order::Column::RefId.eq(ref_id.to_string()))
        .order_by_asc(entity::commit_order::Column::Ordinal)
        .all(conn)
        .await?;

    for (i, row) in rows.iter().enumerate() {
        if row.ordinal != i as i64 {
            return Err(CoreError::internal(format!(
                "ordinal gap on {ref_id}: expected {i}, found {}",
                row.ordinal
            )));
        }
    }
    let max_ordinal = rows.last().map(|r| r.ordinal).unwrap_or(-1);
    if ref_row.tip_ordinal != max_ordinal {
        return Err(CoreError::internal(format!(
            "tip_ordinal {} disagrees with commit order max {max_ordinal} on {ref_id}",
            ref_row.tip_ordinal
        )));
    }
    let tip = rows.last().map(|r| r.commit_id.clone());
    if ref_row.tip_commit_id != tip {
        return Err(CoreError::internal(format!(
            "tip_commit_id disagrees with commit order tail on {ref_id}"
        )));
    }

    for row in &rows {
        let commit = entity::commit::Entity::find_by_id(row.commit_id.clone())
            .one(conn)
            .await?
            .ok_or_else(|| CoreError::internal(format!("missing commit {}", row.commit_id)))?;
        if commit.parent2.is_some() {
            let merge_nodes = entity::node::Entity::find()
                .filter(entity::node::Column::CommitId.eq(row.commit_id.clone()))
                .filter(entity::node::Column::Kind.eq("merge"))
                .all(conn)
                .await?;
            if merge_nodes.len() != 1 {
                return Err(CoreError::internal(format!(
                    "two-parent commit {} carries {} merge nodes",
                    row.commit_id,
                    merge_nodes.len()
                )));
            }
        }
    }
    Ok(())
}
