//! Project lifecycle, membership, per-user preferences, and stars.

use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};

use crate::errors::CoreError;
use crate::model::{now_ms, NodeId, ProjectId, ProviderBinding, RefId, UserId, TRUNK_NAME};
use crate::store::{entity, load_project, load_ref, require_member, Store};

/// Result of `create_project`: the project and its trunk ref.
#[derive(Debug, Clone)]
pub struct ProjectCreated {
    pub project_id: ProjectId,
    pub trunk_ref_id: RefId,
}

impl Store {
    /// Create a project: enrolls the owner as a member and creates the
    /// trunk ref named `main` with the owner's provider/model defaults,
    /// an empty tip and `tip_ordinal = -1`.
    pub async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        owner: &UserId,
        binding: ProviderBinding,
    ) -> Result<ProjectCreated, CoreError> {
        if name.trim().is_empty() {
            return Err(CoreError::invalid("project name must not be empty"));
        }
        let project_id = ProjectId::new();
        let trunk_ref_id = RefId::new();
        let now = now_ms();

        let txn = self.db.begin().await?;
        entity::project::ActiveModel {
            id: Set(project_id.to_string()),
            name: Set(name.to_string()),
            description: Set(description.map(str::to_owned)),
            owner: Set(owner.to_string()),
            created_at: Set(now),
            pinned_ref_id: Set(None),
        }
        .insert(&txn)
        .await?;
        entity::member::ActiveModel {
            project_id: Set(project_id.to_string()),
            user_id: Set(owner.to_string()),
            role: Set("owner".to_string()),
            added_at: Set(now),
        }
        .insert(&txn)
        .await?;
        entity::refs::ActiveModel {
            id: Set(trunk_ref_id.to_string()),
            project_id: Set(project_id.to_string()),
            name: Set(TRUNK_NAME.to_string()),
            tip_commit_id: Set(None),
            tip_ordinal: Set(-1),
            provider: Set(binding.provider.as_str().to_string()),
            model: Set(binding.model),
            previous_response_id: Set(None),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        tracing::debug!("created project {} with trunk {}", project_id, trunk_ref_id);
        Ok(ProjectCreated {
            project_id,
            trunk_ref_id,
        })
    }

    /// Hard-delete a project and everything under it. Owner only.
    pub async fn delete_project(&self, project: &ProjectId, user: &UserId) -> Result<(), CoreError> {
        let txn = self.db.begin().await?;
        let row = load_project(&txn, project).await?;
        if row.owner != user.as_str() {
            return Err(CoreError::NotAuthorized(format!(
                "only the owner may delete project {project}"
            )));
        }
        let pid = project.to_string();
        entity::star::Entity::delete_many()
            .filter(entity::star::Column::ProjectId.eq(pid.as_str()))
            .exec(&txn)
            .await?;
        entity::prefs::Entity::delete_many()
            .filter(entity::prefs::Column::ProjectId.eq(pid.as_str()))
            .exec(&txn)
            .await?;
        entity::lease::Entity::delete_many()
            .filter(entity::lease::Column::ProjectId.eq(pid.as_str()))
            .exec(&txn)
            .await?;
        entity::draft::Entity::delete_many()
            .filter(entity::draft::Column::ProjectId.eq(pid.as_str()))
            .exec(&txn)
            .await?;
        entity::commit_order::Entity::delete_many()
            .filter(entity::commit_order::Column::ProjectId.eq(pid.as_str()))
            .exec(&txn)
            .await?;
        entity::artefact::Entity::delete_many()
            .filter(entity::artefact::Column::ProjectId.eq(pid.as_str()))
            .exec(&txn)
            .await?;
        entity::node::Entity::delete_many()
            .filter(entity::node::Column::ProjectId.eq(pid.as_str()))
            .exec(&txn)
            .await?;
        entity::commit::Entity::delete_many()
            .filter(entity::commit::Column::ProjectId.eq(pid.as_str()))
            .exec(&txn)
            .await?;
        entity::refs::Entity::delete_many()
            .filter(entity::refs::Column::ProjectId.eq(pid.as_str()))
            .exec(&txn)
            .await?;
        entity::member::Entity::delete_many()
            .filter(entity::member::Column::ProjectId.eq(pid.as_str()))
            .exec(&txn)
            .await?;
        entity::project::Entity::delete_by_id(pid).exec(&txn).await?;
        txn.commit().await?;
        tracing::debug!("deleted project {}", project);
        Ok(())
    }

    /// Enroll `user` as a member. Owner only; idempotent.
    pub async fn add_member(
        &self,
        project: &ProjectId,
        owner: &UserId,
        user: &UserId,
    ) -> Result<(), CoreError> {
        let txn = self.db.begin().await?;
        let row = load_project(&txn, project).await?;
        if row.owner != owner.as_str() {
            return Err(CoreError::NotAuthorized(format!(
                "only the owner may add members to project {project}"
            )));
        }
        entity::member::Entity::insert(entity::member::ActiveModel {
            project_id: Set(project.to_string()),
            user_id: Set(user.to_string()),
            role: Set("member".to_string()),
            added_at: Set(now_ms()),
        })
        .on_conflict(
            OnConflict::columns([
                entity::member::Column::ProjectId,
                entity::member::Column::UserId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .do_nothing()
        .exec(&txn)
        .await?;
        txn.commit().await?;
        Ok(())
    }

    /// The membership predicate.
    pub async fn is_member(&self, project: &ProjectId, user: &UserId) -> Result<bool, CoreError> {
        let found =
            entity::member::Entity::find_by_id((project.to_string(), user.to_string()))
                .one(&self.db)
                .await?;
        Ok(found.is_some())
    }

    /// Pin a ref on the project, or clear the pin.
    pub async fn pin_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
        ref_id: Option<&RefId>,
    ) -> Result<(), CoreError> {
        let txn = self.db.begin().await?;
        require_member(&txn, project, user).await?;
        let row = load_project(&txn, project).await?;
        if let Some(r) = ref_id {
            load_ref(&txn, project, r).await?;
        }
        let mut active: entity::project::ActiveModel = row.into();
        active.pinned_ref_id = Set(ref_id.map(|r| r.to_string()));
        active.update(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Upsert the caller's current-ref preference.
    pub async fn set_current_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
        ref_id: &RefId,
    ) -> Result<(), CoreError> {
        let txn = self.db.begin().await?;
        require_member(&txn, project, user).await?;
        load_ref(&txn, project, ref_id).await?;
        entity::prefs::Entity::insert(entity::prefs::ActiveModel {
            project_id: Set(project.to_string()),
            user_id: Set(user.to_string()),
            current_ref_id: Set(ref_id.to_string()),
            updated_at: Set(now_ms()),
        })
        .on_conflict(
            OnConflict::columns([
                entity::prefs::Column::ProjectId,
                entity::prefs::Column::UserId,
            ])
            .update_columns([
                entity::prefs::Column::CurrentRefId,
                entity::prefs::Column::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec(&txn)
        .await?;
        txn.commit().await?;
        Ok(())
    }

    /// The caller's current ref, falling back to the trunk when unset or
    /// when the preferred ref no longer exists.
    pub async fn get_current_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
    ) -> Result<RefId, CoreError> {
        require_member(&self.db, project, user).await?;
        let pref = entity::prefs::Entity::find_by_id((project.to_string(), user.to_string()))
            .one(&self.db)
            .await?;
        if let Some(pref) = pref {
            let ref_id = RefId::from(pref.current_ref_id);
            if load_ref(&self.db, project, &ref_id).await.is_ok() {
                return Ok(ref_id);
            }
        }
        let trunk = entity::refs::Entity::find()
            .filter(entity::refs::Column::ProjectId.eq(project.to_string()))
            .filter(entity::refs::Column::Name.eq(TRUNK_NAME))
            .one(&self.db)
            .await?
            .ok_or_else(|| CoreError::internal(format!("project {project} has no trunk")))?;
        Ok(RefId::from(trunk.id))
    }

    /// Toggle the caller's star on a node. Returns the new starred state.
    /// Never creates commits.
    pub async fn toggle_star(
        &self,
        project: &ProjectId,
        user: &UserId,
        node: &NodeId,
    ) -> Result<bool, CoreError> {
        let txn = self.db.begin().await?;
        require_member(&txn, project, user).await?;
        let node_row = entity::node::Entity::find_by_id(node.to_string())
            .filter(entity::node::Column::ProjectId.eq(project.to_string()))
            .one(&txn)
            .await?;
        if node_row.is_none() {
            return Err(CoreError::NodeNotFound(node.to_string()));
        }
        let key = (project.to_string(), node.to_string(), user.to_string());
        let existing = entity::star::Entity::find_by_id(key.clone()).one(&txn).await?;
        let starred = if existing.is_some() {
            entity::star::Entity::delete_by_id(key).exec(&txn).await?;
            false
        } else {
            entity::star::ActiveModel {
                project_id: Set(project.to_string()),
                node_id: Set(node.to_string()),
                user_id: Set(user.to_string()),
                starred_at: Set(now_ms()),
            }
            .insert(&txn)
            .await?;
            true
        };
        txn.commit().await?;
        Ok(starred)
    }

    /// Node ids the caller has starred in the project.
    pub async fn list_stars(
        &self,
        project: &ProjectId,
        user: &UserId,
    ) -> Result<Vec<NodeId>, CoreError> {
        require_member(&self.db, project, user).await?;
        let rows = entity::star::Entity::find()
            .filter(entity::star::Column::ProjectId.eq(project.to_string()))
            .filter(entity::star::Column::UserId.eq(user.to_string()))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|r| NodeId::from(r.node_id)).collect())
    }
}
