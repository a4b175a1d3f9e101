//! The workspace facade: storage, locks, config, and the completion
//! client composed behind the client-facing surface.
//!
//! Everything here is a thin, authorized delegation to the engines;
//! per-call defaults (history limit, lock timeout, lease TTL) come from
//! the config. The facade also keeps the registry of in-flight turns so
//! `abort_turn` can reach a running stream.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::CoreConfig;
use crate::errors::CoreError;
use crate::llm::{CompletionClient, ThinkingSetting};
use crate::model::{
    NodeId, ProjectId, Provider, ProviderBinding, RefId, SessionId, UserId,
};
use crate::store::{
    ArtefactSaveOutcome, BranchFromNodeOutcome, CanvasView, DraftState, HistoryPage, LeaseGrant,
    LeaseState, MergeOptions, MergeOutcome, RefSummary, Store,
};
use crate::store::project::ProjectCreated;
use crate::stream::{StreamCoordinator, TurnEvent, TurnOutcome, TurnParams};

/// Inputs for starting a turn through the facade.
#[derive(Debug, Clone)]
pub struct StartTurn {
    pub project: ProjectId,
    pub ref_id: RefId,
    pub user: UserId,
    pub session: SessionId,
    pub message: String,
    pub thinking: ThinkingSetting,
    pub web_search: bool,
}

/// The provenance core's entry point.
pub struct Workspace {
    store: Store,
    config: CoreConfig,
    coordinator: StreamCoordinator,
    active_turns: DashMap<(ProjectId, RefId), CancellationToken>,
}

impl Workspace {
    pub fn new(store: Store, config: CoreConfig, client: Arc<dyn CompletionClient>) -> Self {
        let coordinator = StreamCoordinator::new(store.clone(), config.clone(), client);
        Self {
            store,
            config,
            coordinator,
            active_turns: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    // Projects and membership -------------------------------------------

    pub async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        owner: &UserId,
        binding: ProviderBinding,
    ) -> Result<ProjectCreated, CoreError> {
        self.store
            .create_project(name, description, owner, binding)
            .await
    }

    pub async fn delete_project(&self, project: &ProjectId, user: &UserId) -> Result<(), CoreError> {
        self.store.delete_project(project, user).await
    }

    pub async fn add_member(
        &self,
        project: &ProjectId,
        owner: &UserId,
        user: &UserId,
    ) -> Result<(), CoreError> {
        self.store.add_member(project, owner, user).await
    }

    // Refs and history ---------------------------------------------------

    pub async fn list_refs(
        &self,
        project: &ProjectId,
        user: &UserId,
    ) -> Result<Vec<RefSummary>, CoreError> {
        self.store.list_refs(project, user).await
    }

    pub async fn get_history(
        &self,
        project: &ProjectId,
        user: &UserId,
        ref_id: &RefId,
        limit: Option<u64>,
        before_ordinal: Option<i64>,
    ) -> Result<HistoryPage, CoreError> {
        self.store
            .get_history(
                project,
                user,
                ref_id,
                limit.unwrap_or(self.config.history_limit),
                before_ordinal,
                false,
            )
            .await
    }

    pub async fn create_branch_from_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
        source_ref: &RefId,
        new_name: &str,
        provider: Option<Provider>,
        model: Option<String>,
    ) -> Result<RefId, CoreError> {
        self.store
            .create_ref_from_ref(project, user, source_ref, new_name, provider, model, None)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_branch_from_node(
        &self,
        project: &ProjectId,
        user: &UserId,
        source_ref: &RefId,
        new_name: &str,
        node_id: &NodeId,
        provider: Option<Provider>,
        model: Option<String>,
    ) -> Result<BranchFromNodeOutcome, CoreError> {
        self.store
            .create_ref_from_node(
                project, user, source_ref, new_name, node_id, provider, model, None,
            )
            .await
    }

    pub async fn merge_ours(
        &self,
        project: &ProjectId,
        user: &UserId,
        session: Option<&SessionId>,
        target_ref: &RefId,
        source_ref: &RefId,
        summary: &str,
    ) -> Result<MergeOutcome, CoreError> {
        self.store
            .merge_ours(
                project,
                user,
                session,
                target_ref,
                source_ref,
                summary,
                MergeOptions {
                    include_assistant: true,
                    include_canvas_diff: true,
                    message: None,
                },
                self.config.lock_timeout_ms,
            )
            .await
    }

    /// Switch a ref's provider/model binding, e.g. ahead of a turn run
    /// under a different model. Older assistant turns fall behind the
    /// model break and are fed to the new provider as canonical text.
    pub async fn rebind_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
        ref_id: &RefId,
        provider: Provider,
        model: Option<String>,
    ) -> Result<ProviderBinding, CoreError> {
        self.store
            .rebind_ref(project, user, ref_id, provider, model)
            .await
    }

    pub async fn rename_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
        ref_id: &RefId,
        new_name: &str,
    ) -> Result<(), CoreError> {
        self.store.rename_ref(project, user, ref_id, new_name).await
    }

    pub async fn delete_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
        ref_id: &RefId,
    ) -> Result<(), CoreError> {
        self.store.delete_ref(project, user, ref_id).await
    }

    pub async fn pin_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
        ref_id: Option<&RefId>,
    ) -> Result<(), CoreError> {
        self.store.pin_ref(project, user, ref_id).await
    }

    pub async fn set_current_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
        ref_id: &RefId,
    ) -> Result<(), CoreError> {
        self.store.set_current_ref(project, user, ref_id).await
    }

    pub async fn get_current_ref(
        &self,
        project: &ProjectId,
        user: &UserId,
    ) -> Result<RefId, CoreError> {
        self.store.get_current_ref(project, user).await
    }

    pub async fn toggle_star(
        &self,
        project: &ProjectId,
        user: &UserId,
        node: &NodeId,
    ) -> Result<bool, CoreError> {
        self.store.toggle_star(project, user, node).await
    }

    pub async fn list_stars(
        &self,
        project: &ProjectId,
        user: &UserId,
    ) -> Result<Vec<NodeId>, CoreError> {
        self.store.list_stars(project, user).await
    }

    // Canvas -------------------------------------------------------------

    pub async fn get_canvas(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        user: &UserId,
    ) -> Result<CanvasView, CoreError> {
        self.store.get_canvas(project, ref_id, user).await
    }

    pub async fn save_draft(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        user: &UserId,
        content: &str,
    ) -> Result<DraftState, CoreError> {
        self.store.save_draft(project, ref_id, user, content).await
    }

    pub async fn delete_draft(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        user: &UserId,
    ) -> Result<(), CoreError> {
        self.store.delete_draft(project, ref_id, user).await
    }

    /// Explicit canvas save: commits an artefact plus a state node on the
    /// trunk.
    pub async fn explicit_canvas_save(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        user: &UserId,
        session: Option<&SessionId>,
        content: &str,
    ) -> Result<ArtefactSaveOutcome, CoreError> {
        self.store
            .update_artefact(
                project,
                ref_id,
                user,
                session,
                content,
                None,
                self.config.lock_timeout_ms,
            )
            .await
    }

    // Turns --------------------------------------------------------------

    /// Run a full turn. The returned outcome's assistant node is persisted
    /// even when the stream was aborted mid-flight.
    pub async fn start_turn(&self, input: StartTurn) -> Result<TurnOutcome, CoreError> {
        self.start_turn_with_events(input, None).await
    }

    /// Run a full turn, forwarding progress to `events`.
    pub async fn start_turn_with_events(
        &self,
        input: StartTurn,
        events: Option<mpsc::Sender<TurnEvent>>,
    ) -> Result<TurnOutcome, CoreError> {
        let key = (input.project.clone(), input.ref_id.clone());
        let cancel = CancellationToken::new();
        self.active_turns.insert(key.clone(), cancel.clone());

        let result = self
            .coordinator
            .run_turn(
                TurnParams {
                    project: input.project,
                    ref_id: input.ref_id,
                    user: input.user,
                    session: input.session,
                    message: input.message,
                    thinking: input.thinking,
                    web_search: input.web_search,
                },
                events,
                cancel,
            )
            .await;

        self.active_turns.remove(&key);
        result
    }

    /// Spawn a turn and hand back its event stream plus the join handle
    /// for the final outcome. Convenience wrapper for transport layers
    /// that relay chunks to a client connection.
    pub fn start_turn_streaming(
        self: Arc<Self>,
        input: StartTurn,
    ) -> (
        tokio_stream::wrappers::ReceiverStream<TurnEvent>,
        tokio::task::JoinHandle<Result<TurnOutcome, CoreError>>,
    ) {
        let (tx, rx) = mpsc::channel(64);
        let handle =
            tokio::spawn(async move { self.start_turn_with_events(input, Some(tx)).await });
        (tokio_stream::wrappers::ReceiverStream::new(rx), handle)
    }

    /// Signal the in-flight turn on a ref to stop. Returns whether a turn
    /// was found. The partial response is persisted by the coordinator.
    pub fn abort_turn(&self, project: &ProjectId, ref_id: &RefId) -> bool {
        match self.active_turns.get(&(project.clone(), ref_id.clone())) {
            Some(entry) => {
                entry.value().cancel();
                true
            }
            None => false,
        }
    }

    // Leases -------------------------------------------------------------

    pub async fn acquire_lease(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        user: &UserId,
        session: &SessionId,
        ttl_secs: Option<u64>,
    ) -> Result<LeaseGrant, CoreError> {
        let ttl_ms = (ttl_secs.unwrap_or(self.config.lease_ttl_secs) as i64) * 1000;
        self.store
            .acquire_ref_lease(project, ref_id, user, session, ttl_ms)
            .await
    }

    pub async fn refresh_lease(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        user: &UserId,
        session: &SessionId,
        ttl_secs: Option<u64>,
    ) -> Result<i64, CoreError> {
        let ttl_ms = (ttl_secs.unwrap_or(self.config.lease_ttl_secs) as i64) * 1000;
        self.store
            .refresh_ref_lease(project, ref_id, user, session, ttl_ms)
            .await
    }

    pub async fn release_lease(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        session: &SessionId,
    ) -> Result<(), CoreError> {
        self.store
            .release_ref_lease(project, ref_id, session, false)
            .await
    }

    pub async fn list_leases(&self, project: &ProjectId) -> Result<Vec<LeaseState>, CoreError> {
        self.store.list_ref_leases(project).await
    }

    // Maintenance --------------------------------------------------------

    /// Drop per-ref mutexes that have sat idle. Call periodically from a
    /// housekeeping task.
    pub fn purge_idle_locks(&self, max_idle: std::time::Duration) {
        self.store.locks().purge_idle(max_idle);
    }
}
