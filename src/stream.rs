//! The stream coordinator: one user turn from lease acquisition to
//! assistant persistence.
//!
//! The turn lifecycle is `Idle → Acquired → UserAppended → Streaming →
//! AssistantAppended → Released`, with terminal failure paths for
//! pre-acquire rejection, user abort, provider failure, and lease
//! preemption. Whatever happens mid-stream, accumulated partial output is
//! persisted as the assistant node (with `interrupted = true` on any
//! abnormal end), and the lease is released on every exit path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::CoreConfig;
use crate::errors::CoreError;
use crate::llm::{CompletionClient, CompletionRequest, StreamChunk, ThinkingSetting};
use crate::model::{
    now_ms, ContentBlock, MessageNode, NodeCommon, NodeId, NodePayload, ProjectId, RefId, Role,
    SessionId, UserId,
};
use crate::store::{AppendNode, LeaseGrant, Store};

/// Retry cadence while waiting out a busy lease.
const LEASE_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Coordinator states, for tracing and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Acquired,
    UserAppended,
    Streaming,
    AssistantAppended,
    Released,
}

/// Inputs for one turn.
#[derive(Debug, Clone)]
pub struct TurnParams {
    pub project: ProjectId,
    pub ref_id: RefId,
    pub user: UserId,
    pub session: SessionId,
    pub message: String,
    pub thinking: ThinkingSetting,
    pub web_search: bool,
}

/// Progress events forwarded to the client while the turn runs.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    UserAppended { node_id: NodeId, ordinal: i64 },
    Chunk(StreamChunk),
    AssistantPersisted {
        node_id: NodeId,
        ordinal: i64,
        interrupted: bool,
    },
}

/// Result of a turn whose assistant node was persisted.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub user_node_id: NodeId,
    pub user_ordinal: i64,
    pub assistant_node_id: NodeId,
    pub assistant_ordinal: i64,
    pub content: String,
    pub response_id: Option<String>,
    /// True when the stream was aborted or otherwise cut short.
    pub interrupted: bool,
    /// True when the cut was a user abort (as opposed to an error).
    pub aborted: bool,
}

/// Accumulates a streamed response into the assistant node's fields.
#[derive(Default)]
struct ResponseAccumulator {
    content: String,
    blocks: Vec<ContentBlock>,
    raw_response: Option<serde_json::Value>,
    response_id: Option<String>,
}

impl ResponseAccumulator {
    fn push(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::Text(t) => {
                self.content.push_str(&t);
                if let Some(ContentBlock::Text { text }) = self.blocks.last_mut() {
                    text.push_str(&t);
                } else {
                    self.blocks.push(ContentBlock::Text { text: t });
                }
            }
            StreamChunk::Thinking(t) => {
                if let Some(ContentBlock::Thinking { thinking }) = self.blocks.last_mut() {
                    thinking.push_str(&t);
                } else {
                    self.blocks.push(ContentBlock::Thinking { thinking: t });
                }
            }
            StreamChunk::ThinkingSignature(signature) => {
                self.blocks.push(ContentBlock::ThinkingSignature { signature });
            }
            StreamChunk::Meta { response_id } => {
                if response_id.is_some() {
                    self.response_id = response_id;
                }
            }
            StreamChunk::RawResponse(raw) => self.raw_response = Some(raw),
        }
    }

    fn has_structure(&self) -> bool {
        self.blocks.iter().any(|b| !b.is_text())
    }
}

/// Runs turns against one store/config/client triple.
pub struct StreamCoordinator {
    store: Store,
    config: CoreConfig,
    client: Arc<dyn CompletionClient>,
}

impl StreamCoordinator {
    pub fn new(store: Store, config: CoreConfig, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            store,
            config,
            client,
        }
    }

    /// Run one turn. `events` receives progress while the stream runs;
    /// `cancel` aborts the provider stream (the partial response is still
    /// persisted).
    pub async fn run_turn(
        &self,
        params: TurnParams,
        events: Option<mpsc::Sender<TurnEvent>>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, CoreError> {
        if params.message.trim().is_empty() {
            return Err(CoreError::invalid("turn message must not be empty"));
        }

        self.acquire_with_wait(&params).await?;
        tracing::debug!("turn state {:?} on {}", TurnState::Acquired, params.ref_id);

        let result = self.run_acquired(&params, events, cancel).await;

        // Session-guarded release: a no-op when a preempting session owns
        // the lease by now.
        if let Err(e) = self
            .store
            .release_ref_lease(&params.project, &params.ref_id, &params.session, false)
            .await
        {
            tracing::warn!("lease release failed on {}: {}", params.ref_id, e);
        }
        tracing::debug!("turn state {:?} on {}", TurnState::Released, params.ref_id);
        result
    }

    /// Bounded busy wait on a held lease, then `LeaseHeld`.
    async fn acquire_with_wait(&self, params: &TurnParams) -> Result<(), CoreError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.lease_wait_ms);
        loop {
            let grant = self
                .store
                .acquire_ref_lease(
                    &params.project,
                    &params.ref_id,
                    &params.user,
                    &params.session,
                    self.config.lease_ttl_ms(),
                )
                .await?;
            match grant {
                LeaseGrant::Acquired { .. } => return Ok(()),
                LeaseGrant::Busy {
                    holder_user,
                    holder_session,
                    expires_at,
                } => {
                    if Instant::now() >= deadline {
                        return Err(CoreError::LeaseHeld {
                            holder_user: holder_user.to_string(),
                            holder_session: holder_session.to_string(),
                            expires_at,
                        });
                    }
                    tokio::time::sleep(LEASE_RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn run_acquired(
        &self,
        params: &TurnParams,
        events: Option<mpsc::Sender<TurnEvent>>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, CoreError> {
        // User turn first: it binds the caller's canvas draft into the
        // same commit when the draft changed.
        let user_node_id = NodeId::new();
        let user_payload = NodePayload::Message(MessageNode::text(
            user_node_id.clone(),
            now_ms(),
            None,
            Role::User,
            params.message.clone(),
        ));
        let user_append = self
            .store
            .append_node(AppendNode {
                project: &params.project,
                ref_id: &params.ref_id,
                user: &params.user,
                session: Some(&params.session),
                payload: user_payload,
                message: None,
                attach_draft: true,
                enforce_lease: true,
                lock_timeout_ms: self.config.lock_timeout_ms,
            })
            .await?;
        emit(
            &events,
            TurnEvent::UserAppended {
                node_id: user_append.node_id.clone(),
                ordinal: user_append.ordinal,
            },
        )
        .await;
        tracing::debug!("turn state {:?} on {}", TurnState::UserAppended, params.ref_id);

        let ref_state = self.store.get_ref(&params.project, &params.ref_id).await?;
        let context = self.build_context(params).await?;
        let request = CompletionRequest {
            binding: ref_state.binding.clone(),
            system: context.system_preamble,
            messages: context.messages,
            thinking: params.thinking,
            web_search: params.web_search,
            previous_response_id: if ref_state.binding.provider.is_responses_capable() {
                ref_state.previous_response_id.clone()
            } else {
                None
            },
        };

        tracing::debug!("turn state {:?} on {}", TurnState::Streaming, params.ref_id);
        let (acc, aborted, provider_error, heartbeat_lost) =
            self.drive_stream(params, request, &events, &cancel).await;

        // Preemption check before the assistant write: a displaced lease
        // flips the node to interrupted but never discards the partial.
        let holder = self
            .store
            .lease_holder_session(&params.project, &params.ref_id)
            .await?;
        let preempted =
            heartbeat_lost || holder.as_ref() != Some(&params.session);
        let interrupted = aborted || provider_error.is_some() || preempted;

        let assistant_node_id = NodeId::new();
        let assistant_payload = NodePayload::Message(MessageNode {
            common: NodeCommon {
                id: assistant_node_id.clone(),
                timestamp: now_ms(),
                parent: None,
            },
            role: Role::Assistant,
            content: acc.content.clone(),
            content_blocks: if acc.has_structure() {
                Some(acc.blocks.clone())
            } else {
                None
            },
            raw_response: acc.raw_response.clone(),
            response_id: acc.response_id.clone(),
            interrupted: interrupted.then_some(true),
            ui_hidden: None,
        });
        let assistant_append = self
            .store
            .append_node(AppendNode {
                project: &params.project,
                ref_id: &params.ref_id,
                user: &params.user,
                session: Some(&params.session),
                payload: assistant_payload,
                message: None,
                attach_draft: false,
                enforce_lease: !preempted,
                lock_timeout_ms: self.config.lock_timeout_ms,
            })
            .await?;
        emit(
            &events,
            TurnEvent::AssistantPersisted {
                node_id: assistant_append.node_id.clone(),
                ordinal: assistant_append.ordinal,
                interrupted,
            },
        )
        .await;
        tracing::debug!(
            "turn state {:?} on {}",
            TurnState::AssistantAppended,
            params.ref_id
        );

        if !preempted
            && ref_state.binding.provider.is_responses_capable()
            && acc.response_id.is_some()
        {
            self.store
                .set_previous_response_id(&params.project, &params.ref_id, acc.response_id.clone())
                .await?;
        }

        if let Some(err) = provider_error {
            return Err(CoreError::Provider(err));
        }
        if preempted {
            return Err(CoreError::LeaseExpired(params.ref_id.to_string()));
        }
        Ok(TurnOutcome {
            user_node_id: user_append.node_id,
            user_ordinal: user_append.ordinal,
            assistant_node_id: assistant_append.node_id,
            assistant_ordinal: assistant_append.ordinal,
            content: acc.content,
            response_id: acc.response_id,
            interrupted,
            aborted,
        })
    }

    async fn build_context(
        &self,
        params: &TurnParams,
    ) -> Result<crate::context::AssembledContext, CoreError> {
        let nodes = self
            .store
            .tail_nodes(&params.project, &params.ref_id, self.config.history_limit)
            .await?;
        let ref_ids: std::collections::HashSet<RefId> =
            nodes.iter().map(|n| n.created_on_ref_id.clone()).collect();
        let bindings = self.store.ref_bindings(&params.project, &ref_ids).await?;
        let current = self.store.get_ref(&params.project, &params.ref_id).await?;
        Ok(crate::context::assemble(
            &nodes,
            &current.binding,
            &bindings,
            &crate::context::ContextOptions {
                token_limit: self.config.token_limit,
                merge_attribution: self.config.merge_attribution,
                canvas_tools_available: true,
            },
        ))
    }

    /// Drive the provider stream until completion, abort, or failure.
    /// Returns the accumulator plus `(aborted, provider_error,
    /// heartbeat_lost)`.
    async fn drive_stream(
        &self,
        params: &TurnParams,
        request: CompletionRequest,
        events: &Option<mpsc::Sender<TurnEvent>>,
        cancel: &CancellationToken,
    ) -> (ResponseAccumulator, bool, Option<String>, bool) {
        let mut acc = ResponseAccumulator::default();

        let mut stream = match self.client.stream_completion(request).await {
            Ok(stream) => stream,
            Err(e) => return (acc, false, Some(e.to_string()), false),
        };

        let mut last_heartbeat = Instant::now();
        let heartbeat_interval = Duration::from_millis(self.config.heartbeat_interval_ms);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("turn aborted on {}", params.ref_id);
                    return (acc, true, None, false);
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    emit(events, TurnEvent::Chunk(chunk.clone())).await;
                    acc.push(chunk);
                    // Keep the TTL alive under slow streams.
                    if last_heartbeat.elapsed() >= heartbeat_interval {
                        last_heartbeat = Instant::now();
                        let refreshed = self
                            .store
                            .refresh_ref_lease(
                                &params.project,
                                &params.ref_id,
                                &params.user,
                                &params.session,
                                self.config.lease_ttl_ms(),
                            )
                            .await;
                        if let Err(e) = refreshed {
                            tracing::warn!(
                                "lease heartbeat lost on {}: {}; stopping stream",
                                params.ref_id,
                                e
                            );
                            return (acc, false, None, true);
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("provider stream failed on {}: {}", params.ref_id, e);
                    return (acc, false, Some(e.to_string()), false);
                }
                None => return (acc, false, None, false),
            }
        }
    }
}

/// Forward an event to the watcher, honoring the channel's bound for
/// backpressure. A gone receiver only means nobody is watching.
async fn emit(events: &Option<mpsc::Sender<TurnEvent>>, event: TurnEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}
