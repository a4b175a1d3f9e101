//! Shared fixtures: an in-memory workspace and a scripted completion
//! client whose streams are driven from per-call step lists.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use tangent::config::CoreConfig;
use tangent::llm::{ChunkStream, CompletionClient, CompletionError, CompletionRequest, StreamChunk};
use tangent::model::{Provider, ProviderBinding, UserId};
use tangent::store::project::ProjectCreated;
use tangent::store::Store;
use tangent::workspace::Workspace;

/// One step of a scripted stream.
#[derive(Clone)]
pub enum Step {
    Chunk(StreamChunk),
    /// Terminate the stream with an error after any prior chunks.
    Fail(String),
    /// Hold the stream open until the notify fires.
    Pause(Arc<Notify>),
    Sleep(Duration),
}

pub fn text(s: &str) -> Step {
    Step::Chunk(StreamChunk::Text(s.to_string()))
}

pub fn thinking(s: &str) -> Step {
    Step::Chunk(StreamChunk::Thinking(s.to_string()))
}

pub fn signature(s: &str) -> Step {
    Step::Chunk(StreamChunk::ThinkingSignature(s.to_string()))
}

pub fn meta(response_id: &str) -> Step {
    Step::Chunk(StreamChunk::Meta {
        response_id: Some(response_id.to_string()),
    })
}

pub fn raw(value: serde_json::Value) -> Step {
    Step::Chunk(StreamChunk::RawResponse(value))
}

/// Scripted provider: each `stream_completion` call pops the next script
/// (falling back to the default) and records the request for assertions.
#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    default_script: Mutex<Vec<Step>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        let client = Self::default();
        *client.default_script.lock().unwrap() = vec![text("ok")];
        Arc::new(client)
    }

    pub fn enqueue(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(steps);
    }

    pub fn set_default(&self, steps: Vec<Step>) {
        *self.default_script.lock().unwrap() = steps;
    }

    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkStream, CompletionError> {
        self.requests.lock().unwrap().push(request);
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_script.lock().unwrap().clone());
        let stream = futures::stream::unfold(steps.into_iter(), |mut steps| async move {
            loop {
                match steps.next() {
                    None => return None,
                    Some(Step::Chunk(chunk)) => return Some((Ok(chunk), steps)),
                    Some(Step::Fail(msg)) => {
                        return Some((Err(CompletionError::Stream(msg)), steps));
                    }
                    Some(Step::Pause(gate)) => gate.notified().await,
                    Some(Step::Sleep(d)) => tokio::time::sleep(d).await,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Route test logs through the test harness; idempotent across tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A fresh in-memory workspace with one project owned by `owner`.
pub struct Fixture {
    pub workspace: Arc<Workspace>,
    pub client: Arc<ScriptedClient>,
    pub project: ProjectCreated,
    pub owner: UserId,
}

pub async fn fixture_with(config: CoreConfig, binding: ProviderBinding) -> Fixture {
    init_tracing();
    let store = Store::in_memory().await.expect("in-memory store");
    let client = ScriptedClient::new();
    let workspace = Arc::new(Workspace::new(store, config, client.clone()));
    let owner = UserId::from("alice");
    let project = workspace
        .create_project("research", Some("fixture project"), &owner, binding)
        .await
        .expect("create project");
    Fixture {
        workspace,
        client,
        project,
        owner,
    }
}

pub async fn fixture() -> Fixture {
    fixture_with(
        CoreConfig::default(),
        ProviderBinding::new(Provider::Anthropic, "claude-sonnet-4-5"),
    )
    .await
}
