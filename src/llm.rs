//! The streaming completion abstraction the core consumes.
//!
//! Provider SDKs live outside the core; this module only fixes the
//! contract: ordered messages in, an async sequence of typed chunks out.
//! Errors propagate as exceptional terminations of the sequence, and any
//! partial output preceding the error is still persisted by the caller.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;

use crate::context::{ContextContent, ContextMessage};
use crate::model::{Provider, ProviderBinding};

/// Streaming failure. Distinct from [`crate::errors::CoreError`] so
/// adapter crates do not depend on storage error types.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Provider rejected the request: {0}")]
    Rejected(String),

    #[error("Stream failed mid-flight: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One streamed chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Incremental visible text.
    Text(String),
    /// Incremental thinking text.
    Thinking(String),
    /// A thinking signature; arrives whole.
    ThinkingSignature(String),
    /// Provider metadata once known; currently the response id.
    Meta { response_id: Option<String> },
    /// The captured raw provider payload, conveyed at stream completion.
    /// Opaque; stored as-is.
    RawResponse(serde_json::Value),
}

/// Type alias for completion chunk streams to reduce nesting.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, CompletionError>> + Send>>;

/// Thinking budget requested for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkingSetting {
    #[default]
    Off,
    Standard,
    Extended,
}

/// One completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub binding: ProviderBinding,
    pub system: String,
    pub messages: Vec<ContextMessage>,
    pub thinking: ThinkingSetting,
    /// Enable the provider's web-search tool, where supported.
    pub web_search: bool,
    /// Continuation binding for the responses-capable provider; `None`
    /// everywhere else.
    pub previous_response_id: Option<String>,
}

impl CompletionRequest {
    /// Flattened length of the request in estimated tokens, for logging.
    pub fn estimated_tokens(&self) -> usize {
        let mut total = crate::context::tokens::estimate_text(&self.system);
        for msg in &self.messages {
            total += match &msg.content {
                ContextContent::Text(t) => crate::context::tokens::estimate_text(t),
                ContextContent::Blocks(b) => crate::context::tokens::estimate_blocks(b),
            };
        }
        total
    }
}

/// Streaming completion interface for storage-agnostic provider adapters.
///
/// Implementations must honor cancellation by ending the stream promptly
/// when the consumer drops it; the coordinator additionally guards every
/// read with its own cancellation token.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Open a completion stream for the request.
    async fn stream_completion(&self, request: CompletionRequest) -> Result<ChunkStream, CompletionError>;

    /// Whether this client can serve the given provider. Lets one adapter
    /// registry back several bindings.
    fn supports(&self, provider: Provider) -> bool {
        let _ = provider;
        true
    }
}
