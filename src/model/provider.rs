//! Provider bindings and redaction rules.
//!
//! Every ref is bound to a `(provider, model)` pair. The binding decides
//! two things during context assembly: where the model break falls (nodes
//! created under a different binding fall back to canonical text), and how
//! an assistant node's structured blocks are redacted before being fed
//! back to the same provider.

use serde::{Deserialize, Serialize};

use crate::model::node::ContentBlock;

/// The LLM providers the core distinguishes. Only behaviors the core
/// depends on are modeled here; SDK specifics live behind the completion
/// abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Plain chat-completions variant: no structured thinking survives.
    OpenaiChat,
    /// The "responses" variant; the only provider whose continuations are
    /// bound through `previous_response_id`.
    OpenaiResponses,
    /// Anthropic-style with thinking blocks and signatures.
    Anthropic,
    /// Gemini: thinking text is never replayed, signatures are.
    Gemini,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenaiChat => "openai_chat",
            Provider::OpenaiResponses => "openai_responses",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }

    /// Whether same-branch continuations are bound to prior responses via
    /// `previous_response_id`.
    pub fn is_responses_capable(&self) -> bool {
        matches!(self, Provider::OpenaiResponses)
    }

    /// Default model used when a branch re-binds to this provider without
    /// naming one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenaiChat => "gpt-4o",
            Provider::OpenaiResponses => "gpt-5",
            Provider::Anthropic => "claude-sonnet-4-5",
            Provider::Gemini => "gemini-2.5-pro",
        }
    }

    /// Translate a stored assistant block list into the blocks this
    /// provider may see again as context.
    ///
    /// - Chat-completions: text blocks only.
    /// - Gemini: drop thinking text, keep signatures and text.
    /// - Anthropic and the responses variant: if any signature is present,
    ///   strip thinking text and keep signatures + text; with no
    ///   signatures, thinking blocks pass through verbatim.
    ///
    /// Signatures are provider-continuity material only; they are never
    /// shown to a human viewer.
    pub fn redact_context_blocks(&self, blocks: &[ContentBlock]) -> Vec<ContentBlock> {
        match self {
            Provider::OpenaiChat => blocks.iter().filter(|b| b.is_text()).cloned().collect(),
            Provider::Gemini => blocks
                .iter()
                .filter(|b| !b.is_thinking())
                .cloned()
                .collect(),
            Provider::Anthropic | Provider::OpenaiResponses => {
                let has_signature = blocks.iter().any(|b| b.is_signature());
                if has_signature {
                    blocks.iter().filter(|b| !b.is_thinking()).cloned().collect()
                } else {
                    blocks.to_vec()
                }
            }
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai_chat" => Ok(Provider::OpenaiChat),
            "openai_responses" => Ok(Provider::OpenaiResponses),
            "anthropic" => Ok(Provider::Anthropic),
            "gemini" => Ok(Provider::Gemini),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// A ref's provider binding. Two bindings are "the same" for model-break
/// purposes only when both provider and model match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderBinding {
    pub provider: Provider,
    pub model: String,
}

impl ProviderBinding {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub fn with_default_model(provider: Provider) -> Self {
        Self::new(provider, provider.default_model())
    }
}
