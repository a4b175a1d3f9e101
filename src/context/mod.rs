//! Context assembly: project a ref's history tail into an LLM-ready
//! message sequence under a token budget.
//!
//! The walk honors the model break: once an assistant node created under a
//! different `(provider, model)` binding is encountered (newest to
//! oldest), that node and everything older is fed as canonical text only,
//! so provider-native structures never leak across providers. Budgeting
//! never reorders; a node that does not fit is dropped and the walk
//! continues.

pub mod preamble;
pub mod tokens;

use std::collections::HashMap;

use crate::config::MergeAttribution;
use crate::model::{ContentBlock, NodePayload, ProviderBinding, RefId, Role};
use crate::store::TailNode;

/// Message content handed to the completion abstraction: plain text or an
/// ordered list of typed blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ContextContent {
    fn cost(&self) -> usize {
        match self {
            ContextContent::Text(t) => tokens::estimate_text(t),
            ContextContent::Blocks(b) => tokens::estimate_blocks(b),
        }
    }
}

/// One assembled message.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextMessage {
    pub role: Role,
    pub content: ContextContent,
}

/// The assembled turn input.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub system_preamble: String,
    pub messages: Vec<ContextMessage>,
}

/// Assembly options, resolved from config by the caller.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub token_limit: usize,
    pub merge_attribution: MergeAttribution,
    pub canvas_tools_available: bool,
}

/// Assemble context from a ref's tail.
///
/// `nodes` is oldest-first (as produced by the storage tail read);
/// `bindings` maps each node's creating ref to its current provider
/// binding, with deleted refs absent (treated as a model break).
pub fn assemble(
    nodes: &[TailNode],
    current: &ProviderBinding,
    bindings: &HashMap<RefId, ProviderBinding>,
    opts: &ContextOptions,
) -> AssembledContext {
    let canonical = canonical_fallback_mask(nodes, current, bindings);

    let has_hidden = nodes.iter().any(|n| {
        n.payload
            .as_message()
            .is_some_and(|m| m.is_hidden())
    });
    let system_preamble = preamble::system_preamble(opts.canvas_tools_available, has_hidden);

    let mut budget = opts
        .token_limit
        .saturating_sub(tokens::estimate_text(&system_preamble));
    let mut messages = Vec::new();

    for (i, node) in nodes.iter().enumerate() {
        match &node.payload {
            NodePayload::Message(m) => {
                if m.is_hidden() {
                    continue;
                }
                let role = match m.role {
                    Role::User | Role::Assistant => m.role,
                    Role::System => continue,
                };
                let content = render_message(m.role, &m.content, m.content_blocks.as_deref(), canonical[i], current);
                push_within_budget(&mut messages, ContextMessage { role, content }, &mut budget);
            }
            NodePayload::Merge(m) => {
                let summary = format!("Merge summary from {}: {}", m.merge_from, m.merge_summary);
                push_within_budget(
                    &mut messages,
                    ContextMessage {
                        role: opts.merge_attribution.role(),
                        content: ContextContent::Text(summary),
                    },
                    &mut budget,
                );
                if let Some(content) = &m.merged_assistant_content {
                    push_within_budget(
                        &mut messages,
                        ContextMessage {
                            role: Role::Assistant,
                            content: ContextContent::Text(content.clone()),
                        },
                        &mut budget,
                    );
                }
                // The merge's canvas diff is not context; the UI pins it
                // explicitly as an assistant message when wanted.
            }
            NodePayload::State(_) => {}
        }
    }

    AssembledContext {
        system_preamble,
        messages,
    }
}

/// Walk newest-to-oldest; flip to canonical at the first assistant node
/// whose creating ref is bound differently (or unknown), and stay flipped
/// for everything older.
fn canonical_fallback_mask(
    nodes: &[TailNode],
    current: &ProviderBinding,
    bindings: &HashMap<RefId, ProviderBinding>,
) -> Vec<bool> {
    let mut mask = vec![false; nodes.len()];
    let mut flipped = false;
    for (i, node) in nodes.iter().enumerate().rev() {
        if !flipped
            && node.payload.role() == Some(Role::Assistant)
            && bindings.get(&node.created_on_ref_id) != Some(current)
        {
            flipped = true;
        }
        mask[i] = flipped;
    }
    mask
}

fn render_message(
    role: Role,
    content: &str,
    blocks: Option<&[ContentBlock]>,
    canonical: bool,
    current: &ProviderBinding,
) -> ContextContent {
    if canonical || role != Role::Assistant {
        return ContextContent::Text(content.to_string());
    }
    match blocks {
        Some(blocks) if !blocks.is_empty() => {
            let redacted = current.provider.redact_context_blocks(blocks);
            if redacted.is_empty() {
                ContextContent::Text(content.to_string())
            } else {
                ContextContent::Blocks(redacted)
            }
        }
        _ => ContextContent::Text(content.to_string()),
    }
}

fn push_within_budget(
    messages: &mut Vec<ContextMessage>,
    message: ContextMessage,
    budget: &mut usize,
) {
    let cost = message.content.cost();
    if cost > *budget {
        return;
    }
    *budget -= cost;
    messages.push(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MergeNode, MessageNode, NodeCommon, NodeId, CommitId, Provider};

    fn tail(ordinal: i64, ref_id: &str, payload: NodePayload) -> TailNode {
        TailNode {
            ordinal,
            payload,
            created_on_ref_id: RefId::from(ref_id),
        }
    }

    fn message(
        id: &str,
        role: Role,
        content: &str,
        blocks: Option<Vec<ContentBlock>>,
    ) -> NodePayload {
        NodePayload::Message(MessageNode {
            common: NodeCommon {
                id: NodeId::from(id),
                timestamp: 0,
                parent: None,
            },
            role,
            content: content.into(),
            content_blocks: blocks,
            raw_response: None,
            response_id: None,
            interrupted: None,
            ui_hidden: None,
        })
    }

    fn opts(token_limit: usize) -> ContextOptions {
        ContextOptions {
            token_limit,
            merge_attribution: MergeAttribution::Assistant,
            canvas_tools_available: false,
        }
    }

    fn anthropic_blocks() -> Vec<ContentBlock> {
        vec![
            ContentBlock::Thinking { thinking: "mull it over".into() },
            ContentBlock::ThinkingSignature { signature: "sig".into() },
            ContentBlock::Text { text: "final answer".into() },
        ]
    }

    #[test]
    fn test_same_binding_keeps_blocks() {
        let current = ProviderBinding::new(Provider::Anthropic, "claude-sonnet-4-5");
        let bindings = HashMap::from([(RefId::from("main"), current.clone())]);
        let nodes = vec![
            tail(0, "main", message("u1", Role::User, "hello", None)),
            tail(1, "main", message("a1", Role::Assistant, "final answer", Some(anthropic_blocks()))),
        ];
        let out = assemble(&nodes, &current, &bindings, &opts(8000));
        assert_eq!(out.messages.len(), 2);
        match &out.messages[1].content {
            ContextContent::Blocks(blocks) => {
                assert!(blocks.iter().any(|b| b.is_signature()));
                assert!(blocks.iter().all(|b| !b.is_thinking()));
            }
            other => panic!("expected blocks, got {other:?}"),
        }
    }

    #[test]
    fn test_model_break_forces_canonical_for_older_nodes() {
        let p2 = ProviderBinding::new(Provider::Anthropic, "claude-sonnet-4-5");
        let p1 = ProviderBinding::new(Provider::Gemini, "gemini-2.5-pro");
        let bindings = HashMap::from([
            (RefId::from("old"), p1),
            (RefId::from("cur"), p2.clone()),
        ]);
        let nodes = vec![
            tail(0, "old", message("a1", Role::Assistant, "first", Some(vec![
                ContentBlock::Thinking { thinking: "gemini thoughts".into() },
                ContentBlock::Text { text: "first".into() },
            ]))),
            tail(1, "old", message("a2", Role::Assistant, "second", Some(vec![
                ContentBlock::Text { text: "second".into() },
            ]))),
            tail(2, "cur", message("a3", Role::Assistant, "third", Some(anthropic_blocks()))),
        ];
        let out = assemble(&nodes, &p2, &bindings, &opts(8000));
        assert_eq!(out.messages.len(), 3);
        // Older assistant turns created under the other binding fall back
        // to canonical text; no foreign thinking text survives.
        assert_eq!(out.messages[0].content, ContextContent::Text("first".into()));
        assert_eq!(out.messages[1].content, ContextContent::Text("second".into()));
        assert!(matches!(out.messages[2].content, ContextContent::Blocks(_)));
        for msg in &out.messages {
            if let ContextContent::Text(t) = &msg.content {
                assert!(!t.contains("gemini thoughts"));
            }
        }
    }

    #[test]
    fn test_deleted_ref_counts_as_break() {
        let current = ProviderBinding::new(Provider::Anthropic, "claude-sonnet-4-5");
        let bindings = HashMap::new();
        let nodes = vec![tail(
            0,
            "gone",
            message("a1", Role::Assistant, "text", Some(anthropic_blocks())),
        )];
        let out = assemble(&nodes, &current, &bindings, &opts(8000));
        assert_eq!(out.messages[0].content, ContextContent::Text("text".into()));
    }

    #[test]
    fn test_merge_expansion() {
        let current = ProviderBinding::new(Provider::Anthropic, "m");
        let bindings = HashMap::from([(RefId::from("main"), current.clone())]);
        let nodes = vec![tail(
            0,
            "main",
            NodePayload::Merge(MergeNode {
                common: NodeCommon {
                    id: NodeId::from("m1"),
                    timestamp: 0,
                    parent: None,
                },
                merge_from: "q1".into(),
                merge_summary: "carry answer".into(),
                source_commit: CommitId::from("c1"),
                source_node_ids: vec![],
                merged_assistant_node_id: None,
                merged_assistant_content: Some("the answer".into()),
                canvas_diff: Some("--- a\n+++ b\n".into()),
            }),
        )];
        let out = assemble(&nodes, &current, &bindings, &opts(8000));
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, Role::Assistant);
        assert_eq!(
            out.messages[0].content,
            ContextContent::Text("Merge summary from q1: carry answer".into())
        );
        assert_eq!(
            out.messages[1].content,
            ContextContent::Text("the answer".into())
        );
        // The canvas diff never enters context here.
        for msg in &out.messages {
            if let ContextContent::Text(t) = &msg.content {
                assert!(!t.contains("+++"));
            }
        }
    }

    #[test]
    fn test_hidden_and_state_nodes_skipped() {
        let current = ProviderBinding::new(Provider::Anthropic, "m");
        let bindings = HashMap::from([(RefId::from("main"), current.clone())]);
        let mut hidden = message("u1", Role::User, "canvas update", None);
        if let NodePayload::Message(m) = &mut hidden {
            m.ui_hidden = Some(true);
        }
        let nodes = vec![
            tail(0, "main", hidden),
            tail(1, "main", message("u2", Role::User, "visible", None)),
        ];
        let out = assemble(&nodes, &current, &bindings, &opts(8000));
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].content, ContextContent::Text("visible".into()));
        // The hidden message still triggers the preamble segment.
        assert!(out.system_preamble.contains("automated canvas updates"));
    }

    #[test]
    fn test_budget_drops_without_reordering() {
        let current = ProviderBinding::new(Provider::Anthropic, "m");
        let bindings = HashMap::from([(RefId::from("main"), current.clone())]);
        let preamble_cost = tokens::estimate_text(&preamble::system_preamble(false, false));
        let nodes = vec![
            tail(0, "main", message("u1", Role::User, &"x".repeat(400), None)),
            tail(1, "main", message("u2", Role::User, "tiny", None)),
        ];
        // Room for the preamble and the small message only.
        let out = assemble(&nodes, &current, &bindings, &opts(preamble_cost + 10));
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].content, ContextContent::Text("tiny".into()));
    }

    #[test]
    fn test_budget_smaller_than_preamble_yields_empty_messages() {
        let current = ProviderBinding::new(Provider::Anthropic, "m");
        let bindings = HashMap::from([(RefId::from("main"), current.clone())]);
        let nodes = vec![tail(0, "main", message("u1", Role::User, "hello", None))];
        let out = assemble(&nodes, &current, &bindings, &opts(1));
        assert!(out.messages.is_empty());
        assert!(!out.system_preamble.is_empty());
    }
}
