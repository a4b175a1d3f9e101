//! The node object model.
//!
//! A node is the application-level event attached to a commit: a user or
//! assistant turn (`message`), a canvas checkpoint (`state`), or a merge
//! marker (`merge`). Nodes are a tagged union; the persisted JSON shape is
//! camelCase with a `type` discriminant and is immutable once written.
//!
//! The payload's `parent` field and a merge node's `sourceNodeIds` are
//! navigation hints for consumers; authoritative lineage always comes from
//! the commit DAG and the per-ref commit order.

use serde::{Deserialize, Serialize};

use crate::model::ids::{CommitId, NodeId};

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of the node union, mirrored into a storage column so
/// history reads can filter without decoding payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Message,
    State,
    Merge,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Message => "message",
            NodeKind::State => "state",
            NodeKind::Merge => "merge",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(NodeKind::Message),
            "state" => Ok(NodeKind::State),
            "merge" => Ok(NodeKind::Merge),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

/// One typed block of structured assistant output.
///
/// Raw provider payloads are stored opaquely elsewhere; blocks are the
/// provider-neutral projection the context builder redacts per provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Thinking { thinking: String },
    ThinkingSignature { signature: String },
}

impl ContentBlock {
    /// Visible textual content of the block, for token estimation.
    /// Signatures carry no reader-visible text.
    pub fn visible_text(&self) -> &str {
        match self {
            ContentBlock::Text { text } => text,
            ContentBlock::Thinking { thinking } => thinking,
            ContentBlock::ThinkingSignature { .. } => "",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ContentBlock::Text { .. })
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self, ContentBlock::Thinking { .. })
    }

    pub fn is_signature(&self) -> bool {
        matches!(self, ContentBlock::ThinkingSignature { .. })
    }
}

/// Fields shared by every node variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCommon {
    pub id: NodeId,
    /// Millisecond UTC timestamp.
    pub timestamp: i64,
    /// Previous node on the creating ref, if any. Navigation hint only.
    pub parent: Option<NodeId>,
}

/// A user, assistant, or system turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNode {
    #[serde(flatten)]
    pub common: NodeCommon,
    pub role: Role,
    /// Canonical text, always present (possibly empty for an interrupted
    /// assistant turn that produced no chunks).
    pub content: String,
    /// Structured blocks for providers that emit thinking/signature/text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_blocks: Option<Vec<ContentBlock>>,
    /// Opaque raw provider payload, stored as-is. Consumers must not
    /// reorder or reshape it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// True when the stream was aborted or the provider errored mid-turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    /// Hidden canvas-update messages the UI injects; excluded from context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_hidden: Option<bool>,
}

/// A canvas checkpoint produced by an explicit canvas save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateNode {
    #[serde(flatten)]
    pub common: NodeCommon,
    /// Content hash of the artefact written on the same commit.
    pub artefact_snapshot: String,
}

/// A structural "ours" merge marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeNode {
    #[serde(flatten)]
    pub common: NodeCommon,
    /// Source ref display name at the time of the merge.
    pub merge_from: String,
    /// Human-authored summary carried into context.
    pub merge_summary: String,
    /// Source ref tip at the time of the merge (the commit's second parent).
    pub source_commit: CommitId,
    /// Nodes exclusive to the source ref since divergence, oldest first.
    pub source_node_ids: Vec<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_assistant_node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_assistant_content: Option<String>,
    /// Unified diff of the source canvas against the target's latest
    /// canvas, when the two differ.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canvas_diff: Option<String>,
}

/// The node tagged union. `type` is the wire discriminant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodePayload {
    Message(MessageNode),
    State(StateNode),
    Merge(MergeNode),
}

impl NodePayload {
    pub fn id(&self) -> &NodeId {
        &self.common().id
    }

    pub fn common(&self) -> &NodeCommon {
        match self {
            NodePayload::Message(m) => &m.common,
            NodePayload::State(s) => &s.common,
            NodePayload::Merge(m) => &m.common,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodePayload::Message(_) => NodeKind::Message,
            NodePayload::State(_) => NodeKind::State,
            NodePayload::Merge(_) => NodeKind::Merge,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            NodePayload::Message(m) => Some(m.role),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&MessageNode> {
        match self {
            NodePayload::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_merge(&self) -> Option<&MergeNode> {
        match self {
            NodePayload::Merge(m) => Some(m),
            _ => None,
        }
    }

    /// Response id carried by an assistant message, if any.
    pub fn response_id(&self) -> Option<&str> {
        self.as_message().and_then(|m| m.response_id.as_deref())
    }
}

impl MessageNode {
    /// Plain user/assistant/system turn with text content.
    pub fn text(id: NodeId, timestamp: i64, parent: Option<NodeId>, role: Role, content: impl Into<String>) -> Self {
        Self {
            common: NodeCommon { id, timestamp, parent },
            role,
            content: content.into(),
            content_blocks: None,
            raw_response: None,
            response_id: None,
            interrupted: None,
            ui_hidden: None,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.ui_hidden.unwrap_or(false)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_fixture() -> NodePayload {
        NodePayload::Message(MessageNode {
            common: NodeCommon {
                id: NodeId::from("n-1"),
                timestamp: 1_700_000_000_000,
                parent: None,
            },
            role: Role::Assistant,
            content: "Hi there.".into(),
            content_blocks: Some(vec![
                ContentBlock::Thinking { thinking: "hm".into() },
                ContentBlock::ThinkingSignature { signature: "sig".into() },
                ContentBlock::Text { text: "Hi there.".into() },
            ]),
            raw_response: Some(serde_json::json!({"provider": "raw"})),
            response_id: Some("resp-1".into()),
            interrupted: None,
            ui_hidden: None,
        })
    }

    #[test]
    fn test_message_wire_shape() {
        let v = serde_json::to_value(message_fixture()).unwrap();
        assert_eq!(v["type"], "message");
        assert_eq!(v["id"], "n-1");
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["contentBlocks"][1]["type"], "thinking_signature");
        assert_eq!(v["rawResponse"]["provider"], "raw");
        assert_eq!(v["responseId"], "resp-1");
        // Absent optionals are omitted, not null.
        assert!(v.get("interrupted").is_none());
        assert!(v.get("uiHidden").is_none());
    }

    #[test]
    fn test_merge_wire_shape() {
        let merge = NodePayload::Merge(MergeNode {
            common: NodeCommon {
                id: NodeId::from("n-2"),
                timestamp: 1,
                parent: Some(NodeId::from("n-1")),
            },
            merge_from: "q1".into(),
            merge_summary: "carry answer".into(),
            source_commit: CommitId::from("c-9"),
            source_node_ids: vec![NodeId::from("a"), NodeId::from("b")],
            merged_assistant_node_id: None,
            merged_assistant_content: Some("answer".into()),
            canvas_diff: None,
        });
        let v = serde_json::to_value(&merge).unwrap();
        assert_eq!(v["type"], "merge");
        assert_eq!(v["mergeFrom"], "q1");
        assert_eq!(v["mergeSummary"], "carry answer");
        assert_eq!(v["sourceCommit"], "c-9");
        assert_eq!(v["sourceNodeIds"], serde_json::json!(["a", "b"]));
        assert_eq!(v["mergedAssistantContent"], "answer");
        assert_eq!(v["parent"], "n-1");
    }

    #[test]
    fn test_state_wire_shape() {
        let state = NodePayload::State(StateNode {
            common: NodeCommon {
                id: NodeId::from("n-3"),
                timestamp: 2,
                parent: None,
            },
            artefact_snapshot: "deadbeef".into(),
        });
        let v = serde_json::to_value(&state).unwrap();
        assert_eq!(v["type"], "state");
        assert_eq!(v["artefactSnapshot"], "deadbeef");
    }

    #[test]
    fn test_roundtrip() {
        let payload = message_fixture();
        let json = serde_json::to_string(&payload).unwrap();
        let back: NodePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.kind(), NodeKind::Message);
        assert_eq!(back.response_id(), Some("resp-1"));
    }
}
