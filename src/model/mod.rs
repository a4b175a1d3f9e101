//! Typed object model: identifiers, the node tagged union, and provider
//! bindings. The storage layer persists these; the context builder and
//! stream coordinator consume them.

pub mod ids;
pub mod node;
pub mod provider;

pub use ids::{ArtefactId, CommitId, NodeId, ProjectId, RefId, SessionId, UserId};
pub use node::{ContentBlock, MergeNode, MessageNode, NodeCommon, NodeKind, NodePayload, Role, StateNode};
pub use provider::{Provider, ProviderBinding};

/// Current millisecond UTC timestamp, the single time source for persisted
/// records.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The reserved trunk ref name. At most one per project; the trunk cannot
/// be renamed or deleted and is the only ref accepting direct canvas
/// saves.
pub const TRUNK_NAME: &str = "main";

/// The only artefact kind currently produced.
pub const CANVAS_KIND: &str = "canvas_md";
