//! Error types for the Tangent provenance core.
//!
//! This module defines a unified error enumeration used across the storage
//! layer, the ref-lock and lease protocol, branch and merge operations,
//! context assembly, and the streaming turn coordinator. It integrates with
//! `thiserror` to provide rich `Display` implementations and error source
//! chaining where applicable.
//!
//! Notes:
//! - Concurrency variants (`RefLocked`, `LeaseHeld`, `LeaseExpired`) are
//!   surfaced verbatim by the engines so callers can translate them into
//!   user-visible states.
//! - Storage failures chain the underlying `sea_orm::DbErr`.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the Tangent provenance core.
///
/// - Used across storage, lease, branch/merge, context and stream layers.
/// - Implements `std::error::Error` via `thiserror`.
pub enum CoreError {
    /// Project id does not resolve to a project.
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Ref id or name does not resolve to a ref within the project.
    #[error("Ref not found: {0}")]
    RefNotFound(String),

    /// Node id does not resolve to a node within the project.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Caller is not a member of the project, or not permitted to perform
    /// the operation (e.g. deleting a project it does not own).
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// The per-ref write lock could not be acquired within the configured
    /// timeout. Retryable.
    #[error("Ref is locked by a concurrent writer: {0}")]
    RefLocked(String),

    /// A different session holds a live lease on the ref.
    #[error("Lease held by session `{holder_session}` until {expires_at}")]
    LeaseHeld {
        holder_user: String,
        holder_session: String,
        /// Millisecond UTC timestamp at which the competing lease expires.
        expires_at: i64,
    },

    /// The caller's lease was displaced or timed out while an operation was
    /// in flight. Where the protocol allows it, the gated write has already
    /// been performed with the `interrupted` marker.
    #[error("Lease expired or displaced for ref {0}")]
    LeaseExpired(String),

    /// Bad input shape, empty required field, or an operation the data
    /// model forbids (e.g. merging from an empty ref).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unique-name clash on ref creation or rename.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upstream LLM provider failed mid-stream. Partial output preceding
    /// the failure is still persisted.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Underlying storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),

    /// Persisted payload could not be decoded.
    #[error("Payload decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Invariant violation or other unrecoverable internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::Internal(msg.into())
    }

    /// True for errors a client may retry after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::RefLocked(_) | CoreError::LeaseHeld { .. })
    }
}
