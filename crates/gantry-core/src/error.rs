//! Error types for Gantry
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Gantry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Gantry error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Routing Errors
    // =========================================================================
    #[error("no worker supports agent type: {agent_type}")]
    NoCapacity { agent_type: String },

    #[error("unknown agent type: {agent_type}")]
    UnknownAgentType { agent_type: String },

    #[error("unknown handler: {agent_type}::{method}")]
    UnknownHandler { agent_type: String, method: String },

    #[error("unmatched response for request {request_id}")]
    UnmatchedResponse { request_id: u64 },

    #[error("worker is stale: {worker_id}")]
    StaleWorker { worker_id: String },

    #[error("agent type already registered: {agent_type}")]
    DuplicateAgentType { agent_type: String },

    // =========================================================================
    // RPC Errors
    // =========================================================================
    #[error("rpc to {target} failed: {reason}")]
    RpcFailed { target: String, reason: String },

    #[error("rpc to {target} timed out after {timeout_ms}ms")]
    RpcTimeout { target: String, timeout_ms: u64 },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("invalid identifier: {ident}, reason: {reason}")]
    InvalidIdent { ident: String, reason: String },

    #[error("frame too large: {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // State Errors
    // =========================================================================
    #[error("no state stored for agent: {agent_id}")]
    StateNotFound { agent_id: String },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("transport error: {reason}")]
    Transport { reason: String },

    #[error("channel closed: {reason}")]
    ChannelClosed { reason: String },

    #[error("codec error: {reason}")]
    Codec { reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a no-capacity error
    pub fn no_capacity(agent_type: impl Into<String>) -> Self {
        Self::NoCapacity {
            agent_type: agent_type.into(),
        }
    }

    /// Create an unknown handler error
    pub fn unknown_handler(agent_type: impl Into<String>, method: impl Into<String>) -> Self {
        Self::UnknownHandler {
            agent_type: agent_type.into(),
            method: method.into(),
        }
    }

    /// Create an rpc failed error
    pub fn rpc_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RpcFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create a channel closed error
    pub fn channel_closed(reason: impl Into<String>) -> Self {
        Self::ChannelClosed {
            reason: reason.into(),
        }
    }

    /// Create a codec error
    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable
    ///
    /// Only transport-level transient conditions qualify. Application
    /// failures, including no-capacity routing, must surface to the caller
    /// unchanged.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
