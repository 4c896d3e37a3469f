//! Wire frames and framing codec
//!
//! TigerStyle: Explicit message types with bounded payloads.
//!
//! Wire protocol: [4-byte big-endian length][JSON payload]

use crate::constants::{
    AGENT_TYPE_LENGTH_BYTES_MAX, FRAME_SIZE_BYTES_MAX, TOPIC_TYPE_LENGTH_BYTES_MAX,
};
use crate::error::{Error, Result};
use crate::ident::{AgentId, TopicId, WorkerId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Request ID, unique per connection (rewritten by the gateway in flight)
pub type RequestId = u64;

/// What a worker declares about one agent type it hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTypeManifest {
    /// The agent type name
    pub agent_type: String,
    /// Event types this agent type declares a handler for
    pub handled_events: Vec<String>,
    /// Topic types this agent type subscribes to
    pub subscriptions: Vec<String>,
}

impl AgentTypeManifest {
    /// Create a manifest with no event handlers or subscriptions
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            handled_events: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Declare a handled event type
    pub fn with_handled_event(mut self, event_type: impl Into<String>) -> Self {
        self.handled_events.push(event_type.into());
        self
    }

    /// Declare a topic type subscription
    pub fn with_subscription(mut self, topic_type: impl Into<String>) -> Self {
        self.subscriptions.push(topic_type.into());
        self
    }

    /// Validate the manifest's name components
    ///
    /// Manifests arrive on the wire as plain strings; the gateway rejects
    /// names that could not form a valid identity.
    pub fn validate(&self) -> Result<()> {
        crate::ident::validate_name(&self.agent_type, AGENT_TYPE_LENGTH_BYTES_MAX, "agent type")?;
        for topic_type in &self.subscriptions {
            crate::ident::validate_name(topic_type, TOPIC_TYPE_LENGTH_BYTES_MAX, "topic type")?;
        }
        Ok(())
    }
}

/// Frame types exchanged between a worker and the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    // =========================================================================
    // Connection Lifecycle
    // =========================================================================
    /// First frame a worker sends: identify itself and its agent types
    Registration {
        worker_id: WorkerId,
        manifests: Vec<AgentTypeManifest>,
    },

    /// Keepalive so an idle worker is not evicted
    Ping { worker_id: WorkerId },

    // =========================================================================
    // Request / Response
    // =========================================================================
    /// Invoke a method on an agent instance
    RpcRequest {
        request_id: RequestId,
        target: AgentId,
        method: String,
        payload: Bytes,
    },

    /// Response to an RpcRequest, carrying the same request ID
    RpcResponse {
        request_id: RequestId,
        result: std::result::Result<Bytes, String>,
    },

    // =========================================================================
    // Events
    // =========================================================================
    /// Publish an event on a topic (worker to gateway, fire-and-forget)
    Event {
        topic: TopicId,
        event_type: String,
        payload: Bytes,
    },

    /// Deliver an event to one agent instance (gateway to worker)
    EventDelivery {
        target: AgentId,
        topic: TopicId,
        event_type: String,
        payload: Bytes,
    },

    // =========================================================================
    // State
    // =========================================================================
    /// Persist an agent's state blob
    StoreState {
        request_id: RequestId,
        agent_id: AgentId,
        payload: Bytes,
    },

    /// Acknowledge a StoreState
    StoreStateAck {
        request_id: RequestId,
        result: std::result::Result<(), String>,
    },

    /// Read an agent's state blob
    ReadState {
        request_id: RequestId,
        agent_id: AgentId,
    },

    /// Result of a ReadState; `Ok(None)` means no state was ever stored,
    /// distinct from an empty payload
    ReadStateResult {
        request_id: RequestId,
        result: std::result::Result<Option<Bytes>, String>,
    },
}

impl Frame {
    /// Get the request ID if this frame has one
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Registration { .. } => None,
            Self::Ping { .. } => None,
            Self::Event { .. } => None,
            Self::EventDelivery { .. } => None,
            Self::RpcRequest { request_id, .. } => Some(*request_id),
            Self::RpcResponse { request_id, .. } => Some(*request_id),
            Self::StoreState { request_id, .. } => Some(*request_id),
            Self::StoreStateAck { request_id, .. } => Some(*request_id),
            Self::ReadState { request_id, .. } => Some(*request_id),
            Self::ReadStateResult { request_id, .. } => Some(*request_id),
        }
    }

    /// Check if this is a response frame
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Self::RpcResponse { .. } | Self::StoreStateAck { .. } | Self::ReadStateResult { .. }
        )
    }

    /// Static name of the frame variant, for logging
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::Registration { .. } => "registration",
            Self::Ping { .. } => "ping",
            Self::RpcRequest { .. } => "rpc_request",
            Self::RpcResponse { .. } => "rpc_response",
            Self::Event { .. } => "event",
            Self::EventDelivery { .. } => "event_delivery",
            Self::StoreState { .. } => "store_state",
            Self::StoreStateAck { .. } => "store_state_ack",
            Self::ReadState { .. } => "read_state",
            Self::ReadStateResult { .. } => "read_state_result",
        }
    }
}

// =============================================================================
// Framing Codec
// =============================================================================

/// Encode a frame as [4-byte big-endian length][JSON payload]
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(frame).map_err(|e| Error::codec(e.to_string()))?;

    if json.len() > FRAME_SIZE_BYTES_MAX {
        return Err(Error::FrameTooLarge {
            size: json.len(),
            limit: FRAME_SIZE_BYTES_MAX,
        });
    }

    let mut buf = Vec::with_capacity(4 + json.len());
    buf.extend_from_slice(&(json.len() as u32).to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Write a single frame to the stream
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let buf = encode_frame(frame)?;
    writer
        .write_all(&buf)
        .await
        .map_err(|e| Error::transport(format!("write failed: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::transport(format!("flush failed: {}", e)))?;
    Ok(())
}

/// Read a single frame from the stream
///
/// Returns `Ok(None)` on clean EOF at a frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::transport(format!("read length failed: {}", e))),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > FRAME_SIZE_BYTES_MAX {
        return Err(Error::FrameTooLarge {
            size: len,
            limit: FRAME_SIZE_BYTES_MAX,
        });
    }

    let mut buffer = vec![0u8; len];
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(|e| Error::transport(format!("read payload failed: {}", e)))?;

    let frame = serde_json::from_slice(&buffer).map_err(|e| Error::codec(e.to_string()))?;
    Ok(Some(frame))
}
