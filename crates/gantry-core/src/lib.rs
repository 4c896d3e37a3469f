//! Gantry Core
//!
//! Core types, wire frames, errors, and I/O abstractions for the Gantry
//! distributed agent runtime.
//!
//! # Overview
//!
//! Gantry routes RPC requests, events, and state operations between
//! long-lived worker connections through a gateway that owns the placement
//! directory. This crate holds everything both sides of that wire share.
//!
//! # TigerStyle
//!
//! This crate follows explicit-limits engineering principles:
//! - Explicit limits with big-endian naming (e.g., `AGENT_KEY_LENGTH_BYTES_MAX`)
//! - Validation on construction
//! - Bounded iteration only

pub mod constants;
pub mod error;
pub mod ident;
pub mod io;
pub mod message;
pub mod retry;
pub mod state;
pub mod telemetry;

pub use constants::*;
pub use error::{Error, Result};
pub use ident::{AgentId, TopicId, WorkerId};
pub use io::{IoContext, MockClock, RngProvider, StdRngProvider, TimeProvider, WallClockTime};
pub use message::{
    encode_frame, read_frame, write_frame, AgentTypeManifest, Frame, RequestId,
};
pub use retry::RetryPolicy;
pub use state::{MemoryStateStore, StateStore};
pub use telemetry::{init_telemetry, TelemetryConfig};
