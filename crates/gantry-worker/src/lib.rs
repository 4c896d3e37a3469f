//! Gantry Worker
//!
//! Worker runtime hosting agent instances. A worker declares its agent types
//! in a static registry, connects to the gateway, and serves RPC and event
//! traffic for the instances placed on it. The same connection carries the
//! worker's own outbound calls, publishes, and state operations.

pub mod agent;
pub mod config;
pub mod runtime;

pub use agent::{Agent, AgentFactory, AgentTypeRegistry};
pub use config::WorkerConfig;
pub use runtime::{WorkerHandle, WorkerRuntime};
