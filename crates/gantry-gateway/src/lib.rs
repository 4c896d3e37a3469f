//! Gantry Gateway
//!
//! Terminates worker connections and routes frames between them: RPC
//! requests and responses (with correlation ID rewriting), event fan-out,
//! and state store proxying. Liveness is tracked per worker and enforced by
//! a periodic eviction sweep.

pub mod config;
pub mod connection;
pub mod gateway;

pub use config::GatewayConfig;
pub use connection::ConnectionHandle;
pub use gateway::Gateway;
