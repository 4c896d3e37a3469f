//! Gateway configuration
//!
//! TigerStyle: Explicit configuration with bounded values.

use gantry_core::constants::{LIVENESS_SWEEP_INTERVAL_MS, WORKER_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the gateway listens on for worker connections
    pub listen_addr: SocketAddr,
    /// A worker silent for longer than this is evicted
    pub worker_timeout_ms: u64,
    /// Interval between liveness sweeps
    pub sweep_interval_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7400".parse().unwrap(),
            worker_timeout_ms: WORKER_TIMEOUT_MS,
            sweep_interval_ms: LIVENESS_SWEEP_INTERVAL_MS,
        }
    }
}

impl GatewayConfig {
    /// Create a new gateway configuration
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    /// Set the worker eviction timeout
    pub fn with_worker_timeout(mut self, timeout_ms: u64) -> Self {
        self.worker_timeout_ms = timeout_ms;
        self
    }

    /// Set the liveness sweep interval
    pub fn with_sweep_interval(mut self, interval_ms: u64) -> Self {
        self.sweep_interval_ms = interval_ms;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_timeout_ms == 0 {
            return Err("worker timeout must be positive".into());
        }

        if self.sweep_interval_ms == 0 {
            return Err("sweep interval must be positive".into());
        }

        if self.sweep_interval_ms >= self.worker_timeout_ms {
            return Err("sweep interval must be shorter than the worker timeout".into());
        }

        Ok(())
    }

    /// Create configuration for testing: ephemeral port, short timeouts
    pub fn for_testing() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            worker_timeout_ms: 1000,
            sweep_interval_ms: 100,
        }
    }
}
