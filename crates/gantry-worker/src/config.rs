//! Worker configuration
//!
//! TigerStyle: Explicit configuration with bounded values.

use gantry_core::constants::{RPC_TIMEOUT_MS_DEFAULT, WORKER_PING_INTERVAL_MS};
use gantry_core::{RetryPolicy, WorkerId};
use std::net::SocketAddr;

/// Worker runtime configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Address of the gateway to connect to
    pub gateway_addr: SocketAddr,
    /// Worker identity; generated per connection when absent
    pub worker_id: Option<WorkerId>,
    /// Interval between keepalive pings
    pub ping_interval_ms: u64,
    /// How long a call waits for its response before timing out
    pub rpc_timeout_ms: u64,
    /// Backoff policy for the initial gateway connect
    pub connect_retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            gateway_addr: "127.0.0.1:7400".parse().unwrap(),
            worker_id: None,
            ping_interval_ms: WORKER_PING_INTERVAL_MS,
            rpc_timeout_ms: RPC_TIMEOUT_MS_DEFAULT,
            connect_retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// Create a configuration pointed at the given gateway
    pub fn new(gateway_addr: SocketAddr) -> Self {
        Self {
            gateway_addr,
            ..Default::default()
        }
    }

    /// Set a stable worker identity
    pub fn with_worker_id(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    /// Set the keepalive ping interval
    pub fn with_ping_interval(mut self, interval_ms: u64) -> Self {
        self.ping_interval_ms = interval_ms;
        self
    }

    /// Set the call timeout
    pub fn with_rpc_timeout(mut self, timeout_ms: u64) -> Self {
        self.rpc_timeout_ms = timeout_ms;
        self
    }

    /// Set the connect backoff policy
    pub fn with_connect_retry(mut self, policy: RetryPolicy) -> Self {
        self.connect_retry = policy;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.ping_interval_ms == 0 {
            return Err("ping interval must be positive".into());
        }

        if self.rpc_timeout_ms == 0 {
            return Err("rpc timeout must be positive".into());
        }

        if self.connect_retry.attempt_count_max == 0 {
            return Err("connect retry needs at least one attempt".into());
        }

        Ok(())
    }

    /// Create configuration for testing: short intervals, tight retries
    pub fn for_testing(gateway_addr: SocketAddr) -> Self {
        Self {
            gateway_addr,
            worker_id: None,
            ping_interval_ms: 100,
            rpc_timeout_ms: 5000,
            connect_retry: RetryPolicy::for_testing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_is_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.worker_id.is_none());
    }

    #[test]
    fn test_config_validation() {
        let invalid = WorkerConfig {
            ping_interval_ms: 0,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        let no_attempts = WorkerConfig::default().with_connect_retry(RetryPolicy {
            attempt_count_max: 0,
            base_delay_ms: 0,
            delay_ms_max: 0,
        });
        assert!(no_attempts.validate().is_err());
    }

    #[test]
    fn test_config_builders() {
        let id = WorkerId::new("worker-stable").unwrap();
        let config = WorkerConfig::new("127.0.0.1:9000".parse().unwrap())
            .with_worker_id(id.clone())
            .with_rpc_timeout(500);

        assert_eq!(config.worker_id, Some(id));
        assert_eq!(config.rpc_timeout_ms, 500);
        assert!(config.validate().is_ok());
    }
}
