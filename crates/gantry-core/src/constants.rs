//! TigerStyle constants for Gantry
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Identity Limits
// =============================================================================

/// Maximum length of an agent type name in bytes
pub const AGENT_TYPE_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of an agent key in bytes
pub const AGENT_KEY_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a topic type name in bytes
pub const TOPIC_TYPE_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of a topic source in bytes
pub const TOPIC_SOURCE_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a worker ID in bytes
pub const WORKER_ID_LENGTH_BYTES_MAX: usize = 128;

// =============================================================================
// Wire Limits
// =============================================================================

/// Maximum size of a single wire frame in bytes (10 MB)
pub const FRAME_SIZE_BYTES_MAX: usize = 10 * 1024 * 1024;

/// Maximum size of an RPC or event payload in bytes (1 MB)
pub const PAYLOAD_SIZE_BYTES_MAX: usize = 1024 * 1024;

/// Depth of the per-connection outbound frame channel
pub const OUTBOUND_CHANNEL_DEPTH_MAX: usize = 1024;

// =============================================================================
// Liveness Limits
// =============================================================================

/// Maximum number of workers a gateway tracks
pub const WORKERS_COUNT_MAX: usize = 1000;

/// A worker silent for longer than this is evicted (30 sec)
pub const WORKER_TIMEOUT_MS: u64 = 30 * 1000;

/// Interval between liveness sweeps (10 sec)
pub const LIVENESS_SWEEP_INTERVAL_MS: u64 = 10 * 1000;

/// Interval between worker pings so idle workers stay live (10 sec)
pub const WORKER_PING_INTERVAL_MS: u64 = 10 * 1000;

// =============================================================================
// Retry and Timeout Limits
// =============================================================================

/// Maximum connect attempts before a worker gives up
pub const CONNECT_RETRY_COUNT_MAX: u32 = 10;

/// Base delay between connect attempts in milliseconds, doubled per attempt
pub const CONNECT_RETRY_BASE_MS: u64 = 100;

/// Upper bound on a single backoff delay in milliseconds (10 sec)
pub const CONNECT_RETRY_DELAY_MS_MAX: u64 = 10 * 1000;

/// Default timeout for a request awaiting its response (30 sec)
pub const RPC_TIMEOUT_MS_DEFAULT: u64 = 30 * 1000;

// Compile-time assertions for constant validity
const _: () = {
    assert!(AGENT_TYPE_LENGTH_BYTES_MAX >= 32);
    assert!(FRAME_SIZE_BYTES_MAX > PAYLOAD_SIZE_BYTES_MAX);
    assert!(WORKER_TIMEOUT_MS > WORKER_PING_INTERVAL_MS);
    assert!(WORKER_TIMEOUT_MS > LIVENESS_SWEEP_INTERVAL_MS);
    assert!(CONNECT_RETRY_DELAY_MS_MAX >= CONNECT_RETRY_BASE_MS);
};
