//! I/O abstraction layer
//!
//! TigerStyle: All time and randomness goes through abstraction traits so the
//! same business logic runs under production and simulated clocks.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Provider
// ============================================================================

/// Time provider abstraction
///
/// All code that needs current time or sleep MUST use this trait.
/// Never use `std::time::SystemTime::now()` directly.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Get current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration
    async fn sleep_ms(&self, ms: u64);

    /// Get monotonic timestamp (for measuring durations)
    fn monotonic_ms(&self) -> u64 {
        self.now_ms()
    }
}

/// Production time provider using wall clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    /// Create a new wall clock time provider
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
    }
}

/// Manually advanced clock for tests
///
/// `sleep_ms` advances the clock instead of waiting, so timeout paths run
/// instantly and deterministically.
#[derive(Debug)]
pub struct MockClock {
    now_ms: AtomicU64,
}

impl MockClock {
    /// Create a mock clock starting at the given timestamp
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Advance the clock by the given number of milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the clock to an absolute timestamp
    pub fn set_ms(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimeProvider for MockClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, ms: u64) {
        self.advance_ms(ms);
    }
}

// ============================================================================
// RNG Provider
// ============================================================================

/// Random number generator abstraction
///
/// All code that needs randomness MUST use this trait so tests can inject a
/// seeded generator.
pub trait RngProvider: Send + Sync + std::fmt::Debug {
    /// Generate a random u64
    fn next_u64(&self) -> u64;

    /// Generate random u64 in range [min, max)
    fn gen_range(&self, min: u64, max: u64) -> u64 {
        assert!(min < max, "min must be less than max");
        let range = max - min;
        min + (self.next_u64() % range)
    }
}

/// Production RNG provider
///
/// Uses an atomic xorshift64* state for thread-safety without locks.
/// Not cryptographically secure - use for non-security randomness only.
#[derive(Debug)]
pub struct StdRngProvider {
    state: AtomicU64,
}

impl Default for StdRngProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StdRngProvider {
    /// Create a new RNG provider seeded from system time
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        Self {
            state: AtomicU64::new(seed | 1),
        }
    }

    /// Create with specific seed (for testing)
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: AtomicU64::new(seed | 1),
        }
    }
}

impl RngProvider for StdRngProvider {
    fn next_u64(&self) -> u64 {
        // xorshift64*
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            let mut x = state;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            let new_state = x;

            match self.state.compare_exchange_weak(
                state,
                new_state,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return x.wrapping_mul(0x2545F4914F6CDD1D),
                Err(s) => state = s,
            }
        }
    }
}

// ============================================================================
// I/O Context
// ============================================================================

/// Bundle of all I/O providers
///
/// Pass this through the application instead of individual providers.
#[derive(Clone)]
pub struct IoContext {
    /// Time provider
    pub time: Arc<dyn TimeProvider>,
    /// RNG provider
    pub rng: Arc<dyn RngProvider>,
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("time", &self.time)
            .field("rng", &self.rng)
            .finish()
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::production()
    }
}

impl IoContext {
    /// Create production I/O context with real wall clock and RNG
    pub fn production() -> Self {
        Self {
            time: Arc::new(WallClockTime::new()),
            rng: Arc::new(StdRngProvider::new()),
        }
    }

    /// Create I/O context with custom providers
    pub fn new(time: Arc<dyn TimeProvider>, rng: Arc<dyn RngProvider>) -> Self {
        Self { time, rng }
    }

    /// Get current time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }

    /// Sleep for specified duration
    pub async fn sleep_ms(&self, ms: u64) {
        self.time.sleep_ms(ms).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_clock_time_now_ms() {
        let clock = WallClockTime::new();
        let now = clock.now_ms();

        // Should be a reasonable timestamp (after 2020)
        assert!(now > 1577836800000);

        let now2 = clock.now_ms();
        assert!(now2 >= now);
    }

    #[tokio::test]
    async fn test_mock_clock_sleep_advances() {
        let clock = MockClock::new(1000);
        assert_eq!(clock.now_ms(), 1000);

        clock.sleep_ms(500).await;
        assert_eq!(clock.now_ms(), 1500);

        clock.advance_ms(100);
        assert_eq!(clock.now_ms(), 1600);

        clock.set_ms(50);
        assert_eq!(clock.now_ms(), 50);
    }

    #[test]
    fn test_std_rng_provider_deterministic_with_seed() {
        let rng1 = StdRngProvider::with_seed(12345);
        let rng2 = StdRngProvider::with_seed(12345);

        assert_eq!(rng1.next_u64(), rng2.next_u64());
        assert_eq!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_std_rng_provider_gen_range() {
        let rng = StdRngProvider::with_seed(42);

        for _ in 0..100 {
            let value = rng.gen_range(10, 20);
            assert!(value >= 10);
            assert!(value < 20);
        }
    }

    #[test]
    fn test_io_context_production() {
        let ctx = IoContext::production();
        assert!(ctx.now_ms() > 1577836800000);
    }
}
