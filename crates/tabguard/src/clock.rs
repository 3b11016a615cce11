//! Clocks for the wait engine
//!
//! The wait engine reads time and sleeps only through [`Clock`], so tests can
//! swap the real monotonic clock for a [`FakeClock`] whose sleeps advance
//! time instantly and are counted.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Monotonic time source and sleeper
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Thread-safe clock handle
pub type SharedClock = Arc<dyn Clock>;

// =============================================================================
// TOKIO CLOCK
// =============================================================================

/// Real clock backed by `tokio::time`
///
/// Honours tokio's paused test time, so `#[tokio::test(start_paused = true)]`
/// makes it deterministic as well.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    /// Create a clock whose origin is now
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// =============================================================================
// FAKE CLOCK
// =============================================================================

/// Fake clock for deterministic testing
///
/// `sleep` advances the clock by the requested duration and yields once to
/// the scheduler, so other tasks observe the new time.
#[derive(Debug, Default)]
pub struct FakeClock {
    /// Current time in nanoseconds since origin
    current_ns: AtomicU64,
    /// Number of completed sleeps
    sleeps: AtomicU64,
    /// Total time spent sleeping, in nanoseconds
    slept_ns: AtomicU64,
}

impl FakeClock {
    /// Create a fake clock at time zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared fake clock
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Move time forward without counting a sleep
    pub fn advance(&self, duration: Duration) {
        self.current_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Current fake time in milliseconds
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.current_ns.load(Ordering::SeqCst) / 1_000_000
    }

    /// Number of sleeps performed through this clock
    #[must_use]
    pub fn sleep_count(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }

    /// Total duration slept through this clock
    #[must_use]
    pub fn total_slept(&self) -> Duration {
        Duration::from_nanos(self.slept_ns.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.current_ns.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        let ns = duration.as_nanos() as u64;
        self.current_ns.fetch_add(ns, Ordering::SeqCst);
        self.slept_ns.fetch_add(ns, Ordering::SeqCst);
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}
