//! Condition-Polling Wait Engine
//!
//! Blocks the calling flow until a predicate over observable state holds,
//! a hard timeout elapses, or the flow is cancelled.
//!
//! ## Polling contract
//!
//! - The predicate is evaluated immediately; an already-true predicate costs
//!   no sleep.
//! - After each unsuccessful evaluation the engine sleeps a full
//!   `poll_interval` before the next one, so evaluations are never closer
//!   together than the interval. Time spent inside the predicate pushes the
//!   schedule back.
//! - No evaluation starts once the elapsed time exceeds `timeout`, and none
//!   follows an evaluation that ended at or past it, so at most
//!   `floor(timeout / poll_interval) + 1` evaluations happen.
//! - A predicate error aborts the wait at once; it is never read as "not yet".
//! - Cancellation is raced against every sleep and wins ties.

use crate::clock::{SharedClock, TokioClock};
use crate::condition::WaitCondition;
use crate::result::{BoxError, WaitError, WaitResult};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default timeout for wait operations (10 seconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Default polling interval (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

// =============================================================================
// WAIT OPTIONS
// =============================================================================

/// Timeout and polling interval for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitOptions {
    /// Timeout in milliseconds; zero means "check once"
    pub timeout_ms: u64,
    /// Polling interval in milliseconds; must be non-zero
    pub poll_interval_ms: u64,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl WaitOptions {
    /// Create new wait options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout in milliseconds
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set polling interval in milliseconds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Build options from durations at millisecond precision
    ///
    /// The timeout is rounded down and a non-zero interval is rounded up, so
    /// the wait never runs longer or polls faster than asked. A zero interval
    /// stays zero and fails [`validate`](Self::validate).
    #[must_use]
    pub fn from_durations(timeout: Duration, poll_interval: Duration) -> Self {
        let interval_ns = poll_interval.as_nanos();
        let poll_interval_ms = interval_ns.div_ceil(1_000_000);
        Self {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            poll_interval_ms: u64::try_from(poll_interval_ms).unwrap_or(u64::MAX),
        }
    }

    /// Get timeout as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound on predicate evaluations: `ceil(timeout / interval) + 1`
    #[must_use]
    pub const fn max_polls(&self) -> u64 {
        if self.poll_interval_ms == 0 {
            return 1;
        }
        self.timeout_ms.div_ceil(self.poll_interval_ms) + 1
    }

    /// Reject a zero polling interval
    pub fn validate(&self) -> WaitResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(WaitError::InvalidOptions {
                message: "poll interval must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// WAIT OUTCOME
// =============================================================================

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaitOutcome {
    /// The predicate held
    Satisfied,
    /// The timeout elapsed first
    TimedOut,
    /// The surrounding flow was cancelled
    Cancelled,
}

impl WaitOutcome {
    /// Whether the predicate held
    #[must_use]
    pub const fn is_satisfied(self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

impl std::fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Satisfied => write!(f, "satisfied"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of a wait together with how it got there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitReport {
    /// How the wait ended
    pub outcome: WaitOutcome,
    /// Time from the first evaluation to the outcome
    pub elapsed: Duration,
    /// Number of predicate evaluations
    pub polls: u64,
    /// Description of what was waited for
    pub waited_for: String,
}

impl WaitReport {
    /// Whether the predicate held
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        self.outcome.is_satisfied()
    }
}

// =============================================================================
// WAITER IMPLEMENTATION
// =============================================================================

/// Polls predicates on a clock, honouring a cancellation token
#[derive(Debug, Clone)]
pub struct Waiter {
    clock: SharedClock,
    cancel: CancellationToken,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Waiter {
    /// Create a waiter on the real clock that is never cancelled
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(TokioClock::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Use a different clock
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Observe a cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The clock this waiter sleeps on
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// The token this waiter observes
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait for an async, fallible predicate
    pub async fn wait<F, Fut, E>(
        &self,
        options: &WaitOptions,
        waited_for: &str,
        mut predicate: F,
    ) -> WaitResult<WaitReport>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: Into<BoxError>,
    {
        options.validate()?;
        let timeout = options.timeout();
        let interval = options.poll_interval();

        let start = self.clock.now();
        let mut polls = 0u64;
        let report = |outcome: WaitOutcome, polls: u64| {
            let elapsed = self.clock.now().saturating_sub(start);
            debug!(
                %outcome,
                waited_for,
                elapsed_ms = elapsed.as_millis() as u64,
                polls,
                "wait finished"
            );
            WaitReport {
                outcome,
                elapsed,
                polls,
                waited_for: waited_for.to_string(),
            }
        };

        loop {
            if self.cancel.is_cancelled() {
                return Ok(report(WaitOutcome::Cancelled, polls));
            }

            polls += 1;
            trace!(waited_for, poll = polls, "evaluating predicate");
            match predicate().await {
                Ok(true) => return Ok(report(WaitOutcome::Satisfied, polls)),
                Ok(false) => {}
                Err(err) => {
                    return Err(WaitError::PredicateObservationFailed {
                        waited_for: waited_for.to_string(),
                        source: err.into(),
                    })
                }
            }

            // The next poll would land past the timeout.
            if self.clock.now().saturating_sub(start) >= timeout {
                return Ok(report(WaitOutcome::TimedOut, polls));
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Ok(report(WaitOutcome::Cancelled, polls));
                }
                () = self.clock.sleep(interval) => {}
            }

            if self.clock.now().saturating_sub(start) > timeout {
                return Ok(report(WaitOutcome::TimedOut, polls));
            }
        }
    }

    /// Wait for a synchronous, infallible predicate
    pub async fn wait_for_function<F>(
        &self,
        options: &WaitOptions,
        mut predicate: F,
    ) -> WaitResult<WaitReport>
    where
        F: FnMut() -> bool,
    {
        self.wait(options, "custom function", move || {
            futures::future::ready(Ok::<_, Infallible>(predicate()))
        })
        .await
    }

    /// Wait for a [`WaitCondition`]
    pub async fn wait_for_condition<C>(
        &self,
        condition: &C,
        options: &WaitOptions,
    ) -> WaitResult<WaitReport>
    where
        C: WaitCondition + ?Sized,
    {
        let description = condition.description();
        self.wait(options, &description, || condition.check()).await
    }
}

// =============================================================================
// CONVENIENCE FUNCTIONS
// =============================================================================

/// Poll a fallible predicate on the real clock
///
/// A zero `timeout` checks exactly once. The wait cannot be cancelled; use
/// [`wait_with`] and a [`Waiter`] built with [`Waiter::with_cancellation`]
/// for that.
pub async fn wait<F, E>(
    predicate: F,
    timeout: Duration,
    poll_interval: Duration,
) -> WaitResult<WaitOutcome>
where
    F: FnMut() -> Result<bool, E>,
    E: Into<BoxError>,
{
    wait_with(&Waiter::new(), predicate, timeout, poll_interval).await
}

/// Poll a fallible predicate with `waiter`'s clock and cancellation token
///
/// Durations are taken at millisecond precision, see
/// [`WaitOptions::from_durations`].
pub async fn wait_with<F, E>(
    waiter: &Waiter,
    mut predicate: F,
    timeout: Duration,
    poll_interval: Duration,
) -> WaitResult<WaitOutcome>
where
    F: FnMut() -> Result<bool, E>,
    E: Into<BoxError>,
{
    let options = WaitOptions::from_durations(timeout, poll_interval);
    let report = waiter
        .wait(&options, "predicate", move || {
            futures::future::ready(predicate())
        })
        .await?;
    Ok(report.outcome)
}

/// Wait for a condition with the default polling interval
pub async fn wait_until<F>(predicate: F, timeout_ms: u64) -> WaitResult<WaitOutcome>
where
    F: FnMut() -> bool,
{
    let options = WaitOptions::new().with_timeout(timeout_ms);
    let report = Waiter::new().wait_for_function(&options, predicate).await?;
    Ok(report.outcome)
}
