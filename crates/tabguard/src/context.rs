//! New-Context Lifecycle Management
//!
//! Enter a browsing context opened as a side effect of a page interaction,
//! verify something inside it, then close it and return focus home.
//!
//! ```text
//!            with_new_context(trigger, verify)
//!   Idle ───────────────────────────────────────► AwaitingNewContext
//!    ▲                                                 │         │
//!    │              timed out / cancelled / failed     │         │ new handle
//!    ├─────────────────────────────────────────────────┘         ▼
//!    │                                                      InNewContext
//!    │                                                           │ verify done
//!    │      close selected handle, focus home                    ▼
//!    └────────────────────────────────────────────────── ClosingAndRestoring
//! ```
//!
//! Only one operation may be in flight per manager: focus is a single piece
//! of shared state, so a second call is rejected instead of queued.

use crate::clock::SharedClock;
use crate::config::TabguardConfig;
use crate::result::{BoxError, CleanupStage, ContextError, ContextResult, SessionError};
use crate::session::{BrowsingSession, ContextHandle, ContextSet};
use crate::wait::{WaitOptions, WaitOutcome, Waiter};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// STATE
// =============================================================================

/// Lifecycle state of a [`ContextManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextState {
    /// Focus is home, nothing in flight
    Idle,
    /// Trigger fired, polling for a new handle
    AwaitingNewContext,
    /// Focus switched, verification running
    InNewContext,
    /// Closing the new context and restoring focus
    ClosingAndRestoring,
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingNewContext => write!(f, "awaiting new context"),
            Self::InNewContext => write!(f, "in new context"),
            Self::ClosingAndRestoring => write!(f, "closing and restoring"),
        }
    }
}

/// Marks an operation in flight; resets the manager to `Idle` when dropped,
/// including when the operation's future is dropped mid-way.
struct InFlight<'a> {
    state: &'a Mutex<ContextState>,
}

impl<'a> InFlight<'a> {
    fn begin(state: &'a Mutex<ContextState>) -> ContextResult<Self> {
        let mut current = state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != ContextState::Idle {
            return Err(ContextError::ConcurrentContextOperation { state: *current });
        }
        *current = ContextState::AwaitingNewContext;
        Ok(Self { state })
    }

    fn advance(&self, next: ContextState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(from = %*current, to = %next, "context state");
        *current = next;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ContextState::Idle;
    }
}

// =============================================================================
// VISIT RESULT
// =============================================================================

/// Non-fatal conditions observed during an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextWarning {
    /// Several contexts appeared; the most recent was used, the rest left open
    AmbiguousNewContext {
        /// Handle that was entered and closed
        selected: ContextHandle,
        /// Handles left for the caller to reconcile
        unselected: Vec<ContextHandle>,
    },
    /// The context was already gone when cleanup tried to close it
    AlreadyClosed(ContextHandle),
}

/// Successful visit to a new context
#[derive(Debug, Clone)]
pub struct ContextVisit<T> {
    /// Handle that was entered
    pub handle: ContextHandle,
    /// Value returned by the verify callback
    pub value: T,
    /// Time spent waiting for the context to appear
    pub waited: Duration,
    /// Warnings raised along the way
    pub warnings: Vec<ContextWarning>,
}

impl<T> ContextVisit<T> {
    /// Whether more than one context appeared
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, ContextWarning::AmbiguousNewContext { .. }))
    }

    /// Unwrap the verify value
    pub fn into_value(self) -> T {
        self.value
    }

    /// Treat ambiguity as fatal
    pub fn into_strict(self) -> ContextResult<T> {
        for warning in self.warnings {
            if let ContextWarning::AmbiguousNewContext {
                selected,
                unselected,
            } = warning
            {
                return Err(ContextError::AmbiguousNewContext {
                    selected,
                    unselected,
                });
            }
        }
        Ok(self.value)
    }
}

enum Verdict<T> {
    Verified(T),
    VerifyFailed(BoxError),
    SwitchFailed(SessionError),
    Cancelled,
}

struct CleanupFailure {
    stage: CleanupStage,
    handle: ContextHandle,
    source: SessionError,
}

impl CleanupFailure {
    fn into_error(self, verify_error: Option<BoxError>) -> ContextError {
        error!(
            stage = %self.stage,
            handle = %self.handle,
            error = %self.source,
            superseded = ?verify_error.as_ref().map(ToString::to_string),
            "context cleanup failed"
        );
        ContextError::CleanupFailed {
            stage: self.stage,
            handle: self.handle,
            source: self.source,
            verify_error,
        }
    }
}

// =============================================================================
// CONTEXT MANAGER
// =============================================================================

/// Owns the home context pointer for one scenario
#[derive(Debug)]
pub struct ContextManager<S> {
    session: S,
    home: ContextHandle,
    options: WaitOptions,
    waiter: Waiter,
    restore_check: bool,
    state: Mutex<ContextState>,
}

impl<S: BrowsingSession> ContextManager<S> {
    /// Create a manager whose home is `home`
    pub fn new(session: S, home: ContextHandle) -> Self {
        Self {
            session,
            home,
            options: WaitOptions::default(),
            waiter: Waiter::new(),
            restore_check: true,
            state: Mutex::new(ContextState::Idle),
        }
    }

    /// Create a manager whose home is the currently focused context
    pub async fn attach(session: S) -> ContextResult<Self> {
        let home = session.current_context().await?;
        info!(home = %home, "attached context manager");
        Ok(Self::new(session, home))
    }

    /// Set timeout and polling for new-context waits
    #[must_use]
    pub fn with_options(mut self, options: WaitOptions) -> Self {
        self.options = options;
        self
    }

    /// Apply a loaded configuration
    #[must_use]
    pub fn with_config(mut self, config: &TabguardConfig) -> Self {
        self.restore_check = config.restore_check;
        self.with_options(config.new_context_options())
    }

    /// Poll on a different clock
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.waiter = self.waiter.with_clock(clock);
        self
    }

    /// Observe a cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.waiter = self.waiter.with_cancellation(token);
        self
    }

    /// The home context
    #[must_use]
    pub const fn home(&self) -> &ContextHandle {
        &self.home
    }

    /// The underlying session
    #[must_use]
    pub const fn session(&self) -> &S {
        &self.session
    }

    /// Options used for new-context waits
    #[must_use]
    pub const fn options(&self) -> &WaitOptions {
        &self.options
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ContextState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open, verify, close and return, using the configured timeout
    pub async fn with_new_context<T, Trig, TrigFut, TrigErr, V, VFut, VErr>(
        &self,
        trigger: Trig,
        verify: V,
    ) -> ContextResult<ContextVisit<T>>
    where
        Trig: FnOnce() -> TrigFut,
        TrigFut: Future<Output = Result<(), TrigErr>>,
        TrigErr: Into<BoxError>,
        V: FnOnce(ContextHandle) -> VFut,
        VFut: Future<Output = Result<T, VErr>>,
        VErr: Into<BoxError>,
    {
        self.with_new_context_timeout(self.options.timeout(), trigger, verify)
            .await
    }

    /// Open, verify, close and return
    ///
    /// On return focus is on the home context and the context opened by
    /// `trigger` is closed, whatever `verify` did. A `verify` failure is
    /// returned as [`ContextError::VerifyFailed`] after cleanup; a cleanup
    /// failure outranks it and carries it in `verify_error`.
    pub async fn with_new_context_timeout<T, Trig, TrigFut, TrigErr, V, VFut, VErr>(
        &self,
        timeout: Duration,
        trigger: Trig,
        verify: V,
    ) -> ContextResult<ContextVisit<T>>
    where
        Trig: FnOnce() -> TrigFut,
        TrigFut: Future<Output = Result<(), TrigErr>>,
        TrigErr: Into<BoxError>,
        V: FnOnce(ContextHandle) -> VFut,
        VFut: Future<Output = Result<T, VErr>>,
        VErr: Into<BoxError>,
    {
        let options = WaitOptions::from_durations(timeout, self.options.poll_interval());
        options.validate()?;
        let guard = InFlight::begin(&self.state)?;

        let before = self.session.current_contexts().await?;
        debug!(home = %self.home, open = before.len(), "snapshot before trigger");

        if let Err(err) = trigger().await {
            let err: BoxError = err.into();
            warn!(error = %err, "trigger failed");
            self.abandon(&before).await.map_err(|f| f.into_error(None))?;
            return Err(ContextError::TriggerFailed(err));
        }

        let session = &self.session;
        let snapshot = &before;
        let waited = self
            .waiter
            .wait(&options, "new browsing context", move || async move {
                Ok::<_, SessionError>(session.current_contexts().await?.has_new_since(snapshot))
            })
            .await;

        let report = match waited {
            Ok(report) => report,
            Err(err) => {
                self.abandon(&before).await.map_err(|f| f.into_error(None))?;
                return Err(err.into());
            }
        };

        match report.outcome {
            WaitOutcome::Satisfied => {}
            WaitOutcome::TimedOut => {
                info!(timeout_ms = options.timeout_ms, "no new context opened");
                self.abandon(&before).await.map_err(|f| f.into_error(None))?;
                return Err(ContextError::NewContextNotOpened { timeout });
            }
            WaitOutcome::Cancelled => {
                info!("cancelled while awaiting new context");
                self.abandon(&before).await.map_err(|f| f.into_error(None))?;
                return Err(ContextError::Cancelled);
            }
        }

        let after = match self.session.current_contexts().await {
            Ok(after) => after,
            Err(err) => {
                warn!(error = %err, "listing contexts failed after one appeared");
                self.abandon(&before).await.map_err(|f| f.into_error(None))?;
                return Err(err.into());
            }
        };
        let mut new_handles = after.difference(&before);
        // The context can vanish between the last poll and this snapshot.
        let Some(selected) = new_handles.pop() else {
            self.abandon(&before).await.map_err(|f| f.into_error(None))?;
            return Err(ContextError::NewContextNotOpened { timeout });
        };

        let mut warnings = Vec::new();
        if !new_handles.is_empty() {
            warn!(
                selected = %selected,
                unselected = ?new_handles,
                "several new contexts opened; using the most recent"
            );
            warnings.push(ContextWarning::AmbiguousNewContext {
                selected: selected.clone(),
                unselected: new_handles,
            });
        }

        guard.advance(ContextState::InNewContext);
        info!(handle = %selected, waited_ms = report.elapsed.as_millis() as u64, "entering new context");
        let verdict = match self.session.switch_to(&selected).await {
            Ok(()) => {
                let cancel = self.waiter.cancellation();
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Verdict::Cancelled,
                    result = verify(selected.clone()) => match result {
                        Ok(value) => Verdict::Verified(value),
                        Err(err) => Verdict::VerifyFailed(err.into()),
                    },
                }
            }
            Err(err) => Verdict::SwitchFailed(err),
        };

        guard.advance(ContextState::ClosingAndRestoring);
        let cleanup = self.close_and_restore(&selected).await;
        info!(handle = %selected, "left new context");

        match cleanup {
            Err(failure) => {
                let verify_error = match verdict {
                    Verdict::VerifyFailed(err) => Some(err),
                    _ => None,
                };
                Err(failure.into_error(verify_error))
            }
            Ok(closed_warning) => {
                warnings.extend(closed_warning);
                match verdict {
                    Verdict::Verified(value) => Ok(ContextVisit {
                        handle: selected,
                        value,
                        waited: report.elapsed,
                        warnings,
                    }),
                    Verdict::VerifyFailed(err) => Err(ContextError::VerifyFailed(err)),
                    Verdict::SwitchFailed(err) => Err(ContextError::Session(err)),
                    Verdict::Cancelled => Err(ContextError::Cancelled),
                }
            }
        }
    }

    /// Close whatever appeared since `before`, then go home
    async fn abandon(&self, before: &ContextSet) -> Result<(), CleanupFailure> {
        // Best-effort: if listing fails nothing can be closed, but focus is
        // still restored.
        if let Ok(now) = self.session.current_contexts().await {
            for handle in now.difference(before) {
                warn!(handle = %handle, "closing context opened outside the visit");
                self.close_context(&handle).await?;
            }
        }
        self.restore_home().await
    }

    /// Close the visited context, then go home; both steps always run
    async fn close_and_restore(
        &self,
        handle: &ContextHandle,
    ) -> Result<Option<ContextWarning>, CleanupFailure> {
        let closed = self.close_context(handle).await;
        let restored = self.restore_home().await;
        let warning = closed?;
        restored?;
        Ok(warning)
    }

    /// A handle that is already gone counts as closed
    async fn close_context(
        &self,
        handle: &ContextHandle,
    ) -> Result<Option<ContextWarning>, CleanupFailure> {
        let err = match self.session.close(handle).await {
            Ok(()) => return Ok(None),
            Err(err) => err,
        };

        let vanished = err.is_no_such_context()
            || self
                .session
                .current_contexts()
                .await
                .is_ok_and(|open| !open.contains(handle));
        if vanished {
            debug!(handle = %handle, "context already closed");
            return Ok(Some(ContextWarning::AlreadyClosed(handle.clone())));
        }

        Err(CleanupFailure {
            stage: CleanupStage::CloseContext,
            handle: handle.clone(),
            source: err,
        })
    }

    /// Put focus on home and check that it is there
    async fn restore_home(&self) -> Result<(), CleanupFailure> {
        let failure = |source| CleanupFailure {
            stage: CleanupStage::RestoreFocus,
            handle: self.home.clone(),
            source,
        };

        match self.session.current_context().await {
            Ok(current) if current == self.home => return Ok(()),
            Ok(current) => warn!(focus = %current, home = %self.home, "focus found away from home"),
            Err(err) => debug!(error = %err, "focused context is gone; switching home"),
        }

        self.session.switch_to(&self.home).await.map_err(failure)?;
        if !self.restore_check {
            return Ok(());
        }

        let current = self.session.current_context().await.map_err(failure)?;
        if current != self.home {
            warn!(focus = %current, home = %self.home, "focus did not return home");
            return Err(failure(SessionError::command(format!(
                "focus is on {current} after switching to {}",
                self.home
            ))));
        }
        Ok(())
    }
}
