//! Tabguard: Wait Engine and Multi-Context Management for Browser Tests
//!
//! Two building blocks for end-to-end scenarios that drive a browser:
//!
//! - [`wait`]: block until a condition over page state holds, with a hard
//!   timeout, a fixed polling interval and cooperative cancellation.
//! - [`context`]: enter a window or tab opened by a click, verify it, close
//!   it and return focus home, even when verification fails.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   trigger/verify   ┌────────────────┐
//! │   Scenario   │───────────────────►│ ContextManager │
//! └──────┬───────┘                    └───────┬────────┘
//!        │ conditions                         │ new handle?
//!        ▼                                    ▼
//! ┌──────────────┐    now / sleep     ┌────────────────┐
//! │    Waiter    │◄──────────────────►│     Clock      │
//! └──────┬───────┘                    └────────────────┘
//!        │ list / switch / close / url
//!        ▼
//! ┌──────────────────┐
//! │ BrowsingSession  │  (WebDriver, CDP, MockSession)
//! └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use tabguard::{ContextManager, MockSession, WaitOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tabguard::ContextError> {
//! let session = Arc::new(MockSession::new("H1", "https://app.example/"));
//! let manager = ContextManager::attach(Arc::clone(&session))
//!     .await?
//!     .with_options(WaitOptions::new().with_timeout(200).with_poll_interval(10));
//!
//! let opener = Arc::clone(&session);
//! let visit = manager
//!     .with_new_context(
//!         move || {
//!             opener.open_context("H2", "https://partner.example/");
//!             async { Ok::<_, Infallible>(()) }
//!         },
//!         |handle| async move { Ok::<_, Infallible>(handle) },
//!     )
//!     .await?;
//!
//! assert_eq!(visit.value.as_str(), "H2");
//! assert_eq!(session.open_handles().len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod clock;
pub mod condition;
pub mod config;
pub mod context;
pub mod logging;
pub mod result;
pub mod session;
pub mod wait;

pub use clock::{Clock, FakeClock, SharedClock, TokioClock};
pub use condition::{
    all_of, any_of, not, number_of_contexts_is, title_contains, title_is, url_changed_from,
    url_contains, url_is, url_matches, BoxedCondition, FnCondition, WaitCondition,
};
pub use config::TabguardConfig;
pub use context::{ContextManager, ContextState, ContextVisit, ContextWarning};
pub use logging::init_logging;
pub use result::{
    BoxError, CleanupStage, ConfigError, ContextError, ContextResult, SessionError,
    SessionResult, Severity, WaitError, WaitResult,
};
pub use session::{BrowsingSession, ContextHandle, ContextSet, MockSession};
pub use wait::{wait, wait_until, wait_with, WaitOptions, WaitOutcome, WaitReport, Waiter};
