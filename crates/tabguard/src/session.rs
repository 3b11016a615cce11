//! BrowsingSession - the browser-driving seam
//!
//! The core never talks to a browser engine. It consumes the narrow
//! [`BrowsingSession`] capability surface, implemented by whatever driver a
//! suite uses (WebDriver client, CDP, Playwright bridge) or by
//! [`MockSession`] in tests.

use crate::clock::{SharedClock, TokioClock};
use crate::result::{SessionError, SessionResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// =============================================================================
// CONTEXT HANDLE
// =============================================================================

/// Opaque identifier for one browsing context (tab or window)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextHandle(String);

impl ContextHandle {
    /// Wrap a driver-issued handle
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw handle string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ContextHandle {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// CONTEXT SET
// =============================================================================

/// Snapshot of the open contexts, in the order the session reports them
///
/// Sessions report handles in creation order, so the last handle of a
/// difference is the most recently created one. Equality ignores order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSet {
    handles: Vec<ContextHandle>,
}

impl ContextSet {
    /// Build a snapshot, dropping duplicate handles
    #[must_use]
    pub fn new(handles: impl IntoIterator<Item = ContextHandle>) -> Self {
        let mut deduped: Vec<ContextHandle> = Vec::new();
        for handle in handles {
            if !deduped.contains(&handle) {
                deduped.push(handle);
            }
        }
        Self { handles: deduped }
    }

    /// Number of open contexts
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no context is open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Whether `handle` is open in this snapshot
    #[must_use]
    pub fn contains(&self, handle: &ContextHandle) -> bool {
        self.handles.contains(handle)
    }

    /// Iterate handles in session order
    pub fn iter(&self) -> std::slice::Iter<'_, ContextHandle> {
        self.handles.iter()
    }

    /// Handles present here but not in `before`, in session order
    #[must_use]
    pub fn difference(&self, before: &Self) -> Vec<ContextHandle> {
        self.handles
            .iter()
            .filter(|h| !before.contains(h))
            .cloned()
            .collect()
    }

    /// Whether at least one handle is not present in `before`
    #[must_use]
    pub fn has_new_since(&self, before: &Self) -> bool {
        self.handles.iter().any(|h| !before.contains(h))
    }
}

impl PartialEq for ContextSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.handles.iter().all(|h| other.contains(h))
    }
}

impl Eq for ContextSet {}

impl FromIterator<ContextHandle> for ContextSet {
    fn from_iter<I: IntoIterator<Item = ContextHandle>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a ContextSet {
    type Item = &'a ContextHandle;
    type IntoIter = std::slice::Iter<'a, ContextHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.iter()
    }
}

// =============================================================================
// BROWSING SESSION TRAIT
// =============================================================================

/// Capability surface the core needs from a browser-driving layer
///
/// Implementations take `&self`; drivers are expected to be cheap shared
/// handles with their own interior synchronisation.
#[async_trait]
pub trait BrowsingSession: Send + Sync {
    /// Snapshot of the open contexts
    async fn current_contexts(&self) -> SessionResult<ContextSet>;

    /// The context that currently has focus
    async fn current_context(&self) -> SessionResult<ContextHandle>;

    /// Move focus to `handle`
    async fn switch_to(&self, handle: &ContextHandle) -> SessionResult<()>;

    /// Close `handle`
    async fn close(&self, handle: &ContextHandle) -> SessionResult<()>;

    /// URL of the focused context
    async fn current_url(&self) -> SessionResult<String>;

    /// Title of the focused context
    async fn title(&self) -> SessionResult<String> {
        Err(SessionError::Unsupported { capability: "title" })
    }
}

#[async_trait]
impl<S: BrowsingSession + ?Sized> BrowsingSession for Arc<S> {
    async fn current_contexts(&self) -> SessionResult<ContextSet> {
        (**self).current_contexts().await
    }

    async fn current_context(&self) -> SessionResult<ContextHandle> {
        (**self).current_context().await
    }

    async fn switch_to(&self, handle: &ContextHandle) -> SessionResult<()> {
        (**self).switch_to(handle).await
    }

    async fn close(&self, handle: &ContextHandle) -> SessionResult<()> {
        (**self).close(handle).await
    }

    async fn current_url(&self) -> SessionResult<String> {
        (**self).current_url().await
    }

    async fn title(&self) -> SessionResult<String> {
        (**self).title().await
    }
}

#[async_trait]
impl<S: BrowsingSession + ?Sized> BrowsingSession for &S {
    async fn current_contexts(&self) -> SessionResult<ContextSet> {
        (**self).current_contexts().await
    }

    async fn current_context(&self) -> SessionResult<ContextHandle> {
        (**self).current_context().await
    }

    async fn switch_to(&self, handle: &ContextHandle) -> SessionResult<()> {
        (**self).switch_to(handle).await
    }

    async fn close(&self, handle: &ContextHandle) -> SessionResult<()> {
        (**self).close(handle).await
    }

    async fn current_url(&self) -> SessionResult<String> {
        (**self).current_url().await
    }

    async fn title(&self) -> SessionResult<String> {
        (**self).title().await
    }
}

// =============================================================================
// MOCK SESSION
// =============================================================================

#[derive(Debug, Clone)]
struct MockContext {
    handle: ContextHandle,
    url: String,
    title: String,
}

#[derive(Debug, Clone)]
struct PendingOpen {
    at: Duration,
    context: MockContext,
}

#[derive(Debug, Default)]
struct MockState {
    open: Vec<MockContext>,
    focus: Option<ContextHandle>,
    pending: Vec<PendingOpen>,
    failing_close: Vec<ContextHandle>,
    failing_switch: Vec<ContextHandle>,
    failing_listing: bool,
    call_history: Vec<String>,
}

impl MockState {
    fn focused(&self) -> SessionResult<&MockContext> {
        let focus = self
            .focus
            .as_ref()
            .ok_or_else(|| SessionError::command("focused context was closed"))?;
        self.open
            .iter()
            .find(|c| &c.handle == focus)
            .ok_or_else(|| SessionError::NoSuchContext(focus.clone()))
    }
}

/// Scriptable in-memory session for unit testing
///
/// Contexts can open immediately or at a scheduled time on the session's
/// clock; scheduled openings become visible on the next session call.
#[derive(Debug)]
pub struct MockSession {
    clock: SharedClock,
    inner: Mutex<MockState>,
}

impl MockSession {
    /// Create a session with one focused home context
    #[must_use]
    pub fn new(home: impl Into<ContextHandle>, url: &str) -> Self {
        let home = home.into();
        let state = MockState {
            open: vec![MockContext {
                handle: home.clone(),
                url: url.to_string(),
                title: String::new(),
            }],
            focus: Some(home),
            ..MockState::default()
        };
        Self {
            clock: Arc::new(TokioClock::new()),
            inner: Mutex::new(state),
        }
    }

    /// Schedule openings against a different clock
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    fn state(&self) -> SessionResult<MutexGuard<'_, MockState>> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| SessionError::command("mock session lock poisoned"))?;
        let now = self.clock.now();
        let (due, later): (Vec<_>, Vec<_>) =
            state.pending.drain(..).partition(|p| p.at <= now);
        state.pending = later;
        state.open.extend(due.into_iter().map(|p| p.context));
        Ok(state)
    }

    /// Open a context right away, as a clicked `target="_blank"` link would
    pub fn open_context(&self, handle: impl Into<ContextHandle>, url: &str) {
        if let Ok(mut state) = self.inner.lock() {
            state.open.push(MockContext {
                handle: handle.into(),
                url: url.to_string(),
                title: String::new(),
            });
        }
    }

    /// Open a context once `delay` has passed on the session clock
    pub fn open_context_after(&self, delay: Duration, handle: impl Into<ContextHandle>, url: &str) {
        let at = self.clock.now() + delay;
        if let Ok(mut state) = self.inner.lock() {
            state.pending.push(PendingOpen {
                at,
                context: MockContext {
                    handle: handle.into(),
                    url: url.to_string(),
                    title: String::new(),
                },
            });
        }
    }

    /// Navigate the focused context in place
    pub fn navigate(&self, url: &str) {
        if let Ok(mut state) = self.state() {
            let focus = state.focus.clone();
            if let Some(ctx) = state.open.iter_mut().find(|c| Some(&c.handle) == focus.as_ref()) {
                ctx.url = url.to_string();
            }
        }
    }

    /// Set the title of a context
    pub fn set_title(&self, handle: &ContextHandle, title: &str) {
        if let Ok(mut state) = self.state() {
            if let Some(ctx) = state.open.iter_mut().find(|c| &c.handle == handle) {
                ctx.title = title.to_string();
            }
        }
    }

    /// Close a context behind the core's back
    pub fn close_externally(&self, handle: &ContextHandle) {
        if let Ok(mut state) = self.state() {
            state.open.retain(|c| &c.handle != handle);
        }
    }

    /// Make `close(handle)` fail while leaving the context open
    pub fn fail_close_of(&self, handle: impl Into<ContextHandle>) {
        if let Ok(mut state) = self.inner.lock() {
            state.failing_close.push(handle.into());
        }
    }

    /// Make `switch_to(handle)` fail
    pub fn fail_switch_to(&self, handle: impl Into<ContextHandle>) {
        if let Ok(mut state) = self.inner.lock() {
            state.failing_switch.push(handle.into());
        }
    }

    /// Make `current_contexts()` fail
    pub fn fail_listing(&self, failing: bool) {
        if let Ok(mut state) = self.inner.lock() {
            state.failing_listing = failing;
        }
    }

    /// Handles currently open, in creation order
    #[must_use]
    pub fn open_handles(&self) -> Vec<ContextHandle> {
        self.state()
            .map(|s| s.open.iter().map(|c| c.handle.clone()).collect())
            .unwrap_or_default()
    }

    /// Handle that has focus, if it is still open
    #[must_use]
    pub fn focused(&self) -> Option<ContextHandle> {
        let state = self.state().ok()?;
        let handle = state.focused().ok()?.handle.clone();
        Some(handle)
    }

    /// Get call history
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|s| s.call_history.clone())
            .unwrap_or_default()
    }

    /// Check if a call was made (prefix match, e.g. `"close:H2"`)
    #[must_use]
    pub fn was_called(&self, call: &str) -> bool {
        self.history().iter().any(|c| c.starts_with(call))
    }

    /// Count calls matching a prefix
    #[must_use]
    pub fn call_count(&self, call: &str) -> usize {
        self.history().iter().filter(|c| c.starts_with(call)).count()
    }
}

#[async_trait]
impl BrowsingSession for MockSession {
    async fn current_contexts(&self) -> SessionResult<ContextSet> {
        let mut state = self.state()?;
        state.call_history.push("current_contexts".to_string());
        if state.failing_listing {
            return Err(SessionError::command("window handle listing failed"));
        }
        Ok(state.open.iter().map(|c| c.handle.clone()).collect())
    }

    async fn current_context(&self) -> SessionResult<ContextHandle> {
        let mut state = self.state()?;
        state.call_history.push("current_context".to_string());
        state.focused().map(|c| c.handle.clone())
    }

    async fn switch_to(&self, handle: &ContextHandle) -> SessionResult<()> {
        let mut state = self.state()?;
        state.call_history.push(format!("switch_to:{handle}"));
        if state.failing_switch.contains(handle) {
            return Err(SessionError::command(format!("cannot switch to {handle}")));
        }
        if !state.open.iter().any(|c| &c.handle == handle) {
            return Err(SessionError::NoSuchContext(handle.clone()));
        }
        state.focus = Some(handle.clone());
        Ok(())
    }

    async fn close(&self, handle: &ContextHandle) -> SessionResult<()> {
        let mut state = self.state()?;
        state.call_history.push(format!("close:{handle}"));
        if state.failing_close.contains(handle) {
            return Err(SessionError::command(format!("cannot close {handle}")));
        }
        let before = state.open.len();
        state.open.retain(|c| &c.handle != handle);
        if state.open.len() == before {
            return Err(SessionError::NoSuchContext(handle.clone()));
        }
        if state.focus.as_ref() == Some(handle) {
            state.focus = None;
        }
        Ok(())
    }

    async fn current_url(&self) -> SessionResult<String> {
        let mut state = self.state()?;
        state.call_history.push("current_url".to_string());
        state.focused().map(|c| c.url.clone())
    }

    async fn title(&self) -> SessionResult<String> {
        let mut state = self.state()?;
        state.call_history.push("title".to_string());
        state.focused().map(|c| c.title.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn handles(ids: &[&str]) -> ContextSet {
        ids.iter().map(|id| ContextHandle::new(*id)).collect()
    }

    mod context_set_tests {
        use super::*;

        #[test]
        fn test_dedupes_and_keeps_order() {
            let set = handles(&["H1", "H2", "H1", "H3"]);
            let ids: Vec<_> = set.iter().map(ContextHandle::as_str).collect();
            assert_eq!(ids, vec!["H1", "H2", "H3"]);
        }

        #[test]
        fn test_difference_in_session_order() {
            let before = handles(&["H1"]);
            let after = handles(&["H1", "H3", "H2"]);
            assert_eq!(
                after.difference(&before),
                vec![ContextHandle::new("H3"), ContextHandle::new("H2")]
            );
            assert!(after.has_new_since(&before));
            assert!(!before.has_new_since(&after));
        }

        #[test]
        fn test_equality_ignores_order() {
            assert_eq!(handles(&["H1", "H2"]), handles(&["H2", "H1"]));
            assert_ne!(handles(&["H1"]), handles(&["H1", "H2"]));
        }

        #[test]
        fn test_replaced_handle_counts_as_new() {
            // Same size, different member: still a new context.
            let before = handles(&["H1", "H2"]);
            let after = handles(&["H1", "H3"]);
            assert!(after.has_new_since(&before));
        }

        #[test]
        fn test_handle_serializes_transparently() {
            let json = serde_json::to_string(&ContextHandle::new("CDwindow-1")).unwrap();
            assert_eq!(json, "\"CDwindow-1\"");
        }
    }

    mod mock_session_tests {
        use super::*;

        #[tokio::test]
        async fn test_new_session_focuses_home() {
            let session = MockSession::new("H1", "https://app.test/");
            assert_eq!(session.current_context().await.unwrap(), ContextHandle::new("H1"));
            assert_eq!(session.current_url().await.unwrap(), "https://app.test/");
            assert_eq!(session.current_contexts().await.unwrap(), handles(&["H1"]));
        }

        #[tokio::test]
        async fn test_scheduled_open_appears_on_clock() {
            let clock = FakeClock::shared();
            let session = MockSession::new("H1", "https://app.test/").with_clock(clock.clone());
            session.open_context_after(Duration::from_millis(50), "H2", "https://ext.test/");

            clock.advance(Duration::from_millis(49));
            assert_eq!(session.current_contexts().await.unwrap().len(), 1);
            clock.advance(Duration::from_millis(1));
            assert_eq!(session.current_contexts().await.unwrap(), handles(&["H1", "H2"]));
        }

        #[tokio::test]
        async fn test_close_missing_handle_is_no_such_context() {
            let session = MockSession::new("H1", "https://app.test/");
            let err = session.close(&ContextHandle::new("H9")).await.unwrap_err();
            assert!(err.is_no_such_context());
        }

        #[tokio::test]
        async fn test_closing_focused_context_drops_focus() {
            let session = MockSession::new("H1", "https://app.test/");
            session.open_context("H2", "https://ext.test/");
            let h2 = ContextHandle::new("H2");
            session.switch_to(&h2).await.unwrap();
            session.close(&h2).await.unwrap();
            assert!(session.current_context().await.is_err());
            assert_eq!(session.focused(), None);
        }

        #[tokio::test]
        async fn test_failure_injection() {
            let session = MockSession::new("H1", "https://app.test/");
            session.open_context("H2", "https://ext.test/");
            session.fail_close_of("H2");
            session.fail_switch_to("H2");

            let h2 = ContextHandle::new("H2");
            assert!(session.switch_to(&h2).await.is_err());
            assert!(session.close(&h2).await.is_err());
            assert!(session.open_handles().contains(&h2));
            assert!(session.was_called("close:H2"));
            assert_eq!(session.call_count("switch_to:"), 1);
        }

        #[tokio::test]
        async fn test_title_and_navigation() {
            let session = MockSession::new("H1", "https://app.test/");
            session.set_title(&ContextHandle::new("H1"), "Swag Labs");
            session.navigate("https://app.test/inventory.html");
            assert_eq!(session.title().await.unwrap(), "Swag Labs");
            assert_eq!(
                session.current_url().await.unwrap(),
                "https://app.test/inventory.html"
            );
        }

        #[tokio::test]
        async fn test_arc_session_delegates() {
            let session = Arc::new(MockSession::new("H1", "https://app.test/"));
            let shared: Arc<MockSession> = Arc::clone(&session);
            assert_eq!(shared.current_contexts().await.unwrap().len(), 1);
            assert!(session.was_called("current_contexts"));
        }
    }

    mod default_capability_tests {
        use super::*;

        struct UrlOnly;

        #[async_trait]
        impl BrowsingSession for UrlOnly {
            async fn current_contexts(&self) -> SessionResult<ContextSet> {
                Ok(ContextSet::default())
            }
            async fn current_context(&self) -> SessionResult<ContextHandle> {
                Ok(ContextHandle::new("only"))
            }
            async fn switch_to(&self, _handle: &ContextHandle) -> SessionResult<()> {
                Ok(())
            }
            async fn close(&self, _handle: &ContextHandle) -> SessionResult<()> {
                Ok(())
            }
            async fn current_url(&self) -> SessionResult<String> {
                Ok("about:blank".to_string())
            }
        }

        #[tokio::test]
        async fn test_title_unsupported_by_default() {
            let err = UrlOnly.title().await.unwrap_err();
            assert!(matches!(err, SessionError::Unsupported { capability: "title" }));
        }
    }
}
