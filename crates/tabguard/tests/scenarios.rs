//! End-to-end scenarios for new-context visits against a scripted session.
//!
//! Tests run on a fake clock or on paused tokio time, so the timings asserted
//! here are exact.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tabguard::{
    init_logging, url_contains, BoxError, BrowsingSession, CleanupStage, ContextError,
    ContextHandle, ContextManager, ContextState, ContextWarning, FakeClock, MockSession,
    Severity, TabguardConfig, WaitOptions, WaitOutcome, Waiter,
};
use tokio_util::sync::CancellationToken;

const INVENTORY: &str = "https://www.saucedemo.com/inventory.html";
const SAUCELABS: &str = "https://saucelabs.com/";

struct Fixture {
    clock: Arc<FakeClock>,
    session: Arc<MockSession>,
    manager: ContextManager<Arc<MockSession>>,
}

fn fixture() -> Fixture {
    init_logging(false);
    let clock = FakeClock::shared();
    let session = Arc::new(MockSession::new("H1", INVENTORY).with_clock(clock.clone()));
    let manager = ContextManager::new(Arc::clone(&session), ContextHandle::new("H1"))
        .with_clock(clock.clone())
        .with_options(WaitOptions::new().with_timeout(200).with_poll_interval(10));
    Fixture {
        clock,
        session,
        manager,
    }
}

fn h(id: &str) -> ContextHandle {
    ContextHandle::new(id)
}

async fn nothing() -> Result<(), Infallible> {
    Ok(())
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn footer_link_opens_partner_site_in_new_tab() {
    let Fixture {
        clock,
        session,
        manager,
    } = fixture();
    let clicker = Arc::clone(&session);
    let inside = Arc::clone(&session);
    let verify_clock = clock.clone();

    let visit = manager
        .with_new_context(
            move || {
                clicker.open_context_after(Duration::from_millis(50), "H2", SAUCELABS);
                nothing()
            },
            |handle| async move {
                let focus = inside.current_context().await?;
                let report = Waiter::new()
                    .with_clock(verify_clock)
                    .wait_for_condition(
                        &url_contains(&*inside, "saucelabs.com"),
                        &WaitOptions::new().with_timeout(1_000),
                    )
                    .await?;
                Ok::<_, BoxError>((handle, focus, report.outcome))
            },
        )
        .await
        .unwrap();

    let (handle, focus, outcome) = visit.value;
    assert_eq!(handle, h("H2"));
    assert_eq!(focus, h("H2"));
    assert_eq!(outcome, WaitOutcome::Satisfied);
    assert_eq!(visit.waited, Duration::from_millis(50));
    assert!(visit.warnings.is_empty());

    assert_eq!(session.open_handles(), vec![h("H1")]);
    assert_eq!(session.focused(), Some(h("H1")));
    assert_eq!(manager.state(), ContextState::Idle);
    assert_eq!(clock.now_ms(), 50);
}

#[tokio::test]
async fn visit_order_of_session_calls() {
    let Fixture {
        session, manager, ..
    } = fixture();
    let clicker = Arc::clone(&session);

    manager
        .with_new_context(
            move || {
                clicker.open_context("H2", SAUCELABS);
                nothing()
            },
            |_| nothing(),
        )
        .await
        .unwrap();

    let calls: Vec<_> = session
        .history()
        .into_iter()
        .filter(|c| c.starts_with("switch_to") || c.starts_with("close"))
        .collect();
    assert_eq!(calls, vec!["switch_to:H2", "close:H2", "switch_to:H1"]);
}

#[tokio::test]
async fn manager_is_reusable_after_each_visit() {
    let Fixture {
        session, manager, ..
    } = fixture();

    for id in ["H2", "H3", "H4"] {
        let clicker = Arc::clone(&session);
        let visit = manager
            .with_new_context(
                move || {
                    clicker.open_context(id, SAUCELABS);
                    nothing()
                },
                |handle| async move { Ok::<_, Infallible>(handle) },
            )
            .await
            .unwrap();
        assert_eq!(visit.value, h(id));
    }

    assert_eq!(session.open_handles(), vec![h("H1")]);
    assert_eq!(session.focused(), Some(h("H1")));
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn click_that_opens_nothing_times_out_at_deadline() {
    let Fixture {
        clock,
        session,
        manager,
    } = fixture();

    let err = manager
        .with_new_context(nothing, |_| nothing())
        .await
        .unwrap_err();

    match err {
        ContextError::NewContextNotOpened { timeout } => {
            assert_eq!(timeout, Duration::from_millis(200));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!((200..=210).contains(&clock.now_ms()));
    assert_eq!(session.call_count("current_contexts"), 1 + 21 + 1);
    assert_eq!(session.focused(), Some(h("H1")));
    assert_eq!(manager.state(), ContextState::Idle);
}

#[tokio::test]
async fn failed_verification_still_closes_new_tab() {
    let Fixture {
        session, manager, ..
    } = fixture();
    let clicker = Arc::clone(&session);
    let inside = Arc::clone(&session);

    let err = manager
        .with_new_context(
            move || {
                clicker.open_context("H2", "https://example.com/");
                nothing()
            },
            |_| async move {
                let url = inside.current_url().await?;
                if url.contains("saucelabs.com") {
                    Ok::<(), BoxError>(())
                } else {
                    Err(BoxError::from(format!("unexpected URL {url}")))
                }
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ContextError::VerifyFailed(_)));
    assert_eq!(err.severity(), Severity::Error);
    assert_eq!(session.open_handles(), vec![h("H1")]);
    assert_eq!(session.focused(), Some(h("H1")));
}

#[tokio::test]
async fn two_tabs_at_once_selects_most_recent() {
    let Fixture {
        session, manager, ..
    } = fixture();
    let clicker = Arc::clone(&session);

    let visit = manager
        .with_new_context(
            move || {
                clicker.open_context("H2", SAUCELABS);
                clicker.open_context("H3", SAUCELABS);
                nothing()
            },
            |handle| async move { Ok::<_, Infallible>(handle) },
        )
        .await
        .unwrap();

    assert_eq!(visit.value, h("H3"));
    assert_eq!(
        visit.warnings,
        vec![ContextWarning::AmbiguousNewContext {
            selected: h("H3"),
            unselected: vec![h("H2")],
        }]
    );
    // The unselected tab is left for the caller.
    assert_eq!(session.open_handles(), vec![h("H1"), h("H2")]);
    assert_eq!(session.focused(), Some(h("H1")));

    let err = visit.into_strict().unwrap_err();
    assert_eq!(err.severity(), Severity::Warning);
}

#[tokio::test]
async fn overlapping_visits_are_rejected() {
    let Fixture {
        session, manager, ..
    } = fixture();
    session.open_context_after(Duration::from_millis(30), "H2", SAUCELABS);

    let (first, second) = tokio::join!(
        manager.with_new_context(nothing, |h| async move { Ok::<_, Infallible>(h) }),
        manager.with_new_context(nothing, |h| async move { Ok::<_, Infallible>(h) }),
    );

    assert_eq!(first.unwrap().value, h("H2"));
    let err = second.unwrap_err();
    assert!(matches!(err, ContextError::ConcurrentContextOperation { .. }));
    assert_eq!(session.open_handles(), vec![h("H1")]);
    assert_eq!(manager.state(), ContextState::Idle);
}

#[tokio::test]
async fn unclosable_tab_escalates_over_verify_failure() {
    let Fixture {
        session, manager, ..
    } = fixture();
    let clicker = Arc::clone(&session);
    session.fail_close_of("H2");

    let err = manager
        .with_new_context(
            move || {
                clicker.open_context("H2", SAUCELABS);
                nothing()
            },
            |_| async { Err::<(), _>(BoxError::from("title mismatch")) },
        )
        .await
        .unwrap_err();

    assert!(err.is_cleanup_failure());
    assert_eq!(err.severity(), Severity::Critical);
    match err {
        ContextError::CleanupFailed {
            stage,
            verify_error,
            ..
        } => {
            assert_eq!(stage, CleanupStage::CloseContext);
            assert_eq!(
                verify_error.map(|e| e.to_string()).as_deref(),
                Some("title mismatch")
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(session.focused(), Some(h("H1")));
}

#[tokio::test]
async fn listing_failure_aborts_the_wait() {
    let Fixture {
        session, manager, ..
    } = fixture();
    let clicker = Arc::clone(&session);

    let err = manager
        .with_new_context(
            move || {
                clicker.fail_listing(true);
                nothing()
            },
            |_| nothing(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ContextError::PredicateObservationFailed(_)));
    assert_eq!(session.focused(), Some(h("H1")));
    assert_eq!(manager.state(), ContextState::Idle);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn cancelling_a_slow_visit_restores_home() {
    let session = Arc::new(MockSession::new("H1", INVENTORY));
    let token = CancellationToken::new();
    let manager = ContextManager::new(Arc::clone(&session), h("H1"))
        .with_options(WaitOptions::new().with_timeout(5_000).with_poll_interval(10))
        .with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(75)).await;
        token.cancel();
    });

    let err = manager
        .with_new_context(nothing, |_| nothing())
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, ContextError::Cancelled));
    assert_eq!(session.focused(), Some(h("H1")));
    assert_eq!(manager.state(), ContextState::Idle);
}

#[tokio::test(start_paused = true)]
async fn dropped_visit_releases_the_manager() {
    let session = Arc::new(MockSession::new("H1", INVENTORY));
    let manager = ContextManager::new(Arc::clone(&session), h("H1"))
        .with_options(WaitOptions::new().with_timeout(5_000).with_poll_interval(10));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(30),
        manager.with_new_context(nothing, |_| nothing()),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(manager.state(), ContextState::Idle);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn config_drives_new_context_timeout() {
    let clock = FakeClock::shared();
    let session = Arc::new(MockSession::new("H1", INVENTORY).with_clock(clock.clone()));
    let config = TabguardConfig::from_json(
        r#"{"new_context_timeout_ms": 25, "wait": {"poll_interval_ms": 10}}"#,
    )
    .unwrap();
    let manager = ContextManager::attach(Arc::clone(&session))
        .await
        .unwrap()
        .with_clock(clock.clone())
        .with_config(&config);

    let err = manager
        .with_new_context(nothing, |_| nothing())
        .await
        .unwrap_err();

    assert!(matches!(err, ContextError::NewContextNotOpened { .. }));
    // Polls at 0, 10 and 20ms; the sleep past 25ms ends the wait at 30ms.
    assert_eq!(clock.now_ms(), 30);
}
