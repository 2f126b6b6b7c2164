mod common;

use common::{body, init_test_logging, raw, FailOnceSink, ScriptedSource};
use dbchange_relay::mailbox::{Mailbox, OverflowPolicy};
use dbchange_relay::poller::{NotificationPoller, PollerState};
use dbchange_relay::RelayError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn cancelled() -> CancellationToken {
    let cancel = CancellationToken::new();
    cancel.cancel();
    cancel
}

#[tokio::test]
async fn test_enqueue_failure_drops_one_and_continues() {
    init_test_logging();
    let (source, _handle) = ScriptedSource::new(vec![raw("A"), raw("B"), raw("C")]);
    let sink = Arc::new(FailOnceSink::new());
    let mut poller = NotificationPoller::new(source, Arc::clone(&sink), 8000);

    // Already cancelled: exactly one drain cycle, then stop
    poller.run(&cancelled()).await.unwrap();

    assert_eq!(sink.attempts(), 3);
    let delivered: Vec<String> = std::iter::from_fn(|| sink.mailbox.pop())
        .map(|e| body(&e))
        .collect();
    assert_eq!(delivered, vec!["B", "C"]);

    let stats = poller.stats();
    assert_eq!(stats.notifications_received, 3);
    assert_eq!(stats.events_enqueued, 2);
    assert_eq!(stats.events_dropped, 1);
}

#[tokio::test]
async fn test_idle_poller_wakes_on_delivery() {
    let (source, handle) = ScriptedSource::new(vec![]);
    let mailbox = Arc::new(Mailbox::unbounded());
    let mut poller = NotificationPoller::new(source, Arc::clone(&mailbox), 8000);
    let stats = poller.stats_handle();
    let cancel = CancellationToken::new();

    let driver = {
        let cancel = cancel.clone();
        let mailbox = Arc::clone(&mailbox);
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(stats.read().state, PollerState::Idle);

            handle.notify(raw("late"));
            let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
            while mailbox.is_empty() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            cancel.cancel();
        }
    };

    let (result, ()) = tokio::join!(poller.run(&cancel), driver);
    result.unwrap();

    assert_eq!(body(&mailbox.pop().unwrap()), "late");
    assert_eq!(poller.state(), PollerState::Idle);
    assert!(poller.stats().drain_cycles >= 2);
}

#[tokio::test]
async fn test_session_failure_is_fatal() {
    let (source, handle) = ScriptedSource::new(vec![raw("A")]);
    let mailbox = Arc::new(Mailbox::unbounded());
    let mut poller = NotificationPoller::new(source, Arc::clone(&mailbox), 8000);

    handle.fail(RelayError::SessionClosed);
    let err = poller.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, RelayError::SessionClosed));
    assert!(err.is_fatal());
    assert_eq!(mailbox.len(), 1);
    assert!(poller.stats().last_error_at.is_some());
}

#[tokio::test]
async fn test_drop_newest_overflow_does_not_stop_draining() {
    let (source, _handle) = ScriptedSource::new(vec![raw("A"), raw("B"), raw("C"), raw("D")]);
    let mailbox = Arc::new(Mailbox::bounded(2, OverflowPolicy::DropNewest));
    let mut poller = NotificationPoller::new(source, Arc::clone(&mailbox), 8000);

    poller.run(&cancelled()).await.unwrap();

    assert_eq!(body(&mailbox.pop().unwrap()), "A");
    assert_eq!(body(&mailbox.pop().unwrap()), "B");
    assert!(mailbox.pop().is_none());
    assert_eq!(poller.stats().events_dropped, 2);
    assert_eq!(mailbox.metrics().rejected, 2);
}

#[tokio::test]
async fn test_oversized_notification_dropped() {
    let big = "x".repeat(9000);
    let (source, _handle) = ScriptedSource::new(vec![raw("A"), raw(&big), raw("C")]);
    let mailbox = Arc::new(Mailbox::unbounded());
    let mut poller = NotificationPoller::new(source, Arc::clone(&mailbox), 8000);

    poller.run(&cancelled()).await.unwrap();

    let sequences: Vec<u64> = std::iter::from_fn(|| mailbox.pop())
        .map(|e| e.sequence)
        .collect();
    assert_eq!(sequences, vec![1, 3]);
}
