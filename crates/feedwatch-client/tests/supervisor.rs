//! End-to-end behaviour of `WatchManager` against a scripted transport.
//!
//! Time is paused, so reconnect delays are observed exactly on the tokio clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use feedwatch_client::mock::{MockResponse, MockTransport, RecordingHandler};
use feedwatch_client::{WatchHandler, WatchManager, WatchRequest, WatchState};
use feedwatch_core::logging::capture_logs;
use feedwatch_core::{Status, WatchConfig, WatchError};
use parking_lot::Mutex;
use tracing::Level;

const BASE: Duration = Duration::from_millis(100);

fn config(limit: i32) -> WatchConfig {
    WatchConfig {
        reconnect_interval_ms: 100,
        reconnect_limit: limit,
        ..WatchConfig::default()
    }
}

fn request() -> WatchRequest {
    WatchRequest::new("http://feed.local/api/pods?watch=true")
}

/// Gaps between consecutive dispatches.
fn gaps(transport: &MockTransport) -> Vec<Duration> {
    transport
        .calls()
        .windows(2)
        .map(|pair| pair[1].at.duration_since(pair[0].at))
        .collect()
}

fn assert_gap(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual <= expected + Duration::from_millis(5),
        "expected a gap of {expected:?}, got {actual:?}"
    );
}

async fn settle() {
    tokio::time::sleep(Duration::from_secs(60)).await;
}

#[tokio::test(start_paused = true)]
async fn streams_lines_in_order_then_reconnects_after_base_delay() {
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::lines(&[r#"{"type":"ADDED"}"#, r#"{"type":"MODIFIED"}"#, r#"{"type":"DELETED"}"#]),
        MockResponse::Pending,
    ]));
    let handler = Arc::new(RecordingHandler::new());
    let manager = WatchManager::new(&config(-1), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    handler.wait_for_messages(3).await;
    settle().await;

    assert_eq!(
        handler.messages(),
        vec![r#"{"type":"ADDED"}"#, r#"{"type":"MODIFIED"}"#, r#"{"type":"DELETED"}"#]
    );
    assert_eq!(transport.call_count(), 2);
    assert_gap(gaps(&transport)[0], BASE);
    assert_eq!(manager.state(), WatchState::Dispatching);
    assert_eq!(handler.reconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn consecutive_failures_double_the_delay_until_a_response() {
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::connect_error("connection refused"),
        MockResponse::connect_error("connection refused"),
        MockResponse::connect_error("connection refused"),
        MockResponse::open_stream(&["hello"]),
    ]));
    let handler = Arc::new(RecordingHandler::new());
    let manager = WatchManager::new(&config(-1), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    handler.wait_for_messages(1).await;

    let gaps = gaps(&transport);
    assert_eq!(gaps.len(), 3);
    assert_gap(gaps[0], BASE);
    assert_gap(gaps[1], BASE * 2);
    assert_gap(gaps[2], BASE * 4);
    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(manager.state(), WatchState::Streaming);
}

#[tokio::test(start_paused = true)]
async fn stopping_status_terminates_without_messages() {
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::status_with_lines(410, &["should not be read"]),
        MockResponse::lines(&["never dispatched"]),
    ]));
    let handler = Arc::new(RecordingHandler::stopping_on(&[410]));
    let manager = WatchManager::new(&config(-1), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    assert_eq!(manager.wait_finished().await, WatchState::Terminated);
    settle().await;

    assert!(handler.messages().is_empty());
    assert_eq!(handler.statuses(), vec![Status::new(410, "scripted")]);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.live_calls(), 0);
    assert_matches!(manager.run(request()), Err(WatchError::Terminated));
}

#[tokio::test(start_paused = true)]
async fn non_stopping_status_reads_body_and_reconnects() {
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::status_with_lines(503, &["retry later"]),
        MockResponse::Pending,
    ]));
    let handler = Arc::new(RecordingHandler::new());
    let manager = WatchManager::new(&config(-1), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    settle().await;

    assert_eq!(handler.statuses().len(), 1);
    assert_eq!(handler.messages(), vec!["retry later"]);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn close_mid_stream_stops_reading_and_reconnecting() {
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::open_stream(&["first"]),
        MockResponse::lines(&["never dispatched"]),
    ]));
    let handler = Arc::new(RecordingHandler::new());
    let manager = WatchManager::new(&config(-1), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    handler.wait_for_messages(1).await;
    assert_eq!(manager.state(), WatchState::Streaming);

    manager.close();
    settle().await;

    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.live_calls(), 0);
    assert_eq!(handler.messages(), vec!["first"]);
    assert_eq!(manager.state(), WatchState::Closed);
    assert_eq!(handler.closed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn close_during_backoff_cancels_pending_reconnect() {
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::connect_error("refused"),
        MockResponse::lines(&["never dispatched"]),
    ]));
    let handler = Arc::new(RecordingHandler::new());
    let manager = WatchManager::new(&config(-1), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    tokio::time::sleep(BASE / 2).await;
    assert_eq!(manager.state(), WatchState::BackoffWait);

    manager.close();
    settle().await;

    assert_eq!(transport.call_count(), 1);
    assert_eq!(handler.reconnect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn zero_limit_exhausts_on_first_failure() {
    let transport = Arc::new(MockTransport::new(vec![MockResponse::connect_error("refused")]));
    let handler = Arc::new(RecordingHandler::new());
    let manager = WatchManager::new(&config(0), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    assert_eq!(manager.wait_finished().await, WatchState::Exhausted);
    settle().await;

    assert_eq!(transport.call_count(), 1);
    assert_eq!(handler.exhausted_count(), 1);
    assert_matches!(manager.run(request()), Err(WatchError::Terminated));
}

#[tokio::test(start_paused = true)]
async fn bounded_limit_allows_limit_plus_one_attempts() {
    let transport = Arc::new(MockTransport::new(vec![]));
    let handler = Arc::new(RecordingHandler::new());
    let manager = WatchManager::new(&config(2), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    assert_eq!(manager.wait_finished().await, WatchState::Exhausted);
    settle().await;

    assert_eq!(transport.call_count(), 3);
    assert_eq!(handler.exhausted_count(), 1);

    manager.close();
    assert_eq!(manager.state(), WatchState::Closed);
    assert_eq!(handler.closed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn any_response_resets_the_attempt_counter() {
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::connect_error("refused"),
        MockResponse::connect_error("refused"),
        MockResponse::status(500),
        MockResponse::Pending,
    ]));
    let handler = Arc::new(RecordingHandler::new());
    let manager = WatchManager::new(&config(-1), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    settle().await;

    let gaps = gaps(&transport);
    assert_eq!(gaps.len(), 3);
    assert_gap(gaps[0], BASE);
    assert_gap(gaps[1], BASE * 2);
    assert_gap(gaps[2], BASE);
}

#[tokio::test(start_paused = true)]
async fn stream_error_is_logged_and_reconnects() {
    let (logs, _guard) = capture_logs();
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::broken_stream(&["partial"], "connection reset by peer"),
        MockResponse::Pending,
    ]));
    let handler = Arc::new(RecordingHandler::new());
    let manager = WatchManager::new(&config(-1), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    settle().await;

    assert_eq!(handler.messages(), vec!["partial"]);
    assert_eq!(transport.call_count(), 2);
    assert!(logs.has_event(Level::INFO, "watch terminated unexpectedly"));
}

#[tokio::test(start_paused = true)]
async fn connect_failure_is_logged_but_cancellation_is_not() {
    let (logs, _guard) = capture_logs();
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::connect_error("refused"),
        MockResponse::Pending,
    ]));
    let manager =
        WatchManager::new(&config(-1), transport.clone(), Arc::new(RecordingHandler::new())).unwrap();

    manager.run(request()).unwrap();
    settle().await;
    assert_eq!(logs.count_matching("watch connection failed"), 1);

    manager.close();
    settle().await;
    assert_eq!(logs.count_matching("watch connection failed"), 1);
    assert!(!logs.has_message("terminated unexpectedly"));
}

/// Resumes from the number of lines seen so far.
#[derive(Default)]
struct ResumingHandler {
    seen: AtomicUsize,
}

impl WatchHandler for ResumingHandler {
    fn on_message(&self, _line: &str) {
        let _ = self.seen.fetch_add(1, Ordering::SeqCst);
    }

    fn on_status(&self, _status: &Status) -> bool {
        false
    }

    fn prepare_reconnect(&self, request: &mut WatchRequest) {
        let seen = self.seen.load(Ordering::SeqCst).to_string();
        request
            .set_query_param("resourceVersion", &seen)
            .expect("feed url is absolute");
    }
}

#[tokio::test(start_paused = true)]
async fn prepare_reconnect_rewrites_the_request() {
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::lines(&["a", "b"]),
        MockResponse::Pending,
    ]));
    let manager =
        WatchManager::new(&config(-1), transport.clone(), Arc::new(ResumingHandler::default())).unwrap();

    manager.run(request()).unwrap();
    settle().await;

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].url, "http://feed.local/api/pods?watch=true");
    assert_eq!(calls[1].url, "http://feed.local/api/pods?watch=true&resourceVersion=2");
}

#[tokio::test(start_paused = true)]
async fn dropping_the_manager_releases_the_call() {
    let transport = Arc::new(MockTransport::new(vec![MockResponse::open_stream(&["x"])]));
    let handler = Arc::new(RecordingHandler::new());
    let manager = WatchManager::new(&config(-1), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    handler.wait_for_messages(1).await;
    assert_eq!(transport.live_calls(), 1);

    drop(manager);
    settle().await;

    assert_eq!(transport.live_calls(), 0);
    assert_eq!(handler.closed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn subscribers_observe_transitions() {
    let transport = Arc::new(MockTransport::new(vec![MockResponse::connect_error("refused")]));
    let manager =
        WatchManager::new(&config(0), transport, Arc::new(RecordingHandler::new())).unwrap();
    let mut states = manager.subscribe();
    assert_eq!(*states.borrow_and_update(), WatchState::Idle);

    manager.run(request()).unwrap();
    let reached = states.wait_for(|s| *s == WatchState::Exhausted).await.map(|s| *s);
    assert_eq!(reached.unwrap(), WatchState::Exhausted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_dispatch_a_single_call() {
    let transport = Arc::new(MockTransport::new(vec![MockResponse::Pending]));
    let manager = Arc::new(
        WatchManager::new(&config(-1), transport.clone(), Arc::new(RecordingHandler::new())).unwrap(),
    );

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.run(request()).is_ok() })
        })
        .collect();
    let mut accepted = 0;
    for task in tasks {
        if task.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);

    manager.close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.call_count(), 1);
    assert!(transport.max_live_calls() <= 1);
    assert_eq!(transport.live_calls(), 0);
    assert_matches!(manager.run(request()), Err(WatchError::Closed));
}

/// Panics on the first message, records the rest.
#[derive(Default)]
struct FlakyHandler {
    panicked: AtomicBool,
    messages: Mutex<Vec<String>>,
}

impl WatchHandler for FlakyHandler {
    fn on_message(&self, line: &str) {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("handler failed on {line}");
        }
        self.messages.lock().push(line.to_string());
    }

    fn on_status(&self, _status: &Status) -> bool {
        false
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_message_handler_reconnects() {
    let (logs, _guard) = capture_logs();
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::lines(&["boom"]),
        MockResponse::lines(&["after"]),
        MockResponse::Pending,
    ]));
    let handler = Arc::new(FlakyHandler::default());
    let manager = WatchManager::new(&config(-1), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    settle().await;

    assert_eq!(transport.call_count(), 3);
    assert_eq!(*handler.messages.lock(), vec!["after"]);
    assert_eq!(manager.state(), WatchState::Dispatching);
    assert_eq!(transport.live_calls(), 1);
    assert!(logs.has_event(Level::INFO, "watch terminated unexpectedly"));
}

/// Panics whenever a non-success status arrives.
struct StatusPanicHandler;

impl WatchHandler for StatusPanicHandler {
    fn on_message(&self, _line: &str) {}

    fn on_status(&self, status: &Status) -> bool {
        panic!("cannot classify {status}");
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_status_handler_reconnects() {
    let (logs, _guard) = capture_logs();
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::status_with_lines(500, &["ignored"]),
        MockResponse::Pending,
    ]));
    let manager = WatchManager::new(&config(-1), transport.clone(), Arc::new(StatusPanicHandler)).unwrap();

    manager.run(request()).unwrap();
    settle().await;

    assert_eq!(transport.call_count(), 2);
    assert_gap(gaps(&transport)[0], BASE);
    assert_eq!(manager.state(), WatchState::Dispatching);
    assert!(logs.has_event(Level::INFO, "watch terminated unexpectedly"));
}

#[tokio::test(start_paused = true)]
async fn run_during_backoff_supersedes_the_pending_timer() {
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::connect_error("refused"),
        MockResponse::lines(&["x"]),
        MockResponse::Pending,
    ]));
    let handler = Arc::new(RecordingHandler::new());
    let manager = WatchManager::new(&config(-1), transport.clone(), handler.clone()).unwrap();

    manager.run(request()).unwrap();
    tokio::time::sleep(BASE / 2).await;
    assert_eq!(manager.state(), WatchState::BackoffWait);

    manager.run(request()).unwrap();
    settle().await;

    // The timer armed by the first failure must not fire at BASE.
    let gaps = gaps(&transport);
    assert_eq!(gaps.len(), 2);
    assert_gap(gaps[0], BASE / 2);
    assert_gap(gaps[1], BASE);
    assert!(transport.max_live_calls() <= 1);
    assert_eq!(handler.messages(), vec!["x"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_racing_runs_and_reconnects_stops_all_calls() {
    let fast = WatchConfig {
        reconnect_interval_ms: 1,
        reconnect_limit: -1,
        ..WatchConfig::default()
    };

    for round in 0..8_u64 {
        // Empty script: every call fails, so reconnect timers keep firing.
        let transport = Arc::new(MockTransport::new(vec![]));
        let manager = Arc::new(
            WatchManager::new(&fast, transport.clone(), Arc::new(RecordingHandler::new())).unwrap(),
        );

        let runners: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    while !manager.is_closed() {
                        let _ = manager.run(request());
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(5 + round)).await;
        manager.close();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let after_close = transport.call_count();
        tokio::time::sleep(Duration::from_millis(100)).await;

        for runner in runners {
            runner.await.unwrap();
        }
        assert_eq!(transport.call_count(), after_close, "round {round}");
        assert!(transport.max_live_calls() <= 1, "round {round}");
        assert_eq!(transport.live_calls(), 0, "round {round}");
        assert_eq!(manager.state(), WatchState::Closed);
    }
}
