//! `WatchManager` over a real HTTP connection to a `wiremock` server.

use std::sync::Arc;
use std::time::Duration;

use feedwatch_client::mock::RecordingHandler;
use feedwatch_client::{HttpTransport, LineReader, Transport, WatchManager, WatchRequest, WatchState};
use feedwatch_core::WatchConfig;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> WatchConfig {
    WatchConfig {
        reconnect_interval_ms: 20,
        connect_timeout_ms: 1_000,
        ..WatchConfig::default()
    }
}

#[tokio::test]
async fn streams_body_lines_then_stops_on_gone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/watch"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"n\":1}\n{\"n\":2}\r\n{\"n\":3}"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/watch"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let handler = Arc::new(RecordingHandler::stopping_on(&[410]));
    let manager = WatchManager::http(&config(), handler.clone()).unwrap();
    manager
        .run(WatchRequest::new(format!("{}/api/watch", server.uri())))
        .unwrap();

    let state = tokio::time::timeout(Duration::from_secs(5), manager.wait_finished())
        .await
        .unwrap();
    assert_eq!(state, WatchState::Terminated);
    assert_eq!(handler.messages(), vec![r#"{"n":1}"#, r#"{"n":2}"#, r#"{"n":3}"#]);
    assert_eq!(handler.statuses().len(), 1);
    assert_eq!(handler.statuses()[0].code, 410);
    assert_eq!(handler.statuses()[0].message, "Gone");
}

#[tokio::test]
async fn sends_configured_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok\n"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::from_config(&config()).unwrap();
    let request = WatchRequest::new(format!("{}/feed", server.uri())).header("Authorization", "Bearer secret");
    let response = transport.send(&request).await.unwrap();
    assert!(response.is_successful());

    let mut lines = Vec::new();
    let summary = LineReader::new(response.into_body())
        .run(&CancellationToken::new(), |line| lines.push(line))
        .await
        .unwrap();
    assert_eq!(lines, vec!["ok"]);
    assert_eq!(summary.lines, 1);
}

#[tokio::test]
async fn unreachable_server_exhausts_bounded_session() {
    let config = WatchConfig {
        reconnect_limit: 1,
        ..config()
    };
    let handler = Arc::new(RecordingHandler::new());
    let manager = WatchManager::http(&config, handler.clone()).unwrap();
    manager
        .run(WatchRequest::new("http://127.0.0.1:9/watch"))
        .unwrap();

    let state = tokio::time::timeout(Duration::from_secs(10), manager.wait_finished())
        .await
        .unwrap();
    assert_eq!(state, WatchState::Exhausted);
    assert_eq!(handler.exhausted_count(), 1);
    assert!(handler.messages().is_empty());
}
