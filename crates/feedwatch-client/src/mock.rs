//! Scripted transport and recording handler for deterministic tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use feedwatch_core::{Status, WatchError};
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::handler::WatchHandler;
use crate::transport::{BodyStream, Transport, TransportError, WatchRequest, WatchResponse};

/// How a scripted body ends after its lines.
#[derive(Clone, Debug)]
pub enum BodyEnd {
    /// The server closes the stream.
    Close,
    /// The stream fails with an I/O error.
    Error(String),
    /// The stream stays open forever.
    Hang,
}

/// Pre-programmed outcome of one call.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Respond with a status and stream these lines.
    Respond {
        /// Status code.
        code: u16,
        /// Lines written to the body, each newline-terminated.
        lines: Vec<String>,
        /// What happens after the last line.
        end: BodyEnd,
    },
    /// Fail before any response.
    Fail(TransportError),
    /// Never respond.
    Pending,
}

impl MockResponse {
    /// `200` with these lines, then close.
    pub fn lines(lines: &[&str]) -> Self {
        Self::Respond {
            code: 200,
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
            end: BodyEnd::Close,
        }
    }

    /// A bare status with an empty body.
    pub fn status(code: u16) -> Self {
        Self::status_with_lines(code, &[])
    }

    /// A status whose body still carries lines.
    pub fn status_with_lines(code: u16, lines: &[&str]) -> Self {
        Self::Respond {
            code,
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
            end: BodyEnd::Close,
        }
    }

    /// `200` with these lines, then the stream stays open.
    pub fn open_stream(lines: &[&str]) -> Self {
        Self::Respond {
            code: 200,
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
            end: BodyEnd::Hang,
        }
    }

    /// `200` with these lines, then a read error.
    pub fn broken_stream(lines: &[&str], error: &str) -> Self {
        Self::Respond {
            code: 200,
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
            end: BodyEnd::Error(error.to_string()),
        }
    }

    /// Connection failure.
    pub fn connect_error(message: &str) -> Self {
        Self::Fail(TransportError::Connect(message.to_string()))
    }
}

/// A dispatched call as seen by the transport.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    /// Requested URL.
    pub url: String,
    /// When the call was dispatched (tokio clock, so paused time works).
    pub at: Instant,
}

/// Transport that replays scripted responses in order.
///
/// Calls beyond the script fail with a connect error.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<RecordedCall>>,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
}

impl MockTransport {
    /// Transport that will answer with `responses`, one per call.
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    /// Append more responses to the script.
    pub fn push(&self, response: MockResponse) {
        self.script.lock().push_back(response);
    }

    /// Number of calls dispatched so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Every call dispatched so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Calls whose request or body is still alive.
    pub fn live_calls(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live calls observed.
    pub fn max_live_calls(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    fn enter(&self) -> LiveGuard {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.max_live.fetch_max(now, Ordering::SeqCst);
        LiveGuard {
            live: Arc::clone(&self.live),
        }
    }
}

/// Decrements the live-call count when the call or its body is dropped.
struct LiveGuard {
    live: Arc<AtomicUsize>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let _ = self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn scripted_body(lines: Vec<String>, end: BodyEnd, guard: LiveGuard) -> BodyStream {
    let chunks = stream::iter(
        lines
            .into_iter()
            .map(|line| Ok(Bytes::from(format!("{line}\n"))))
            .collect::<Vec<std::io::Result<Bytes>>>(),
    );
    let tail: BodyStream = match end {
        BodyEnd::Close => Box::pin(stream::empty()),
        BodyEnd::Error(message) => Box::pin(stream::once(async move {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, message))
        })),
        BodyEnd::Hang => Box::pin(stream::pending()),
    };
    Box::pin(chunks.chain(tail).map(move |item| {
        let _held = &guard;
        item
    }))
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &WatchRequest) -> Result<WatchResponse, TransportError> {
        self.calls.lock().push(RecordedCall {
            url: request.url.clone(),
            at: Instant::now(),
        });
        let guard = self.enter();
        let next = self.script.lock().pop_front();

        match next {
            Some(MockResponse::Respond { code, lines, end }) => {
                let message = if (200..300).contains(&code) { "OK" } else { "scripted" };
                Ok(WatchResponse::new(code, message, scripted_body(lines, end, guard)))
            }
            Some(MockResponse::Fail(err)) => Err(err),
            Some(MockResponse::Pending) => {
                let _held = guard;
                std::future::pending().await
            }
            None => Err(TransportError::Connect("no response scripted".into())),
        }
    }
}

/// Handler that records every callback.
#[derive(Default)]
pub struct RecordingHandler {
    messages: Mutex<Vec<String>>,
    statuses: Mutex<Vec<Status>>,
    stop_codes: Vec<u16>,
    exhausted: AtomicUsize,
    closed: AtomicUsize,
    reconnects: AtomicUsize,
    changed: Notify,
}

impl RecordingHandler {
    /// Handler that never stops on a status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler that stops the session on any of these codes.
    pub fn stopping_on(codes: &[u16]) -> Self {
        Self {
            stop_codes: codes.to_vec(),
            ..Default::default()
        }
    }

    /// Lines received so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Statuses received so far.
    pub fn statuses(&self) -> Vec<Status> {
        self.statuses.lock().clone()
    }

    /// Times `on_exhausted` ran.
    pub fn exhausted_count(&self) -> usize {
        self.exhausted.load(Ordering::SeqCst)
    }

    /// Times `on_close` ran.
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Times `prepare_reconnect` ran.
    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Wait until `condition` holds. Re-checked after every callback.
    pub async fn wait_until<F>(&self, condition: F)
    where
        F: Fn(&Self) -> bool,
    {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            let _ = notified.as_mut().enable();
            if condition(self) {
                return;
            }
            notified.await;
        }
    }

    /// Wait until at least `count` lines arrived.
    pub async fn wait_for_messages(&self, count: usize) {
        self.wait_until(|h| h.messages.lock().len() >= count).await;
    }
}

impl WatchHandler for RecordingHandler {
    fn on_message(&self, line: &str) {
        self.messages.lock().push(line.to_string());
        self.changed.notify_waiters();
    }

    fn on_status(&self, status: &Status) -> bool {
        self.statuses.lock().push(status.clone());
        self.changed.notify_waiters();
        self.stop_codes.contains(&status.code)
    }

    fn on_exhausted(&self, _error: &WatchError) {
        let _ = self.exhausted.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    fn on_close(&self) {
        let _ = self.closed.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    fn prepare_reconnect(&self, _request: &mut WatchRequest) {
        let _ = self.reconnects.fetch_add(1, Ordering::SeqCst);
    }
}
