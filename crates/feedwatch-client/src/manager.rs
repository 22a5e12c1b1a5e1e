//! # Watch manager
//!
//! Supervises one long-lived watch session:
//! - At most one call is live at a time (guarded by the call slot)
//! - Any response resets the backoff counter before its status is looked at
//! - A non-success status asks the handler whether to stop for good
//! - The body is streamed line by line into the handler
//! - When a call ends without being cancelled, the next attempt is scheduled
//!   on a timer task, or the handler learns the session is exhausted
//!
//! `close()` cancels the live call and any pending reconnect timer, and no
//! call is dispatched once it returns.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use feedwatch_core::{BackoffPolicy, NextAttempt, Result, WatchConfig, WatchError};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::handler::WatchHandler;
use crate::http::HttpTransport;
use crate::reader::LineReader;
use crate::transport::{Transport, WatchRequest, WatchResponse};

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Observable lifecycle of a watch session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchState {
    /// Created, nothing dispatched yet.
    Idle,
    /// A call is waiting for its response.
    Dispatching,
    /// The body of a response is being read.
    Streaming,
    /// Waiting for the reconnect timer.
    BackoffWait,
    /// The handler stopped the session on a status.
    Terminated,
    /// The reconnect limit was exceeded.
    Exhausted,
    /// The owner closed the session.
    Closed,
}

impl WatchState {
    /// Whether the session will never dispatch again.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Terminated | Self::Exhausted | Self::Closed)
    }

    /// Lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::Streaming => "streaming",
            Self::BackoffWait => "backoff_wait",
            Self::Terminated => "terminated",
            Self::Exhausted => "exhausted",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session internals
// ─────────────────────────────────────────────────────────────────────────────

struct CallHandle {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct CallSlot {
    request: Option<WatchRequest>,
    call: Option<CallHandle>,
    pending_reconnect: Option<CancellationToken>,
    next_call_id: u64,
}

struct Session {
    id: Uuid,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn WatchHandler>,
    runtime: Handle,
    slot: Mutex<CallSlot>,
    backoff: Mutex<BackoffPolicy>,
    closed: CancellationToken,
    state: watch::Sender<WatchState>,
}

/// Clears the call slot when a continuation finishes, unwinding included.
struct CallRelease<'a> {
    session: &'a Session,
    call_id: u64,
}

impl Drop for CallRelease<'_> {
    fn drop(&mut self) {
        let mut slot = self.session.slot.lock();
        if slot.call.as_ref().is_some_and(|call| call.id == self.call_id) {
            slot.call = None;
        }
    }
}

impl Session {
    /// Move to `next` unless a final state was already reached.
    /// Returns whether the state changed.
    fn transition(&self, next: WatchState) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_final() || *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "watch state");
            *current = next;
            true
        })
    }

    /// Dispatch a call for `request`. Reconnects pass their timer so a
    /// timer superseded by an owner `run()` does not dispatch again.
    fn dispatch(self: &Arc<Self>, request: WatchRequest, timer: Option<&CancellationToken>) -> Result<()> {
        let mut slot = self.slot.lock();
        if self.closed.is_cancelled() {
            return Err(WatchError::Closed);
        }
        match *self.state.borrow() {
            WatchState::Closed => return Err(WatchError::Closed),
            WatchState::Terminated | WatchState::Exhausted => return Err(WatchError::Terminated),
            _ => {}
        }
        if slot.call.is_some() {
            return Err(WatchError::AlreadyRunning);
        }
        if timer.is_some_and(CancellationToken::is_cancelled) {
            debug!("watch reconnect superseded");
            return Ok(());
        }
        if let Some(pending) = slot.pending_reconnect.take() {
            pending.cancel();
        }

        let call_id = slot.next_call_id;
        slot.next_call_id += 1;
        let cancel = self.closed.child_token();
        slot.request = Some(request.clone());
        slot.call = Some(CallHandle {
            id: call_id,
            cancel: cancel.clone(),
        });
        let _ = self.transition(WatchState::Dispatching);
        metrics::counter!("watch_dispatches_total").increment(1);

        let span = info_span!(parent: None, "watch", session_id = %self.id, call = call_id);
        let session = Arc::clone(self);
        let _ = self
            .runtime
            .spawn(async move { session.complete(call_id, request, cancel).await }.instrument(span));
        Ok(())
    }

    async fn complete(self: Arc<Self>, call_id: u64, request: WatchRequest, cancel: CancellationToken) {
        let _release = CallRelease {
            session: &self,
            call_id,
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            outcome = self.transport.send(&request) => outcome,
        };

        match outcome {
            Err(err) => {
                let kind = err.error_kind();
                metrics::counter!("watch_connect_failures_total", "kind" => kind).increment(1);
                let err = WatchError::Connect(err.to_string());
                info!(error = %err, kind, url = %request.url, "watch connection failed");
            }
            Ok(response) => {
                self.backoff.lock().reset();
                match self.stops_on_status(&response) {
                    Ok(true) => {
                        info!(code = response.code(), "watch stopped by status");
                        drop(response);
                        let _ = self.transition(WatchState::Terminated);
                        return;
                    }
                    Ok(false) => self.stream(response, &cancel).await,
                    Err(panic) => {
                        metrics::counter!("watch_handler_panics_total").increment(1);
                        info!(panic = %panic, "watch terminated unexpectedly");
                    }
                }
            }
        }

        self.finish(call_id, &cancel);
    }

    /// Ask the handler about a non-success status. `Err` carries the panic
    /// message if the handler panicked.
    fn stops_on_status(&self, response: &WatchResponse) -> std::result::Result<bool, String> {
        if response.is_successful() {
            return Ok(false);
        }
        let status = response.status();
        debug!(status = %status, "watch returned non-success status");
        std::panic::catch_unwind(AssertUnwindSafe(|| self.handler.on_status(&status)))
            .map_err(|panic| panic_message(&*panic))
    }

    async fn stream(&self, response: WatchResponse, cancel: &CancellationToken) {
        let _ = self.transition(WatchState::Streaming);
        let handler = Arc::clone(&self.handler);
        let reader = LineReader::new(response.into_body()).run(cancel, |line| {
            metrics::counter!("watch_messages_total").increment(1);
            handler.on_message(&line);
        });

        match AssertUnwindSafe(reader).catch_unwind().await {
            Ok(Ok(summary)) => debug!(lines = summary.lines, end = ?summary.end, "watch stream ended"),
            Ok(Err(err)) => {
                metrics::counter!("watch_stream_errors_total").increment(1);
                let err = WatchError::from(err);
                info!(error = %err, kind = err.error_kind(), "watch terminated unexpectedly");
            }
            Err(panic) => {
                metrics::counter!("watch_handler_panics_total").increment(1);
                info!(panic = %panic_message(&*panic), "watch terminated unexpectedly");
            }
        }
    }

    /// Release the call and arm the next step under the slot lock, so an
    /// owner `run()` cannot dispatch in between.
    fn finish(self: &Arc<Self>, call_id: u64, cancel: &CancellationToken) {
        let exhausted = {
            let mut slot = self.slot.lock();
            if cancel.is_cancelled() || !slot.call.as_ref().is_some_and(|call| call.id == call_id) {
                return;
            }
            slot.call = None;

            let (next, attempts) = {
                let mut backoff = self.backoff.lock();
                let next = backoff.next_delay();
                (next, backoff.attempts())
            };
            match next {
                NextAttempt::Exhausted { attempts } => self.transition(WatchState::Exhausted).then_some(attempts),
                NextAttempt::After(delay) => {
                    let _ = self.transition(WatchState::BackoffWait);
                    let timer = self.closed.child_token();
                    if let Some(stale) = slot.pending_reconnect.replace(timer.clone()) {
                        stale.cancel();
                    }
                    info!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        attempt = attempts,
                        "scheduling watch reconnect"
                    );

                    let session = Arc::clone(self);
                    let _ = self.runtime.spawn(
                        async move {
                            tokio::select! {
                                biased;
                                () = timer.cancelled() => {}
                                () = tokio::time::sleep(delay) => session.reconnect(&timer),
                            }
                        }
                        .in_current_span(),
                    );
                    None
                }
            }
        };

        if let Some(attempts) = exhausted {
            metrics::counter!("watch_exhausted_total").increment(1);
            warn!(attempts, "watch reconnect attempts exhausted");
            self.handler.on_exhausted(&WatchError::Exhausted { attempts });
        }
    }

    fn reconnect(self: &Arc<Self>, timer: &CancellationToken) {
        let Some(stored) = self.slot.lock().request.clone() else {
            return;
        };
        let mut request = stored.clone();
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| self.handler.prepare_reconnect(&mut request))) {
            info!(panic = %panic_message(&*panic), "prepare_reconnect panicked, reusing previous request");
            request = stored;
        }
        if let Err(err) = self.dispatch(request, Some(timer)) {
            debug!(error = %err, "watch reconnect skipped");
        }
    }

    fn close(&self) {
        let first = {
            let mut slot = self.slot.lock();
            if let Some(call) = slot.call.take() {
                call.cancel.cancel();
            }
            if let Some(timer) = slot.pending_reconnect.take() {
                timer.cancel();
            }
            self.closed.cancel();
            self.state.send_if_modified(|current| {
                if *current == WatchState::Closed {
                    return false;
                }
                *current = WatchState::Closed;
                true
            })
        };
        if first {
            debug!(session_id = %self.id, "watch closed");
            self.handler.on_close();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Public handle
// ─────────────────────────────────────────────────────────────────────────────

/// A resilient watch over a line-delimited change feed.
///
/// Dropping the manager closes the session.
pub struct WatchManager {
    inner: Arc<Session>,
}

impl WatchManager {
    /// Create a session. Must be called from within a tokio runtime; the
    /// session spawns its calls and timers onto that runtime.
    pub fn new(
        config: &WatchConfig,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn WatchHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| WatchError::NoRuntime(e.to_string()))?;
        let (state, _) = watch::channel(WatchState::Idle);
        let id = Uuid::now_v7();
        debug!(session_id = %id, "watch session created");

        Ok(Self {
            inner: Arc::new(Session {
                id,
                transport,
                handler,
                runtime,
                slot: Mutex::new(CallSlot::default()),
                backoff: Mutex::new(BackoffPolicy::from_config(config)),
                closed: CancellationToken::new(),
                state,
            }),
        })
    }

    /// Session over HTTP using [`HttpTransport`].
    pub fn http(config: &WatchConfig, handler: Arc<dyn WatchHandler>) -> Result<Self> {
        let transport =
            HttpTransport::from_config(config).map_err(|e| WatchError::InvalidConfig(e.to_string()))?;
        Self::new(config, Arc::new(transport), handler)
    }

    /// Store `request` and dispatch a call for it. Returns immediately.
    ///
    /// Fails with [`WatchError::Closed`] after `close()`,
    /// [`WatchError::Terminated`] once the session stopped by status or
    /// exhaustion, and [`WatchError::AlreadyRunning`] while a call is live.
    pub fn run(&self, request: WatchRequest) -> Result<()> {
        self.inner.dispatch(request, None)
    }

    /// Cancel the live call and any pending reconnect. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Current state.
    pub fn state(&self) -> WatchState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<WatchState> {
        self.inner.state.subscribe()
    }

    /// Resolve once the session reaches a final state, returning it.
    pub async fn wait_finished(&self) -> WatchState {
        let mut rx = self.subscribe();
        match rx.wait_for(WatchState::is_final).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Identifier carried on every log line of this session.
    pub fn session_id(&self) -> Uuid {
        self.inner.id
    }

    /// Failed attempts since the last response.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.backoff.lock().attempts()
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

impl fmt::Debug for WatchManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchManager")
            .field("session_id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for WatchManager {
    fn drop(&mut self) {
        self.inner.close();
    }
}
