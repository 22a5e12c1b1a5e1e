//! Consumer callbacks for a watch session.
//!
//! All callbacks run on the session's continuation task, one at a time and
//! never while a session lock is held, so they may call back into the
//! [`WatchManager`](crate::WatchManager) (for example to close it).

use feedwatch_core::{Status, WatchError};
use tracing::warn;

use crate::transport::WatchRequest;

/// Receives events and lifecycle notifications from a watch session.
pub trait WatchHandler: Send + Sync {
    /// One line of the feed, verbatim and in arrival order.
    fn on_message(&self, line: &str);

    /// A non-success response arrived.
    ///
    /// Return `true` to end the session permanently without reading the body;
    /// `false` reads the body anyway and keeps reconnecting.
    fn on_status(&self, status: &Status) -> bool;

    /// The reconnect limit was exceeded. Called at most once per session.
    fn on_exhausted(&self, error: &WatchError) {
        warn!(error = %error, "watch gave up reconnecting");
    }

    /// The session was closed by its owner. Called at most once per session.
    fn on_close(&self) {}

    /// Adjust the stored request before a reconnect is dispatched.
    fn prepare_reconnect(&self, _request: &mut WatchRequest) {}
}

/// [`WatchHandler`] built from closures.
///
/// Statuses stop the session when they appear in the stop list.
pub struct FnHandler<M> {
    on_message: M,
    stop_codes: Vec<u16>,
}

impl<M> FnHandler<M>
where
    M: Fn(&str) + Send + Sync,
{
    /// Forward lines to `on_message`; no status stops the session.
    pub fn new(on_message: M) -> Self {
        Self {
            on_message,
            stop_codes: Vec::new(),
        }
    }

    /// End the session when any of these codes is returned.
    #[must_use]
    pub fn stop_on(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.stop_codes.extend(codes);
        self
    }
}

impl<M> WatchHandler for FnHandler<M>
where
    M: Fn(&str) + Send + Sync,
{
    fn on_message(&self, line: &str) {
        (self.on_message)(line);
    }

    fn on_status(&self, status: &Status) -> bool {
        self.stop_codes.contains(&status.code)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn fn_handler_forwards_lines() {
        let count = AtomicUsize::new(0);
        let handler = FnHandler::new(|_line: &str| {
            let _ = count.fetch_add(1, Ordering::SeqCst);
        });
        handler.on_message("a");
        handler.on_message("b");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fn_handler_stop_codes() {
        let handler = FnHandler::new(|_: &str| {}).stop_on([410, 403]);
        assert!(handler.on_status(&Status::new(410, "Gone")));
        assert!(handler.on_status(&Status::new(403, "Forbidden")));
        assert!(!handler.on_status(&Status::new(503, "Service Unavailable")));
    }

    #[test]
    fn default_prepare_reconnect_keeps_request() {
        let handler = FnHandler::new(|_: &str| {});
        let mut request = WatchRequest::new("http://feed/watch");
        handler.prepare_reconnect(&mut request);
        assert_eq!(request.url, "http://feed/watch");
    }
}
