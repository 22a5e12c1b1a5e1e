//! # Transport seam
//!
//! The supervisor never touches sockets. It hands a [`WatchRequest`] to a
//! [`Transport`] and gets back a [`WatchResponse`] whose body is a byte stream.
//! Connection pooling, TLS and socket-level retries belong to the transport.
//!
//! Dropping a [`WatchResponse`] (or its body) releases the underlying
//! connection, so every exit path of the reader releases it too.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use feedwatch_core::Status;
use futures::Stream;
use url::Url;

/// Body of a streaming response.
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Target of a watch call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchRequest {
    /// Absolute URL of the change feed.
    pub url: String,
    /// Extra request headers, sent in order.
    pub headers: Vec<(String, String)>,
}

impl WatchRequest {
    /// Request without extra headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the value of a query parameter, appending it if absent.
    ///
    /// Used by handlers that resume a feed from the last seen position. The
    /// value is form-encoded and any fragment stays last.
    pub fn set_query_param(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| TransportError::InvalidRequest(format!("url {:?}: {e}", self.url)))?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != name)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        let _ = url
            .query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(name, value);
        self.url = url.into();
        Ok(())
    }
}

/// Response to a watch call: status line plus a streaming body.
pub struct WatchResponse {
    code: u16,
    message: String,
    body: BodyStream,
}

impl WatchResponse {
    /// Assemble a response from its parts.
    pub fn new(code: u16, message: impl Into<String>, body: BodyStream) -> Self {
        Self {
            code,
            message: message.into(),
            body,
        }
    }

    /// Numeric status code.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Reason phrase.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the status is 2xx.
    pub fn is_successful(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Status as handed to the consumer.
    pub fn status(&self) -> Status {
        Status::new(self.code, self.message.clone())
    }

    /// Take ownership of the body stream.
    pub fn into_body(self) -> BodyStream {
        self.body
    }
}

impl fmt::Debug for WatchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchResponse")
            .field("code", &self.code)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Failure to obtain a response.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established or was refused.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Connection establishment exceeded the configured timeout.
    #[error("connect timed out: {0}")]
    Timeout(String),
    /// The request could not be built (bad URL or header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Timeout(_) => "timeout",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Performs one watch call.
///
/// Cancellation is cooperative: the supervisor drops the returned future when
/// the session is closed, so implementations must not rely on running to
/// completion.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dispatch the request and resolve once the status line has arrived.
    async fn send(&self, request: &WatchRequest) -> Result<WatchResponse, TransportError>;
}
