//! `reqwest`-backed [`Transport`].
//!
//! Only connection establishment is bounded; the request itself has no
//! overall timeout because a watch stream is expected to stay open
//! indefinitely.

use std::time::Duration;

use async_trait::async_trait;
use feedwatch_core::WatchConfig;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::transport::{Transport, TransportError, WatchRequest, WatchResponse};

/// HTTP transport for line-delimited change feeds.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a streaming client with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self { client })
    }

    /// Build from session configuration.
    pub fn from_config(config: &WatchConfig) -> Result<Self, TransportError> {
        Self::new(config.connect_timeout())
    }

    /// Wrap an existing client. Its timeouts are used as-is.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidRequest(format!("header value for {name}: {e}")))?;
        let _ = map.append(name, value);
    }
    Ok(map)
}

fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else {
        TransportError::Connect(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &WatchRequest) -> Result<WatchResponse, TransportError> {
        let headers = header_map(&request.headers)?;
        debug!(url = %request.url, "dispatching watch request");

        let response = self
            .client
            .get(&request.url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        let message = status.canonical_reason().unwrap_or_default().to_string();
        let body = response.bytes_stream().map_err(std::io::Error::other);

        Ok(WatchResponse::new(status.as_u16(), message, Box::pin(body)))
    }
}
