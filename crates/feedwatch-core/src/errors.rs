//! Error hierarchy for watch sessions.
//!
//! Errors fall into three groups:
//! - **Transient**: [`WatchError::Connect`] and [`WatchError::Stream`] are logged
//!   and answered with a reconnect, never surfaced to the consumer.
//! - **Terminal**: [`WatchError::Exhausted`] is delivered once to the consumer
//!   when the reconnect limit is used up.
//! - **Usage**: the remaining variants are returned from session operations
//!   called in the wrong state or with bad configuration.

use thiserror::Error;

/// Errors produced by watch sessions and their collaborators.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The request could not be dispatched or no response arrived.
    #[error("watch connection failed: {0}")]
    Connect(String),
    /// The response body failed while being read.
    #[error("watch stream interrupted: {0}")]
    Stream(#[from] std::io::Error),
    /// The reconnect attempt limit was exceeded.
    #[error("exhausted reconnects after {attempts} attempts")]
    Exhausted {
        /// Consecutive failed attempts since the last response.
        attempts: u32,
    },
    /// The session was closed by its owner.
    #[error("watch session is closed")]
    Closed,
    /// The session ended permanently (status stop or exhaustion).
    #[error("watch session has terminated")]
    Terminated,
    /// A call is already in flight for this session.
    #[error("a watch call is already in flight")]
    AlreadyRunning,
    /// No tokio runtime was available to drive the session.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
    /// A configuration value was out of range.
    #[error("invalid watch configuration: {0}")]
    InvalidConfig(String),
}

impl WatchError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Stream(_) => "stream",
            Self::Exhausted { .. } => "exhausted",
            Self::Closed => "closed",
            Self::Terminated => "terminated",
            Self::AlreadyRunning => "already_running",
            Self::NoRuntime(_) => "no_runtime",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

/// Result type for watch operations.
pub type Result<T> = std::result::Result<T, WatchError>;
