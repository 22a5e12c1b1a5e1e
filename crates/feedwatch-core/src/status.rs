//! Non-success response description handed to the consumer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// HTTP 410: the resume point is gone and the watch must be restarted from scratch.
pub const STATUS_GONE: u16 = 410;

/// Code/message pair for a response the feed did not answer successfully.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Numeric response code.
    pub code: u16,
    /// Reason phrase or server-provided message.
    pub message: String,
}

impl Status {
    /// Create a status.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.message)
        }
    }
}
