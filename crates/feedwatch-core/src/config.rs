//! Reconnect and timeout parameters for a watch session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::ReconnectLimit;
use crate::errors::{Result, WatchError};

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default base reconnect interval in milliseconds.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1000;
/// Default reconnect attempt limit (unlimited).
pub const DEFAULT_RECONNECT_LIMIT: i32 = -1;
/// Default connection-establish timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Default maximum backoff exponent (32x the base interval).
pub const DEFAULT_MAX_INTERVAL_EXPONENT: u32 = 5;
/// Largest accepted backoff exponent.
pub const MAX_INTERVAL_EXPONENT_LIMIT: u32 = 31;

/// Configuration for a watch session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    /// Base reconnect interval in ms (default: 1000). Must be > 0.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Reconnect attempt limit: -1 unlimited, 0 never, N stop after N failures.
    #[serde(default = "default_reconnect_limit")]
    pub reconnect_limit: i32,
    /// Connection-establish timeout in ms (default: 10000). Reads never time out.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Cap on the backoff exponent (default: 5).
    #[serde(default = "default_max_interval_exponent")]
    pub max_interval_exponent: u32,
}

fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}
fn default_reconnect_limit() -> i32 {
    DEFAULT_RECONNECT_LIMIT
}
fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}
fn default_max_interval_exponent() -> u32 {
    DEFAULT_MAX_INTERVAL_EXPONENT
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            reconnect_limit: DEFAULT_RECONNECT_LIMIT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            max_interval_exponent: DEFAULT_MAX_INTERVAL_EXPONENT,
        }
    }
}

impl WatchConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_interval_ms == 0 {
            return Err(WatchError::InvalidConfig(
                "reconnectIntervalMs must be greater than zero".into(),
            ));
        }
        if self.max_interval_exponent > MAX_INTERVAL_EXPONENT_LIMIT {
            return Err(WatchError::InvalidConfig(format!(
                "maxIntervalExponent must be at most {MAX_INTERVAL_EXPONENT_LIMIT}, got {}",
                self.max_interval_exponent
            )));
        }
        Ok(())
    }

    /// Base reconnect interval.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Connection-establish timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Attempt limit in its typed form.
    pub fn limit(&self) -> ReconnectLimit {
        ReconnectLimit::from_raw(self.reconnect_limit)
    }
}
