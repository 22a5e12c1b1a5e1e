//! Settings schema.

use feedwatch_core::WatchConfig;
use feedwatch_core::logging::DEFAULT_LOG_LEVEL;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Top-level settings document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedwatchSettings {
    /// Reconnect and timeout parameters for watch sessions.
    pub watch: WatchConfig,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl FeedwatchSettings {
    /// Reject values the watch session cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.watch.validate()?;
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            json: false,
        }
    }
}
