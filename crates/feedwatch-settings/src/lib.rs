//! # feedwatch-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`FeedwatchSettings::default()`]
//! 2. **User file**: `~/.feedwatch/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `FEEDWATCH_*` overrides (highest priority)
//!
//! Command-line flags, when present, are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{FeedwatchSettings, LoggingSettings};
