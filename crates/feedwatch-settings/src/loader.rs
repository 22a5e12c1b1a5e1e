//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FeedwatchSettings::default()`]
//! 2. If `~/.feedwatch/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::FeedwatchSettings;

/// Env var overriding the base reconnect interval (ms).
pub const ENV_RECONNECT_INTERVAL_MS: &str = "FEEDWATCH_RECONNECT_INTERVAL_MS";
/// Env var overriding the reconnect attempt limit.
pub const ENV_RECONNECT_LIMIT: &str = "FEEDWATCH_RECONNECT_LIMIT";
/// Env var overriding the connect timeout (ms).
pub const ENV_CONNECT_TIMEOUT_MS: &str = "FEEDWATCH_CONNECT_TIMEOUT_MS";
/// Env var overriding the maximum backoff exponent.
pub const ENV_MAX_INTERVAL_EXPONENT: &str = "FEEDWATCH_MAX_INTERVAL_EXPONENT";
/// Env var overriding the log filter.
pub const ENV_LOG_LEVEL: &str = "FEEDWATCH_LOG_LEVEL";
/// Env var switching JSON log output.
pub const ENV_LOG_JSON: &str = "FEEDWATCH_LOG_JSON";

/// Resolve the path to the settings file (`~/.feedwatch/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".feedwatch").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FeedwatchSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or out-of-range values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<FeedwatchSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<FeedwatchSettings> {
    let defaults = serde_json::to_value(FeedwatchSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `FEEDWATCH_*` environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut FeedwatchSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and leave the file/default value
/// in place.
pub fn apply_overrides<F>(settings: &mut FeedwatchSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = read_u64(&lookup, ENV_RECONNECT_INTERVAL_MS, 1, 3_600_000) {
        settings.watch.reconnect_interval_ms = v;
    }
    if let Some(v) = read_i32(&lookup, ENV_RECONNECT_LIMIT) {
        settings.watch.reconnect_limit = v;
    }
    if let Some(v) = read_u64(&lookup, ENV_CONNECT_TIMEOUT_MS, 1, 3_600_000) {
        settings.watch.connect_timeout_ms = v;
    }
    if let Some(v) = read_u64(&lookup, ENV_MAX_INTERVAL_EXPONENT, 0, 31) {
        // Range-checked above
        settings.watch.max_interval_exponent = u32::try_from(v).unwrap_or(31);
    }
    if let Some(v) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
        settings.logging.level = v;
    }
    if let Some(val) = lookup(ENV_LOG_JSON) {
        match parse_bool(&val) {
            Some(v) => settings.logging.json = v,
            None => tracing::warn!(key = ENV_LOG_JSON, value = %val, "invalid boolean env var, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_u64<F>(lookup: &F, name: &str, min: u64, max: u64) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let val = lookup(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_i32<F>(lookup: &F, name: &str) -> Option<i32>
where
    F: Fn(&str) -> Option<String>,
{
    let val = lookup(name)?;
    let result = val.trim().parse::<i32>().ok();
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid i32 env var, ignoring");
    }
    result
}
