//! Command-line arguments and how they layer over settings.

use std::path::PathBuf;

use clap::Parser;
use feedwatch_client::WatchRequest;
use feedwatch_core::status::STATUS_GONE;
use feedwatch_settings::FeedwatchSettings;

/// Follow a line-delimited HTTP change feed, reconnecting with backoff.
#[derive(Parser, Debug)]
#[command(name = "feedwatch", version, about = "Follow a line-delimited HTTP change feed")]
pub struct Cli {
    /// Feed URL.
    pub url: String,

    /// Request header as `Name: value`. Repeatable.
    #[arg(short = 'H', long = "header", value_name = "HEADER", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Base reconnect delay in milliseconds.
    #[arg(long)]
    pub reconnect_interval_ms: Option<u64>,

    /// Failed attempts allowed before giving up (negative for unlimited).
    #[arg(long, allow_negative_numbers = true)]
    pub reconnect_limit: Option<i32>,

    /// Connection establishment timeout in milliseconds.
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Cap on the backoff exponent.
    #[arg(long)]
    pub max_interval_exponent: Option<u32>,

    /// Response codes that end the watch. Repeatable.
    #[arg(long = "stop-on-status", value_name = "CODE", default_values_t = [STATUS_GONE])]
    pub stop_on_status: Vec<u16>,

    /// Re-indent JSON lines before printing.
    #[arg(long)]
    pub pretty: bool,

    /// Log filter (overrides settings; `RUST_LOG` overrides both).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Settings file (defaults to `~/.feedwatch/settings.json`).
    #[arg(long)]
    pub settings: Option<PathBuf>,
}

impl Cli {
    /// Layer explicit flags over loaded settings.
    pub fn apply(&self, settings: &mut FeedwatchSettings) {
        let watch = &mut settings.watch;
        if let Some(ms) = self.reconnect_interval_ms {
            watch.reconnect_interval_ms = ms;
        }
        if let Some(limit) = self.reconnect_limit {
            watch.reconnect_limit = limit;
        }
        if let Some(ms) = self.connect_timeout_ms {
            watch.connect_timeout_ms = ms;
        }
        if let Some(exp) = self.max_interval_exponent {
            watch.max_interval_exponent = exp;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
    }

    /// The request to watch.
    pub fn request(&self) -> WatchRequest {
        self.headers
            .iter()
            .fold(WatchRequest::new(&self.url), |request, (name, value)| request.header(name, value))
    }
}

/// Parse `Name: value` (whitespace around the value is trimmed).
fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Format one feed line for stdout.
pub fn render_line(line: &str, pretty: bool) -> String {
    if pretty {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            if let Ok(indented) = serde_json::to_string_pretty(&value) {
                return indented;
            }
        }
    }
    line.to_string()
}
