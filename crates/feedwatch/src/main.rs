//! # feedwatch
//!
//! Command-line watcher: streams a change feed to stdout, one line per event,
//! reconnecting with exponential backoff until interrupted, stopped by a
//! status code, or out of reconnect attempts.

#![deny(unsafe_code)]

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use feedwatch_client::{FnHandler, WatchManager, WatchState};
use feedwatch_core::logging::{init_json_subscriber, init_subscriber};
use feedwatch_settings::{load_settings, load_settings_from_path};
use tracing::{error, info};

use crate::cli::{Cli, render_line};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings before logging so the configured level applies from the start
    let mut settings = match args.settings {
        Some(ref path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().unwrap_or_default(),
    };
    args.apply(&mut settings);

    if settings.logging.json {
        init_json_subscriber(&settings.logging.level);
    } else {
        init_subscriber(&settings.logging.level);
    }
    settings.watch.validate().context("invalid watch configuration")?;

    let pretty = args.pretty;
    let handler = FnHandler::new(move |line: &str| println!("{}", render_line(line, pretty)))
        .stop_on(args.stop_on_status.iter().copied());
    let manager =
        WatchManager::http(&settings.watch, Arc::new(handler)).context("failed to create watch session")?;

    info!(url = %args.url, session_id = %manager.session_id(), "watching feed");
    manager.run(args.request()).context("failed to start watch")?;

    let state = tokio::select! {
        state = manager.wait_finished() => state,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("interrupted, closing watch");
            manager.close();
            manager.state()
        }
    };

    match state {
        WatchState::Exhausted => {
            error!(attempts = manager.reconnect_attempts(), "giving up on feed");
            anyhow::bail!("reconnect attempts exhausted for {}", args.url)
        }
        other => {
            info!(state = %other, "watch finished");
            Ok(())
        }
    }
}
