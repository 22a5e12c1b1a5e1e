//! # feedwatch-core
//!
//! Foundation types shared by every feedwatch crate:
//!
//! - **Backoff**: [`BackoffPolicy`] computes reconnect delays and tracks attempts
//! - **Configuration**: [`WatchConfig`] carries the reconnect/timeout parameters
//! - **Status**: [`Status`] describes a non-success response from the feed
//! - **Errors**: [`WatchError`] hierarchy via `thiserror`
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod backoff;
pub mod config;
pub mod errors;
pub mod logging;
pub mod status;

pub use backoff::{BackoffPolicy, NextAttempt, ReconnectLimit};
pub use config::WatchConfig;
pub use errors::{Result, WatchError};
pub use status::Status;
