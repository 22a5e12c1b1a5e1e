//! # feedwatch-client
//!
//! Resilient watch sessions over line-delimited change feeds.
//!
//! - [`WatchManager`] supervises one session: dispatch, streaming, backoff
//! - [`Transport`] is the seam to the network; [`HttpTransport`] is the
//!   `reqwest` implementation and [`mock::MockTransport`] the scripted one
//! - [`LineReader`] splits a response body into text lines
//! - [`WatchHandler`] receives lines, statuses and lifecycle notifications

#![deny(unsafe_code)]

pub mod handler;
pub mod http;
pub mod manager;
pub mod mock;
pub mod reader;
pub mod transport;

pub use handler::{FnHandler, WatchHandler};
pub use http::HttpTransport;
pub use manager::{WatchManager, WatchState};
pub use reader::{LineReader, ReadSummary, StreamEnd};
pub use transport::{BodyStream, Transport, TransportError, WatchRequest, WatchResponse};
