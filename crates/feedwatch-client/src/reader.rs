//! # Line reader
//!
//! Turns a response body into newline-delimited text events:
//! - Buffers incoming bytes and splits on `\n` (a trailing `\r` is dropped)
//! - Decodes each line as UTF-8, replacing malformed sequences
//! - Delivers a final unterminated line when the stream ends
//! - Stops early when the call's cancellation token fires
//!
//! Each line is handed to the callback before the next chunk is polled, so a
//! slow consumer applies backpressure to the connection.

use bytes::BytesMut;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::transport::BodyStream;

const INITIAL_BUFFER_CAPACITY: usize = 8192;

/// How a read loop ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server closed the body.
    Eof,
    /// The call was cancelled while reading.
    Cancelled,
}

/// Summary of a completed read loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadSummary {
    /// Lines delivered to the callback.
    pub lines: u64,
    /// Why reading stopped.
    pub end: StreamEnd,
}

/// Splits a body stream into lines.
pub struct LineReader {
    body: BodyStream,
    buffer: BytesMut,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    finished: bool,
}

impl LineReader {
    /// Wrap a response body.
    pub fn new(body: BodyStream) -> Self {
        Self {
            body,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            scanned: 0,
            finished: false,
        }
    }

    /// Next complete line, or `None` at end of stream.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
                let mut line = self.buffer.split_to(self.scanned + offset + 1);
                self.scanned = 0;
                line.truncate(line.len() - 1);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            if self.finished {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                self.scanned = 0;
                let rest = self.buffer.split();
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }

            self.scanned = self.buffer.len();
            match self.body.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => self.finished = true,
            }
        }
    }

    /// Deliver every line to `on_line` until end of stream, a read error, or
    /// cancellation of `cancel`.
    pub async fn run<F>(mut self, cancel: &CancellationToken, mut on_line: F) -> std::io::Result<ReadSummary>
    where
        F: FnMut(String),
    {
        let mut lines = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Ok(ReadSummary { lines, end: StreamEnd::Cancelled });
                }
                next = self.next_line() => next?,
            };
            match next {
                Some(line) => {
                    on_line(line);
                    lines += 1;
                }
                None => return Ok(ReadSummary { lines, end: StreamEnd::Eof }),
            }
        }
    }
}
