//! Line Source Trait
//!
//! Trait definition for upstream feeds. The abstraction lets the
//! multiplexer forward lines from anything that can produce them (the
//! HTTP implementation in production, scripted feeds in tests) without
//! changing coordination logic.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StreamError;

/// Events produced by an open line source.
///
/// The channel closing without a `Failed` event means the feed finished
/// cleanly. Lines already delivered before a failure remain valid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    /// One complete line of upstream text, terminator stripped.
    Line(String),
    /// The stream broke mid-flight; no further lines will arrive.
    Failed(String),
}

/// One upstream producer of terminator-delimited lines.
#[async_trait]
pub trait LineSource: Send + Sync {
    /// The label prefixed to every line from this source.
    fn tag(&self) -> &str;

    /// Open the streaming connection.
    ///
    /// Fails with [`StreamError::Connect`] if the connection cannot be
    /// established (address unreachable, non-2xx status, transport
    /// error). On success, returns a bounded receiver of line events;
    /// dropping the receiver releases the upstream connection. Each
    /// source is opened at most once per run; no retries.
    async fn open(&self) -> Result<mpsc::Receiver<SourceEvent>, StreamError>;
}
