//! Synchronized Line Sink
//!
//! A single logical output stream shared by every source worker. Concurrent
//! producers are serialized with a mutex held only across the write+flush of
//! one formatted line, so a slow upstream read never blocks another source's
//! write, and no two producers' bytes ever interleave within one line.
//!
//! The sink formats each line as `[tag] payload` plus the configured
//! terminator before taking the lock, then hands the finished frame to a
//! [`LineTransport`]. The channel transport emits one HTTP body chunk per
//! frame, which is what makes the merge observable in real time.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::error::StreamError;

/// Downstream transport for complete line frames.
///
/// Implementations must deliver each frame as an indivisible unit; the
/// sink guarantees at most one in-flight call at any instant.
#[async_trait]
pub trait LineTransport: Send {
    /// Write one complete formatted line.
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), StreamError>;

    /// Push any buffered bytes toward the client.
    async fn flush(&mut self) -> Result<(), StreamError>;
}

/// Transport that forwards each frame into an mpsc channel.
///
/// The receiving half is typically wrapped into a streamed HTTP response
/// body, so every frame becomes one chunk and flushing is inherent. A
/// failed send means the receiver (the client connection) is gone.
pub struct ChannelTransport {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelTransport {
    /// Wrap a channel sender as a line transport.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl LineTransport for ChannelTransport {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), StreamError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| StreamError::SinkClosed)
    }

    async fn flush(&mut self) -> Result<(), StreamError> {
        // Each frame is already delivered as its own chunk.
        Ok(())
    }
}

/// The synchronized sink shared by all source workers.
///
/// Cloning is cheap; clones share the same transport and lock.
#[derive(Clone)]
pub struct LineSink {
    transport: Arc<Mutex<Box<dyn LineTransport>>>,
    terminator: String,
}

impl LineSink {
    /// Create a sink over a transport with the given line terminator.
    #[must_use]
    pub fn new(transport: Box<dyn LineTransport>, terminator: impl Into<String>) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            terminator: terminator.into(),
        }
    }

    /// The configured line terminator.
    #[must_use]
    pub fn terminator(&self) -> &str {
        &self.terminator
    }

    /// Append one complete line for a tag.
    ///
    /// Formats `[tag] payload` plus the terminator, then writes and
    /// flushes the single frame under the lock. Returns
    /// [`StreamError::SinkClosed`] once the client is gone; callers must
    /// stop writing when they see it.
    pub async fn push_line(&self, tag: &str, payload: &str) -> Result<(), StreamError> {
        let mut frame =
            String::with_capacity(tag.len() + payload.len() + self.terminator.len() + 3);
        frame.push('[');
        frame.push_str(tag);
        frame.push_str("] ");
        frame.push_str(payload);
        frame.push_str(&self.terminator);
        let frame = Bytes::from(frame);

        let mut transport = self.transport.lock().await;
        transport.write_frame(frame).await?;
        transport.flush().await
    }

    /// Flush the transport without writing a line.
    pub async fn flush(&self) -> Result<(), StreamError> {
        self.transport.lock().await.flush().await
    }
}
