//! HTTP Line Source Implementation
//!
//! Streams one upstream GET endpoint and scans the body into lines as the
//! bytes arrive. The scan is lazy: forward progress happens line-by-line
//! on each received chunk, suspending only on the next network read, never
//! on full-body completion.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use super::traits::{LineSource, SourceEvent};
use crate::config::{DEFAULT_MAX_LINE_BYTES, DEFAULT_READ_BUFFER};
use crate::error::StreamError;

/// Incremental terminator-delimited line scanner.
///
/// Accumulates chunk bytes and yields complete lines as they appear. A
/// single trailing carriage return is stripped from each line, matching
/// how upstream feeds written against `\r\n` conventions behave over a
/// plain `\n` terminator.
struct LineScanner {
    buffer: String,
    terminator: String,
    max_line_bytes: usize,
}

impl LineScanner {
    fn new(terminator: String, max_line_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            terminator,
            max_line_bytes,
        }
    }

    /// Feed one chunk of bytes; returns the complete lines it finished.
    ///
    /// Errors with a reason string when a line exceeds the configured
    /// byte bound before its terminator arrives.
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find(&self.terminator) {
            let mut line: String = self.buffer[..pos].to_string();
            if line.ends_with('\r') {
                line.pop();
            }
            if line.len() > self.max_line_bytes {
                return Err(format!(
                    "line exceeded {} bytes ({})",
                    self.max_line_bytes,
                    line.len()
                ));
            }
            lines.push(line);
            self.buffer = self.buffer[pos + self.terminator.len()..].to_string();
        }

        if self.buffer.len() > self.max_line_bytes {
            return Err(format!(
                "line exceeded {} bytes without a terminator",
                self.max_line_bytes
            ));
        }

        Ok(lines)
    }

    /// The trailing unterminated chunk at end of stream, if any.
    fn finish(self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = self.buffer;
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

/// One upstream HTTP feed.
#[derive(Clone)]
pub struct HttpLineSource {
    /// Label prefixed to every line from this feed
    tag: String,
    /// Streaming endpoint address
    url: String,
    /// HTTP client (shared, no total timeout so long-lived streams survive)
    client: reqwest::Client,
    /// Line terminator to scan for
    terminator: String,
    /// Channel capacity, in lines
    read_buffer: usize,
    /// Upper bound on a single line, in bytes
    max_line_bytes: usize,
}

impl HttpLineSource {
    /// Create a source for a tag and address.
    pub fn new(
        tag: impl Into<String>,
        url: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            tag: tag.into(),
            url: url.into(),
            client,
            terminator: "\n".to_string(),
            read_buffer: DEFAULT_READ_BUFFER,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// Set the line terminator to scan for.
    #[must_use]
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Set the channel capacity, in lines.
    #[must_use]
    pub fn with_read_buffer(mut self, read_buffer: usize) -> Self {
        self.read_buffer = read_buffer.max(1);
        self
    }

    /// Set the upper bound on a single line, in bytes.
    #[must_use]
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// The configured address.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LineSource for HttpLineSource {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn open(&self) -> Result<mpsc::Receiver<SourceEvent>, StreamError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| StreamError::Connect {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(StreamError::Connect {
                url: self.url.clone(),
                reason: format!("upstream returned {}", response.status()),
            });
        }

        let (tx, rx) = mpsc::channel(self.read_buffer);
        let mut stream = response.bytes_stream();
        let mut scanner = LineScanner::new(self.terminator.clone(), self.max_line_bytes);
        let tag = self.tag.clone();

        // Pump task: owns the response body; every exit path drops it,
        // releasing the upstream connection. A failed send means the
        // worker hung up, which cancels the read loop.
        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => match scanner.push(&bytes) {
                        Ok(lines) => {
                            for line in lines {
                                if tx.send(SourceEvent::Line(line)).await.is_err() {
                                    debug!(tag = %tag, "receiver dropped, closing feed");
                                    return;
                                }
                            }
                        }
                        Err(reason) => {
                            let _ = tx.send(SourceEvent::Failed(reason)).await;
                            return;
                        }
                    },
                    Err(e) => {
                        let _ = tx.send(SourceEvent::Failed(e.to_string())).await;
                        return;
                    }
                }
            }

            // Stream ended; an unterminated tail still counts as a line.
            if let Some(line) = scanner.finish() {
                let _ = tx.send(SourceEvent::Line(line)).await;
            }
            debug!(tag = %tag, "feed finished");
        });

        Ok(rx)
    }
}
