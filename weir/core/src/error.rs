//! Stream Error Taxonomy
//!
//! Errors that can occur while multiplexing upstream feeds into the merged
//! response. Connect, read, and timeout failures are contained per-source
//! (the coordinator turns them into visible `stream error:` lines); a
//! closed sink stops the affected worker; setup failures are the only
//! fatal, pre-stream errors.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while opening, reading, or writing a merged stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The upstream feed could not be reached at open time.
    #[error("connect to {url} failed: {reason}")]
    Connect {
        /// The address that was attempted
        url: String,
        /// What went wrong (transport error or non-2xx status)
        reason: String,
    },

    /// The upstream stream broke after it had started producing.
    #[error("read failed: {reason}")]
    Read {
        /// What went wrong mid-flight
        reason: String,
    },

    /// The downstream client is gone; no further writes will succeed.
    #[error("downstream sink is closed")]
    SinkClosed,

    /// The optional global deadline elapsed before the source finished.
    #[error("timed out after {elapsed:?}")]
    Timeout {
        /// How long the run was allowed to take
        elapsed: Duration,
    },

    /// The transport cannot support incremental streaming. Fatal, reported
    /// before any line is written.
    #[error("setup failed: {0}")]
    Setup(String),
}

impl StreamError {
    /// Whether this error is contained to one source (the multiplex keeps
    /// going) rather than ending the whole run.
    #[must_use]
    pub fn is_contained(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Read { .. } | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamError::Connect {
            url: "http://localhost:8001/stream".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "connect to http://localhost:8001/stream failed: connection refused"
        );

        let err = StreamError::SinkClosed;
        assert_eq!(err.to_string(), "downstream sink is closed");

        let err = StreamError::Timeout {
            elapsed: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "timed out after 5s");
    }

    #[test]
    fn test_containment_policy() {
        assert!(StreamError::Connect {
            url: String::new(),
            reason: String::new()
        }
        .is_contained());
        assert!(StreamError::Read {
            reason: String::new()
        }
        .is_contained());
        assert!(StreamError::Timeout {
            elapsed: Duration::ZERO
        }
        .is_contained());

        assert!(!StreamError::SinkClosed.is_contained());
        assert!(!StreamError::Setup("no flusher".to_string()).is_contained());
    }
}
