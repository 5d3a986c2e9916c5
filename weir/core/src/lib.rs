//! Weir Core - Fan-In Stream Multiplexing
//!
//! This crate merges N independent, line-oriented, continuously-produced
//! upstream streams into a single chunked response delivered to one
//! downstream client, in real time. Writes are synchronized so that
//! interleaved lines never corrupt each other, and every line is flushed
//! incrementally instead of after full buffering.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │  upstream A  │   │  upstream B  │      (HTTP feeds of
//! └──────┬───────┘   └──────┬───────┘       newline-delimited text)
//!        │                  │
//!   HttpLineSource     HttpLineSource       one pump task per feed
//!        │                  │
//!   worker task        worker task          one worker per source
//!        └────────┬─────────┘
//!                 │
//!             LineSink                      mutex over write+flush of
//!                 │                         exactly one line at a time
//!            Multiplexer                    barrier: waits for every
//!                 │                         worker, never short-circuits
//!           GET /merge body                 chunked text/plain, one
//!                 │                         chunk per line
//!            downstream client
//! ```
//!
//! # Key Types
//!
//! - [`LineSource`]/[`HttpLineSource`]: one upstream producer of lines
//! - [`LineSink`]: the synchronized, incrementally-flushed output stream
//! - [`Multiplexer`]: fan-in coordination and completion barrier
//! - [`endpoint::router`]: the HTTP boundary (`GET /merge`)
//! - [`WeirConfig`]: sources, optional timeout, terminator, buffer bounds
//!
//! # Guarantees
//!
//! - No two lines ever interleave at the byte level.
//! - Lines from one source keep their upstream order; no ordering exists
//!   between sources.
//! - The merged response terminates only once every source has finished
//!   or failed; a failed source shows up as one embedded error line, not
//!   as an early end of stream.
//!
//! # Module Overview
//!
//! - [`config`]: TOML + environment configuration
//! - [`coordinator`]: the fan-in run, its barrier, and run reports
//! - [`endpoint`]: the merge HTTP handler
//! - [`error`]: the stream error taxonomy
//! - [`mock`]: mock upstream feeds for local runs and tests
//! - [`sink`]: the synchronized line sink and its transports
//! - [`source`]: the line source trait and HTTP implementation

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod mock;
pub mod sink;
pub mod source;

// Re-exports for convenience
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, SourceSpec, WeirConfig,
};
pub use coordinator::{
    MultiplexOptions, Multiplexer, RunError, RunReport, RunState, SourceOutcome, SourceReport,
};
pub use endpoint::AppState;
pub use error::StreamError;
pub use mock::FeedConfig;
pub use sink::{ChannelTransport, LineSink, LineTransport};
pub use source::{HttpLineSource, LineSource, SourceEvent};
