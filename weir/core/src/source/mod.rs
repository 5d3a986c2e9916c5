//! Upstream Line Sources
//!
//! One [`LineSource`] wraps one upstream streaming endpoint and produces a
//! sequence of text lines as they arrive. The production implementation,
//! [`HttpLineSource`], GETs the address and scans the chunked body into
//! terminator-delimited lines without ever buffering the whole response.
//!
//! # Usage
//!
//! ```ignore
//! use weir_core::source::{HttpLineSource, LineSource, SourceEvent};
//!
//! let source = HttpLineSource::new("modelA", "http://localhost:8001/stream", client);
//! let mut rx = source.open().await?;
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         SourceEvent::Line(line) => println!("{line}"),
//!         SourceEvent::Failed(reason) => eprintln!("{reason}"),
//!     }
//! }
//! ```

mod http;
mod traits;

pub use http::HttpLineSource;
pub use traits::{LineSource, SourceEvent};
