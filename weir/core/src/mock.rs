//! Mock Upstream Feeds
//!
//! A small streaming endpoint that emits `data: <label> <i>` lines on an
//! interval, standing in for a real upstream producer. The daemon serves
//! two of these under `--with-mocks`, and the integration tests run them
//! on ephemeral ports.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// One mock feed's shape: what it emits, how much, and how fast.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Word embedded in every emitted line
    pub label: String,
    /// How many lines to emit before closing the stream
    pub count: u32,
    /// Pause between lines
    pub interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            label: "hello".to_string(),
            count: 10,
            interval: Duration::from_millis(200),
        }
    }
}

impl FeedConfig {
    /// Create a feed emitting `count` lines for a label.
    pub fn new(label: impl Into<String>, count: u32, interval: Duration) -> Self {
        Self {
            label: label.into(),
            count,
            interval,
        }
    }
}

/// Build a router serving the feed at `GET /stream`.
pub fn feed_router(feed: FeedConfig) -> Router {
    Router::new()
        .route("/stream", get(stream_feed))
        .with_state(feed)
}

async fn stream_feed(State(feed): State<FeedConfig>) -> impl IntoResponse {
    let (tx, rx) = mpsc::channel::<Bytes>(16);

    tokio::spawn(async move {
        for i in 0..feed.count {
            let line = Bytes::from(format!("data: {} {}\n", feed.label, i));
            if tx.send(line).await.is_err() {
                return;
            }
            tokio::time::sleep(feed.interval).await;
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_feed_defaults_match_original_mocks() {
        let feed = FeedConfig::default();
        assert_eq!(feed.label, "hello");
        assert_eq!(feed.count, 10);
        assert_eq!(feed.interval, Duration::from_millis(200));
    }

    #[test]
    fn test_feed_builder() {
        let feed = FeedConfig::new("world", 5, Duration::from_millis(10));
        assert_eq!(feed.label, "world");
        assert_eq!(feed.count, 5);
    }
}
