//! Merge Endpoint
//!
//! The boundary HTTP handler. `GET /merge` opens a chunked `text/plain`
//! response, builds one [`LineSink`] bound to it, fans the configured
//! sources in through a [`Multiplexer`], and lets the body end when the
//! run reaches AllDone. Individual source failures show up as embedded
//! `stream error:` lines inside a 200 response; only setup problems (no
//! sources, unusable client) are reported as an HTTP-level error, before
//! any streaming begins.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::WeirConfig;
use crate::coordinator::{MultiplexOptions, Multiplexer};
use crate::error::StreamError;
use crate::sink::{ChannelTransport, LineSink};
use crate::source::{HttpLineSource, LineSource};

/// How long to wait for an upstream TCP connect. There is no total
/// request timeout: the feeds are open-ended.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state behind the merge endpoint: the resolved configuration and
/// one HTTP client reused across requests and sources.
pub struct AppState {
    config: WeirConfig,
    client: reqwest::Client,
}

impl AppState {
    /// Build endpoint state from a resolved configuration.
    pub fn new(config: WeirConfig) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| StreamError::Setup(format!("http client: {e}")))?;
        Ok(Self { config, client })
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &WeirConfig {
        &self.config
    }
}

/// Build the merge router: `GET /merge` plus permissive CORS and request
/// tracing.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/merge", get(merge))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /merge`: stream every configured source into one response.
async fn merge(State(state): State<Arc<AppState>>) -> Response {
    match open_stream(&state) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "merge setup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n")).into_response()
        }
    }
}

/// Validate setup and start the fan-in; returns the streaming body.
fn open_stream(state: &AppState) -> Result<Body, StreamError> {
    let config = &state.config;
    if config.sources.is_empty() {
        return Err(StreamError::Setup("no sources configured".to_string()));
    }
    if config.terminator.is_empty() {
        return Err(StreamError::Setup("empty line terminator".to_string()));
    }

    let (tx, rx) = mpsc::channel::<Bytes>(config.read_buffer.max(1));
    let sink = LineSink::new(
        Box::new(ChannelTransport::new(tx)),
        config.terminator.clone(),
    );

    let sources: Vec<Arc<dyn LineSource>> = config
        .sources
        .iter()
        .map(|spec| {
            Arc::new(
                HttpLineSource::new(spec.tag.as_str(), spec.url.as_str(), state.client.clone())
                    .with_terminator(config.terminator.clone())
                    .with_read_buffer(config.read_buffer)
                    .with_max_line_bytes(config.max_line_bytes),
            ) as Arc<dyn LineSource>
        })
        .collect();

    let options = MultiplexOptions {
        timeout: config.timeout,
        ..Default::default()
    };
    let mut mux = Multiplexer::with_options(sources, options);

    // The spawned run owns the only sink; when it reaches AllDone and
    // drops it, the channel closes and the response body ends.
    tokio::spawn(async move {
        match mux.run(&sink).await {
            Ok(report) => info!(
                lines = report.total_lines(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                all_completed = report.all_completed(),
                "merge finished"
            ),
            Err(e) => warn!(error = %e, "merge run refused"),
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Body::from_stream(stream))
}
