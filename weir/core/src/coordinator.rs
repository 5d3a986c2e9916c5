//! Fan-In Multiplexer
//!
//! Launches one concurrent worker per configured source, each forwarding
//! tagged lines into the shared [`LineSink`], and completes only when
//! every worker has terminated. The merged stream stays open as long as
//! any source is still producing, even if the others already failed; no
//! short-circuit on first completion or first failure.
//!
//! Connect and read failures are contained per-source: the worker emits a
//! single synthetic `stream error: …` line and exits; the other sources
//! keep streaming. A closed sink (client gone) stops each worker on its
//! next write attempt without a further line. An optional global timeout
//! aborts any still-running worker and emits one timeout line per
//! unfinished source.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::sink::LineSink;
use crate::source::{LineSource, SourceEvent};

// =============================================================================
// Options & Run State
// =============================================================================

/// Options for one multiplexer run.
#[derive(Clone, Debug)]
pub struct MultiplexOptions {
    /// Global deadline for the whole run. `None` (the default) lets the
    /// run last as long as the slowest source.
    pub timeout: Option<Duration>,
    /// Upper bound on the number of sources one run will fan in.
    pub max_sources: usize,
}

impl Default for MultiplexOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_sources: 32,
        }
    }
}

impl MultiplexOptions {
    /// Set the global deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Lifecycle of one multiplexer run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Not yet started
    Idle,
    /// Workers are streaming
    Running,
    /// Every worker has terminated
    AllDone,
}

// =============================================================================
// Run Reporting
// =============================================================================

/// How one source's worker terminated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceOutcome {
    /// The feed ended cleanly.
    Completed {
        /// Lines delivered to the sink
        lines: u64,
    },
    /// The feed could not be opened; one synthetic error line was emitted.
    ConnectFailed,
    /// The feed broke mid-stream; delivered lines stand, one synthetic
    /// error line was emitted.
    ReadFailed {
        /// Lines delivered before the break
        lines: u64,
    },
    /// The downstream client went away; the worker stopped silently.
    SinkClosed {
        /// Lines delivered before the sink closed
        lines: u64,
    },
    /// The global deadline elapsed while this source was still running.
    TimedOut,
}

impl SourceOutcome {
    /// Lines this source delivered to the sink, where known.
    #[must_use]
    pub fn lines(&self) -> u64 {
        match self {
            Self::Completed { lines } | Self::ReadFailed { lines } | Self::SinkClosed { lines } => {
                *lines
            }
            Self::ConnectFailed | Self::TimedOut => 0,
        }
    }
}

/// Per-source record in a [`RunReport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceReport {
    /// The source's tag
    pub tag: String,
    /// How its worker terminated
    pub outcome: SourceOutcome,
}

/// Summary of one completed run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// One record per configured source
    pub sources: Vec<SourceReport>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl RunReport {
    /// Whether every source ended cleanly.
    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.sources
            .iter()
            .all(|s| matches!(s.outcome, SourceOutcome::Completed { .. }))
    }

    /// Total lines delivered across all sources.
    #[must_use]
    pub fn total_lines(&self) -> u64 {
        self.sources.iter().map(|s| s.outcome.lines()).sum()
    }

    /// The record for one tag, if it exists.
    #[must_use]
    pub fn source(&self, tag: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.tag == tag)
    }
}

/// Error when starting a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunError {
    /// The multiplexer already ran; runs are one-shot.
    AlreadyRan,
    /// More sources were configured than the run allows.
    TooManySources {
        /// How many were configured
        configured: usize,
        /// The configured ceiling
        max: usize,
    },
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRan => write!(f, "multiplexer already ran"),
            Self::TooManySources { configured, max } => {
                write!(f, "{configured} sources configured, at most {max} allowed")
            }
        }
    }
}

impl std::error::Error for RunError {}

// =============================================================================
// Multiplexer
// =============================================================================

/// Fan-in coordinator over N line sources and one synchronized sink.
pub struct Multiplexer {
    sources: Vec<Arc<dyn LineSource>>,
    options: MultiplexOptions,
    state: RunState,
}

impl Multiplexer {
    /// Create a multiplexer with default options.
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn LineSource>>) -> Self {
        Self::with_options(sources, MultiplexOptions::default())
    }

    /// Create a multiplexer with custom options.
    #[must_use]
    pub fn with_options(sources: Vec<Arc<dyn LineSource>>, options: MultiplexOptions) -> Self {
        Self {
            sources,
            options,
            state: RunState::Idle,
        }
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Number of configured sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Run the fan-in to completion.
    ///
    /// Spawns one worker per source and waits for all of them: the
    /// barrier releases only after every worker has terminated,
    /// regardless of individual outcomes. Returns a [`RunReport`] with
    /// one record per source. Runs are one-shot.
    pub async fn run(&mut self, sink: &LineSink) -> Result<RunReport, RunError> {
        if self.state != RunState::Idle {
            return Err(RunError::AlreadyRan);
        }
        if self.sources.len() > self.options.max_sources {
            return Err(RunError::TooManySources {
                configured: self.sources.len(),
                max: self.options.max_sources,
            });
        }
        self.state = RunState::Running;

        let started = std::time::Instant::now();
        let mut workers = JoinSet::new();
        for source in &self.sources {
            let source = Arc::clone(source);
            let sink = sink.clone();
            workers.spawn(forward_source(source, sink));
        }
        debug!(sources = self.sources.len(), "fan-in running");

        let deadline = self
            .options
            .timeout
            .map(|t| tokio::time::Instant::now() + t);
        let mut reports = Vec::with_capacity(self.sources.len());

        loop {
            let joined = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, workers.join_next()).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            self.abort_stragglers(&mut workers, &mut reports, sink).await;
                            break;
                        }
                    }
                }
                None => workers.join_next().await,
            };

            match joined {
                Some(Ok((tag, outcome))) => reports.push(SourceReport { tag, outcome }),
                Some(Err(e)) => warn!(error = %e, "source worker panicked"),
                None => break,
            }
        }

        self.state = RunState::AllDone;
        if let Err(e) = sink.flush().await {
            debug!(error = %e, "final flush failed");
        }

        let report = RunReport {
            sources: reports,
            elapsed: started.elapsed(),
        };
        debug!(
            lines = report.total_lines(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "fan-in done"
        );
        Ok(report)
    }

    /// Abort every still-running worker after the deadline, record timed
    /// out sources, and emit one synthetic timeout line per straggler.
    async fn abort_stragglers(
        &self,
        workers: &mut JoinSet<(String, SourceOutcome)>,
        reports: &mut Vec<SourceReport>,
        sink: &LineSink,
    ) {
        let timeout = self.options.timeout.unwrap_or_default();
        warn!(timeout_ms = timeout.as_millis() as u64, "deadline elapsed, aborting stragglers");
        workers.abort_all();

        // Workers that finished between the deadline firing and the abort
        // still report normally.
        while let Some(joined) = workers.join_next().await {
            if let Ok((tag, outcome)) = joined {
                reports.push(SourceReport { tag, outcome });
            }
        }

        let finished: HashSet<String> = reports.iter().map(|r| r.tag.clone()).collect();
        let error = StreamError::Timeout { elapsed: timeout };
        for source in &self.sources {
            if !finished.contains(source.tag()) {
                let _ = sink
                    .push_line(source.tag(), &format!("stream error: {error}"))
                    .await;
                reports.push(SourceReport {
                    tag: source.tag().to_string(),
                    outcome: SourceOutcome::TimedOut,
                });
            }
        }
    }
}

/// One worker: connect, forward lines, terminate.
async fn forward_source(source: Arc<dyn LineSource>, sink: LineSink) -> (String, SourceOutcome) {
    let tag = source.tag().to_string();

    let mut rx = match source.open().await {
        Ok(rx) => rx,
        Err(e) => {
            warn!(tag = %tag, error = %e, "source failed to connect");
            let _ = sink.push_line(&tag, &format!("stream error: {e}")).await;
            return (tag, SourceOutcome::ConnectFailed);
        }
    };

    let mut lines: u64 = 0;
    while let Some(event) = rx.recv().await {
        match event {
            SourceEvent::Line(line) => {
                // SinkClosed means the client is gone: stop immediately
                // and silently. Dropping the receiver cancels the feed.
                if sink.push_line(&tag, &line).await.is_err() {
                    debug!(tag = %tag, lines, "sink closed, stopping source");
                    return (tag, SourceOutcome::SinkClosed { lines });
                }
                lines += 1;
            }
            SourceEvent::Failed(reason) => {
                warn!(tag = %tag, reason = %reason, "source broke mid-stream");
                let _ = sink.push_line(&tag, &format!("stream error: {reason}")).await;
                return (tag, SourceOutcome::ReadFailed { lines });
            }
        }
    }

    debug!(tag = %tag, lines, "source finished");
    (tag, SourceOutcome::Completed { lines })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    use super::*;
    use crate::sink::ChannelTransport;

    /// A feed that plays back scripted events on a schedule.
    struct ScriptedSource {
        tag: String,
        events: Vec<SourceEvent>,
        interval: Duration,
        connect_error: bool,
    }

    impl ScriptedSource {
        fn new(tag: &str, events: Vec<SourceEvent>) -> Self {
            Self {
                tag: tag.to_string(),
                events,
                interval: Duration::ZERO,
                connect_error: false,
            }
        }

        fn with_interval(mut self, interval: Duration) -> Self {
            self.interval = interval;
            self
        }

        fn unreachable(tag: &str) -> Self {
            Self {
                tag: tag.to_string(),
                events: Vec::new(),
                interval: Duration::ZERO,
                connect_error: true,
            }
        }

        fn lines(tag: &str, count: usize) -> Self {
            let events = (0..count)
                .map(|i| SourceEvent::Line(format!("data: {tag} {i}")))
                .collect();
            Self::new(tag, events)
        }
    }

    #[async_trait]
    impl LineSource for ScriptedSource {
        fn tag(&self) -> &str {
            &self.tag
        }

        async fn open(&self) -> Result<mpsc::Receiver<SourceEvent>, StreamError> {
            if self.connect_error {
                return Err(StreamError::Connect {
                    url: format!("scripted://{}", self.tag),
                    reason: "connection refused".to_string(),
                });
            }
            let (tx, rx) = mpsc::channel(4);
            let events = self.events.clone();
            let interval = self.interval;
            tokio::spawn(async move {
                for event in events {
                    if !interval.is_zero() {
                        tokio::time::sleep(interval).await;
                    }
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    fn channel_sink(capacity: usize) -> (LineSink, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sink = LineSink::new(Box::new(ChannelTransport::new(tx)), "\n");
        (sink, rx)
    }

    async fn collect_lines(mut rx: mpsc::Receiver<Bytes>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(frame) = rx.recv().await {
            lines.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        lines
    }

    #[tokio::test]
    async fn test_state_machine() {
        let (sink, _rx) = channel_sink(64);
        let mut mux = Multiplexer::new(vec![Arc::new(ScriptedSource::lines("a", 1))]);
        assert_eq!(mux.state(), RunState::Idle);

        mux.run(&sink).await.unwrap();
        assert_eq!(mux.state(), RunState::AllDone);

        assert_eq!(mux.run(&sink).await.unwrap_err(), RunError::AlreadyRan);
    }

    #[tokio::test]
    async fn test_too_many_sources() {
        let sources: Vec<Arc<dyn LineSource>> = (0..3)
            .map(|i| Arc::new(ScriptedSource::lines(&format!("s{i}"), 1)) as Arc<dyn LineSource>)
            .collect();
        let options = MultiplexOptions {
            max_sources: 2,
            ..Default::default()
        };
        let (sink, _rx) = channel_sink(64);
        let mut mux = Multiplexer::with_options(sources, options);
        assert_eq!(
            mux.run(&sink).await.unwrap_err(),
            RunError::TooManySources {
                configured: 3,
                max: 2
            }
        );
    }

    #[tokio::test]
    async fn test_merges_all_sources() {
        let (sink, rx) = channel_sink(256);
        let mut mux = Multiplexer::new(vec![
            Arc::new(ScriptedSource::lines("a", 10)),
            Arc::new(ScriptedSource::lines("b", 10)),
        ]);

        let report = mux.run(&sink).await.unwrap();
        drop(sink);

        assert!(report.all_completed());
        assert_eq!(report.total_lines(), 20);

        let lines = collect_lines(rx).await;
        assert_eq!(lines.len(), 20);

        // Per-source FIFO: lines from one tag appear in emission order.
        for tag in ["a", "b"] {
            let ours: Vec<&String> = lines
                .iter()
                .filter(|l| l.starts_with(&format!("[{tag}]")))
                .collect();
            let expected: Vec<String> = (0..10)
                .map(|i| format!("[{tag}] data: {tag} {i}\n"))
                .collect();
            assert_eq!(ours.len(), 10);
            for (got, want) in ours.iter().zip(expected.iter()) {
                assert_eq!(*got, want);
            }
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_contained() {
        let (sink, rx) = channel_sink(256);
        let mut mux = Multiplexer::new(vec![
            Arc::new(ScriptedSource::unreachable("dead")),
            Arc::new(
                ScriptedSource::lines("live", 10).with_interval(Duration::from_millis(5)),
            ),
        ]);

        let report = mux.run(&sink).await.unwrap();
        drop(sink);

        assert!(!report.all_completed());
        assert_eq!(
            report.source("dead").unwrap().outcome,
            SourceOutcome::ConnectFailed
        );
        assert_eq!(
            report.source("live").unwrap().outcome,
            SourceOutcome::Completed { lines: 10 }
        );

        let lines = collect_lines(rx).await;
        let dead: Vec<&String> = lines.iter().filter(|l| l.starts_with("[dead]")).collect();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].contains("stream error:"));
        assert_eq!(
            lines.iter().filter(|l| l.starts_with("[live]")).count(),
            10
        );
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_delivered_lines() {
        let (sink, rx) = channel_sink(256);
        let mut events: Vec<SourceEvent> = (0..3)
            .map(|i| SourceEvent::Line(format!("data: x {i}")))
            .collect();
        events.push(SourceEvent::Failed("connection reset".to_string()));

        let mut mux = Multiplexer::new(vec![Arc::new(ScriptedSource::new("x", events))]);
        let report = mux.run(&sink).await.unwrap();
        drop(sink);

        assert_eq!(
            report.source("x").unwrap().outcome,
            SourceOutcome::ReadFailed { lines: 3 }
        );

        let lines = collect_lines(rx).await;
        assert_eq!(lines.len(), 4);
        assert!(lines[3].contains("stream error: connection reset"));
    }

    #[tokio::test]
    async fn test_barrier_waits_for_slowest() {
        let (sink, rx) = channel_sink(256);
        let mut mux = Multiplexer::new(vec![
            Arc::new(ScriptedSource::lines("fast", 2)),
            Arc::new(
                ScriptedSource::lines("slow", 5).with_interval(Duration::from_millis(20)),
            ),
        ]);

        let report = mux.run(&sink).await.unwrap();
        drop(sink);

        // run() returning is the barrier: the slow source's last line must
        // already be in the output.
        assert!(report.all_completed());
        let lines = collect_lines(rx).await;
        assert!(lines.contains(&"[slow] data: slow 4\n".to_string()));
    }

    #[tokio::test]
    async fn test_client_disconnect_stops_workers() {
        let (sink, mut rx) = channel_sink(1);
        let mut mux = Multiplexer::new(vec![
            Arc::new(
                ScriptedSource::lines("a", 100).with_interval(Duration::from_millis(2)),
            ),
            Arc::new(
                ScriptedSource::lines("b", 100).with_interval(Duration::from_millis(2)),
            ),
        ]);

        // Read three lines, then hang up.
        let reader = tokio::spawn(async move {
            for _ in 0..3 {
                rx.recv().await;
            }
            drop(rx);
        });

        let report = tokio::time::timeout(Duration::from_secs(5), mux.run(&sink))
            .await
            .expect("run must not outlive the disconnect by the full feed length")
            .unwrap();
        reader.await.unwrap();

        for source in &report.sources {
            assert!(
                matches!(source.outcome, SourceOutcome::SinkClosed { .. }),
                "worker {} should stop on sink close, got {:?}",
                source.tag,
                source.outcome
            );
        }
    }

    #[tokio::test]
    async fn test_timeout_aborts_stragglers() {
        let (sink, rx) = channel_sink(256);
        let options = MultiplexOptions::default().with_timeout(Duration::from_millis(60));
        let mut mux = Multiplexer::with_options(
            vec![
                Arc::new(ScriptedSource::lines("quick", 2)),
                Arc::new(
                    ScriptedSource::lines("endless", 10_000)
                        .with_interval(Duration::from_millis(15)),
                ),
            ],
            options,
        );

        let report = mux.run(&sink).await.unwrap();
        drop(sink);

        assert_eq!(
            report.source("quick").unwrap().outcome,
            SourceOutcome::Completed { lines: 2 }
        );
        assert_eq!(
            report.source("endless").unwrap().outcome,
            SourceOutcome::TimedOut
        );

        let lines = collect_lines(rx).await;
        let timeout_lines: Vec<&String> = lines
            .iter()
            .filter(|l| l.starts_with("[endless]") && l.contains("stream error: timed out"))
            .collect();
        assert_eq!(timeout_lines.len(), 1);
    }
}
