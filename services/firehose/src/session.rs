//! Stream session: connection lifecycle and the decode -> filter -> buffer
//! pipeline.
//!
//! One session owns one event buffer and drives one receive loop; frames are
//! processed strictly in arrival order and the receive-await is the only
//! suspension point. Every exit from the loop passes through `finish`, which
//! flushes all open windows exactly once.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::buffer::{BatchKey, EventBuffer, FlushOutcome};
use crate::frame::{self, EventRecord, FirehoseEvent, RawFrame};
use crate::sink::{ndjson_payload, object_path, ObjectSink, NDJSON_CONTENT_TYPE};
use crate::transport::EventSource;
use crate::watch::{did_partition, Partitioner, WatchMode, WatchSet};
use crate::window::{WindowKey, WindowTracker};

/// State of one stream session. `Closed` is terminal and reached exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Receiving,
    Closing,
    Closed,
}

/// Counters for one session run.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub frames_received: u64,
    pub decode_errors: u64,
    pub transport_faults: u64,
    pub events_filtered: u64,
    pub events_buffered: u64,
    pub batches_flushed: u64,
    pub batches_skipped: u64,
    pub batches_failed: u64,
    pub lines_flushed: u64,
}

/// Final report of a session run: counters plus the outcome of every flush.
#[derive(Debug)]
pub struct SessionSummary {
    pub stats: SessionStats,
    pub outcomes: Vec<(BatchKey, FlushOutcome)>,
}

impl SessionSummary {
    /// Number of flushes that failed. Non-zero means buffered data was not
    /// durably written.
    pub fn failed_flushes(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, FlushOutcome::Failed(_)))
            .count()
    }
}

/// Options fixed at session construction.
pub struct SessionOptions {
    pub mode: WatchMode,
    pub granularity_secs: u32,
    pub prefix: String,
    pub idle_timeout: Option<Duration>,
    pub partitioner: Partitioner,
}

impl SessionOptions {
    pub fn new(mode: WatchMode, granularity_secs: u32, prefix: impl Into<String>) -> Self {
        Self {
            mode,
            granularity_secs,
            prefix: prefix.into(),
            idle_timeout: None,
            partitioner: Arc::new(did_partition),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_partitioner(mut self, partitioner: Partitioner) -> Self {
        self.partitioner = partitioner;
        self
    }
}

/// One stream session over a connected event source.
pub struct StreamSession<S, K> {
    source: S,
    sink: K,
    watch: WatchSet,
    mode: WatchMode,
    partitioner: Partitioner,
    tracker: WindowTracker,
    prefix: String,
    idle_timeout: Option<Duration>,
    buffer: EventBuffer,
    current_window: Option<WindowKey>,
    state: SessionState,
    stats: SessionStats,
    outcomes: Vec<(BatchKey, FlushOutcome)>,
}

impl<S, K> StreamSession<S, K>
where
    S: EventSource,
    K: ObjectSink,
{
    /// Create a session over an already-connected source.
    pub fn new(source: S, sink: K, watch: WatchSet, options: SessionOptions) -> Self {
        Self {
            source,
            sink,
            watch,
            mode: options.mode,
            partitioner: options.partitioner,
            tracker: WindowTracker::new(options.granularity_secs),
            prefix: options.prefix,
            idle_timeout: options.idle_timeout,
            buffer: EventBuffer::new(),
            current_window: None,
            state: SessionState::Connecting,
            stats: SessionStats::default(),
            outcomes: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Run the receive loop until the duration budget elapses or the
    /// transport closes, then flush everything and return the summary.
    ///
    /// The budget is a soft deadline checked between messages; a session
    /// blocked on one slow receive overshoots by at most that one wait
    /// (bounded by the idle timeout when one is configured).
    pub async fn run(mut self, budget: Duration) -> SessionSummary {
        self.state = SessionState::Receiving;
        debug!(mode = ?self.mode, budget_secs = budget.as_secs(), "session receiving");
        let started = Instant::now();

        while self.state == SessionState::Receiving {
            if started.elapsed() >= budget {
                info!("run duration budget elapsed");
                break;
            }

            let next = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.source.next_frame()).await {
                    Ok(result) => result,
                    Err(_) => {
                        info!(
                            idle_secs = limit.as_secs(),
                            "no frame within idle timeout, closing"
                        );
                        break;
                    }
                },
                None => self.source.next_frame().await,
            };

            match next {
                Ok(Some(frame)) => {
                    let now = Utc::now();
                    self.process_frame(&frame, now).await;
                }
                Ok(None) => {
                    info!("transport closed the stream");
                    break;
                }
                // one bad frame must never terminate the session
                Err(e) => {
                    warn!(error = %e, "transport fault, continuing");
                    self.stats.transport_faults += 1;
                    metrics::counter!("firehose.transport.faults").increment(1);
                }
            }
        }

        self.finish().await;
        self.into_summary()
    }

    /// Run one frame through decode -> validate -> filter -> window -> buffer.
    pub async fn process_frame(&mut self, frame: &RawFrame, now: DateTime<Utc>) {
        self.stats.frames_received += 1;
        metrics::counter!("firehose.frames.received").increment(1);

        let value = match frame::decode(frame) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "skipping undecodable frame");
                self.stats.decode_errors += 1;
                metrics::counter!("firehose.frames.invalid").increment(1);
                return;
            }
        };

        let event = match FirehoseEvent::from_value(&value) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "skipping event with missing fields");
                self.stats.decode_errors += 1;
                metrics::counter!("firehose.frames.invalid").increment(1);
                return;
            }
        };

        let (partition, line) = match self.mode {
            WatchMode::Mirror => match serde_json::to_string(&value) {
                Ok(line) => (None, line),
                Err(e) => {
                    debug!(error = %e, "skipping unserializable event");
                    self.stats.decode_errors += 1;
                    return;
                }
            },
            WatchMode::Filtered => {
                if !self.watch.matches(&event) {
                    trace!(did = %event.did, "event not in watch-set");
                    self.stats.events_filtered += 1;
                    metrics::counter!("firehose.events.filtered").increment(1);
                    return;
                }

                let record = match EventRecord::project(&event, &value) {
                    Ok(record) => record,
                    Err(e) => {
                        debug!(did = %event.did, error = %e, "skipping event with incomplete commit");
                        self.stats.decode_errors += 1;
                        metrics::counter!("firehose.frames.invalid").increment(1);
                        return;
                    }
                };

                match serde_json::to_string(&record) {
                    Ok(line) => (Some((self.partitioner)(&event.did)), line),
                    Err(e) => {
                        debug!(error = %e, "skipping unserializable event");
                        self.stats.decode_errors += 1;
                        return;
                    }
                }
            }
        };

        let window = self.tracker.key_for(now);
        if let Some(previous) = self.current_window {
            if self.tracker.rolled_over(&previous, &window) {
                info!(window = %window, "window rolled over");
                self.flush_window(previous).await;
            }
        }
        self.current_window = Some(window);

        self.buffer.append(BatchKey { partition, window }, line);
        self.stats.events_buffered += 1;
        metrics::counter!("firehose.events.buffered").increment(1);
    }

    /// Flush one key now. A key with zero buffered events never reaches the
    /// sink and returns `Skipped`.
    pub async fn flush(&mut self, key: &BatchKey) -> FlushOutcome {
        let lines = self.buffer.take(key);
        self.flush_entry(key.clone(), lines).await
    }

    /// Flush every open window and transition to `Closed`.
    ///
    /// Idempotent: a second call (however shutdown signals race) is a no-op,
    /// so the terminal flush happens exactly once per session instance.
    pub async fn finish(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        debug!(open_keys = self.buffer.open_keys(), "session closing");

        for (key, lines) in self.buffer.drain_open() {
            let outcome = self.flush_entry(key.clone(), lines).await;
            self.outcomes.push((key, outcome));
        }

        self.state = SessionState::Closed;
        info!(
            frames = self.stats.frames_received,
            events = self.stats.events_buffered,
            decode_errors = self.stats.decode_errors,
            batches_flushed = self.stats.batches_flushed,
            batches_failed = self.stats.batches_failed,
            "session closed"
        );
    }

    /// Consume the session into its final summary.
    pub fn into_summary(self) -> SessionSummary {
        SessionSummary {
            stats: self.stats,
            outcomes: self.outcomes,
        }
    }

    async fn flush_window(&mut self, window: WindowKey) {
        for (key, lines) in self.buffer.take_window(&window) {
            let outcome = self.flush_entry(key.clone(), lines).await;
            self.outcomes.push((key, outcome));
        }
    }

    async fn flush_entry(&mut self, key: BatchKey, lines: Vec<String>) -> FlushOutcome {
        if lines.is_empty() {
            self.stats.batches_skipped += 1;
            metrics::counter!("firehose.batches.skipped").increment(1);
            return FlushOutcome::Skipped;
        }

        let path = object_path(&self.prefix, &key);
        let count = lines.len();
        let payload = ndjson_payload(&lines);
        let size_bytes = payload.len();

        match self.sink.put(&path, payload, NDJSON_CONTENT_TYPE).await {
            Ok(()) => {
                self.stats.batches_flushed += 1;
                self.stats.lines_flushed += count as u64;
                metrics::counter!("firehose.batches.flushed").increment(1);
                metrics::counter!("firehose.bytes.uploaded").increment(size_bytes as u64);
                info!(path = %path, events = count, "flushed batch");
                FlushOutcome::Flushed(count)
            }
            Err(e) => {
                warn!(path = %path, error = %e, "batch flush failed, restoring buffer");
                self.stats.batches_failed += 1;
                metrics::counter!("firehose.batches.failed").increment(1);
                self.buffer.restore(key, lines);
                FlushOutcome::Failed(e)
            }
        }
    }
}
