//! Skywatch firehose - Jetstream ingest with windowed JSONL batching.
//!
//! This library connects to the Bluesky Jetstream firehose over a persistent
//! websocket, optionally retains only events authored by a watched set of
//! identities, buckets retained events by wall-clock window, and persists
//! each completed batch as one newline-delimited JSON object:
//!
//! ```text
//! Jetstream -> JetstreamSource -> StreamSession -> EventBuffer -> ObjectSink
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use skywatch_firehose::config::FirehoseConfig;
//! use skywatch_firehose::session::{SessionOptions, StreamSession};
//! use skywatch_firehose::sink::FsSink;
//! use skywatch_firehose::transport::JetstreamSource;
//! use skywatch_firehose::watch::{WatchMode, WatchSet};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = FirehoseConfig::load()?;
//!     let source = JetstreamSource::connect(&config.jetstream).await?;
//!     let sink = FsSink::new(&config.storage)?;
//!     let watch = WatchSet::from_identities(config.watch.identities.clone());
//!
//!     let options = SessionOptions::new(WatchMode::Filtered, 60, "bsky");
//!     let session = StreamSession::new(source, sink, watch, options);
//!     let summary = session.run(config.jetstream.run_duration()).await;
//!     println!("flushed {} batches", summary.stats.batches_flushed);
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod frame;
pub mod seed;
pub mod session;
pub mod sink;
pub mod transport;
pub mod watch;
pub mod window;

// Re-export main types
pub use buffer::{BatchKey, EventBuffer, FlushOutcome};
pub use config::{FirehoseConfig, StorageBackend};
pub use frame::{DecodeError, EventRecord, FirehoseEvent, RawFrame};
pub use session::{SessionOptions, SessionState, SessionStats, SessionSummary, StreamSession};
pub use sink::{FsSink, ObjectSink, S3Sink, SinkError, NDJSON_CONTENT_TYPE};
pub use transport::{ConnectError, EventSource, JetstreamSource, TransportError};
pub use watch::{did_partition, Partitioner, WatchMode, WatchSet};
pub use window::{WindowKey, WindowTracker};
