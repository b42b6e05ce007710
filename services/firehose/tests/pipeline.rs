//! End-to-end pipeline tests: scripted event source, recording sink, real
//! session in between.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use skywatch_firehose::session::{SessionOptions, StreamSession};
use skywatch_firehose::sink::{ObjectSink, SinkError};
use skywatch_firehose::transport::{EventSource, TransportError};
use skywatch_firehose::watch::{WatchMode, WatchSet};
use skywatch_firehose::RawFrame;

struct ScriptedSource {
    frames: VecDeque<Result<Option<RawFrame>, TransportError>>,
}

impl ScriptedSource {
    fn new(frames: Vec<Result<Option<RawFrame>, TransportError>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError> {
        self.frames.pop_front().unwrap_or(Ok(None))
    }
}

#[derive(Default)]
struct RecordingSink {
    puts: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    fn puts(&self) -> Vec<(String, String)> {
        self.puts.lock().unwrap().clone()
    }

    /// All payload lines across every put, in put order.
    fn all_lines(&self) -> Vec<String> {
        self.puts()
            .iter()
            .flat_map(|(_, payload)| payload.lines().map(String::from).collect::<Vec<_>>())
            .collect()
    }
}

#[async_trait]
impl ObjectSink for RecordingSink {
    async fn put(&self, key: &str, payload: Bytes, _content_type: &str) -> Result<(), SinkError> {
        let text = String::from_utf8(payload.to_vec()).map_err(|e| SinkError::Io {
            key: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        self.puts.lock().unwrap().push((key.to_string(), text));
        Ok(())
    }
}

fn post_frame(did: &str, time_us: i64) -> RawFrame {
    RawFrame::Text(
        json!({
            "did": did,
            "time_us": time_us,
            "commit": {
                "collection": "app.bsky.feed.post",
                "cid": format!("bafyrei{time_us}"),
                "rkey": format!("rkey{time_us}"),
                "record": { "text": format!("post {time_us}") }
            }
        })
        .to_string(),
    )
}

fn at(minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 3, 21, minute, second).unwrap()
}

fn mirror_session(
    sink: Arc<RecordingSink>,
) -> StreamSession<ScriptedSource, Arc<RecordingSink>> {
    StreamSession::new(
        ScriptedSource::empty(),
        sink,
        WatchSet::default(),
        SessionOptions::new(WatchMode::Mirror, 60, "bsky"),
    )
}

/// Property: no loss across rollover. N events spanning two windows come out
/// as exactly N lines across both flushed payloads, each exactly once, in
/// arrival order within its window.
#[tokio::test]
async fn no_loss_across_rollover() {
    let sink = Arc::new(RecordingSink::default());
    let mut session = mirror_session(sink.clone());

    let mut expected = Vec::new();
    for i in 0..6i64 {
        let frame = post_frame("did:plc:author", i);
        // events 0..3 land in minute 0, events 3..6 in minute 1
        let now = if i < 3 { at(0, 10 + i as u32) } else { at(1, i as u32) };
        session.process_frame(&frame, now).await;
        if let RawFrame::Text(text) = &frame {
            let value: serde_json::Value = serde_json::from_str(text).unwrap();
            expected.push(serde_json::to_string(&value).unwrap());
        }
    }
    session.finish().await;

    let puts = sink.puts();
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[0].0, "bsky/20251103_2100.jsonl");
    assert_eq!(puts[1].0, "bsky/20251103_2101.jsonl");
    assert_eq!(sink.all_lines(), expected);

    let summary = session.into_summary();
    assert_eq!(summary.stats.lines_flushed, 6);
    assert_eq!(summary.failed_flushes(), 0);
}

/// Property: filter correctness. With filtering enabled only watched events
/// are buffered; with mirroring every decoded event is.
#[tokio::test]
async fn filter_retains_exactly_the_watch_set() {
    let sink = Arc::new(RecordingSink::default());
    let watch = WatchSet::from_identities(["did:plc:aaa", "did:plc:ccc"]);
    let mut session = StreamSession::new(
        ScriptedSource::empty(),
        sink.clone(),
        watch,
        SessionOptions::new(WatchMode::Filtered, 60, "bsky"),
    );

    let authors = ["did:plc:aaa", "did:plc:bbb", "did:plc:ccc", "did:plc:aaa"];
    for (i, did) in authors.iter().enumerate() {
        session.process_frame(&post_frame(did, i as i64), at(0, i as u32)).await;
    }
    session.finish().await;

    let lines = sink.all_lines();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| !l.contains("did:plc:bbb")));

    let summary = session.into_summary();
    assert_eq!(summary.stats.events_filtered, 1);
    assert_eq!(summary.stats.events_buffered, 3);
}

#[tokio::test]
async fn mirror_mode_retains_everything() {
    let sink = Arc::new(RecordingSink::default());
    let mut session = mirror_session(sink.clone());

    for (i, did) in ["did:plc:aaa", "did:plc:bbb", "did:plc:ccc"].iter().enumerate() {
        session.process_frame(&post_frame(did, i as i64), at(0, i as u32)).await;
    }
    session.finish().await;

    assert_eq!(sink.all_lines().len(), 3);
}

/// Property: decode resilience. A run of 100 frames where every 10th is
/// malformed yields exactly 90 buffered events and never terminates the loop.
#[tokio::test]
async fn malformed_frames_are_dropped_without_terminating() {
    let sink = Arc::new(RecordingSink::default());
    let mut frames: Vec<Result<Option<RawFrame>, TransportError>> = Vec::new();
    for i in 0..100i64 {
        if i % 10 == 0 {
            frames.push(Ok(Some(RawFrame::Text(format!("garbage frame {i}")))));
        } else {
            frames.push(Ok(Some(post_frame("did:plc:author", i))));
        }
    }
    frames.push(Ok(None));

    let session = StreamSession::new(
        ScriptedSource::new(frames),
        sink.clone(),
        WatchSet::default(),
        SessionOptions::new(WatchMode::Mirror, 60, "bsky"),
    );
    let summary = session.run(Duration::from_secs(300)).await;

    assert_eq!(summary.stats.frames_received, 100);
    assert_eq!(summary.stats.decode_errors, 10);
    assert_eq!(summary.stats.events_buffered, 90);
    assert_eq!(sink.all_lines().len(), 90);
}

/// The two-window scenario: one watched author posting in two adjacent
/// windows, one unwatched author in between.
#[tokio::test]
async fn two_window_scenario() {
    let sink = Arc::new(RecordingSink::default());
    let watch = WatchSet::from_identities(["did:a"]);
    let mut session = StreamSession::new(
        ScriptedSource::empty(),
        sink.clone(),
        watch,
        SessionOptions::new(WatchMode::Filtered, 60, "bsky"),
    );

    session.process_frame(&post_frame("did:a", 1), at(0, 0)).await;
    session.process_frame(&post_frame("did:b", 2), at(0, 30)).await;
    session.process_frame(&post_frame("did:a", 3), at(1, 5)).await;
    session.finish().await;

    let puts = sink.puts();
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[0].1.lines().count(), 1);
    assert_eq!(puts[1].1.lines().count(), 1);
    assert!(puts[0].0.contains("20251103_2100"));
    assert!(puts[1].0.contains("20251103_2101"));
    assert!(puts.iter().all(|(_, payload)| !payload.contains("did:b")));
}

/// Orderly close and budget-elapsed funnel into the same single shutdown
/// path; the terminal flush happens exactly once.
#[tokio::test]
async fn orderly_close_flushes_exactly_once() {
    let sink = Arc::new(RecordingSink::default());
    let frames = vec![Ok(Some(post_frame("did:plc:author", 1))), Ok(None)];
    let session = StreamSession::new(
        ScriptedSource::new(frames),
        sink.clone(),
        WatchSet::default(),
        SessionOptions::new(WatchMode::Mirror, 60, "bsky"),
    );

    let summary = session.run(Duration::from_secs(300)).await;
    assert_eq!(sink.puts().len(), 1);
    assert_eq!(summary.stats.batches_flushed, 1);
}
