use std::collections::HashMap;

use crate::sink::SinkError;
use crate::window::WindowKey;

/// Composite batch key covering both keying modes: `partition` is `None` in
/// windowed (mirror) mode and the identity's partition segment in
/// per-identity mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    pub partition: Option<String>,
    pub window: WindowKey,
}

/// Result of flushing one batch key.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Batch was written; carries the number of lines
    Flushed(usize),
    /// Batch had zero lines and was not written
    Skipped,
    /// Write failed; the lines were restored to the buffer
    Failed(SinkError),
}

/// Per-key ordered accumulation of serialized event lines.
///
/// Owned exclusively by one stream session. `take` moves a batch out for
/// writing, so a fresh accumulation under a newer key cannot race the
/// in-flight write; `restore` puts a batch back when a write fails so it is
/// never silently discarded.
#[derive(Debug, Default)]
pub struct EventBuffer {
    entries: HashMap<BatchKey, Vec<String>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one serialized event line under a key. O(1) amortized.
    pub fn append(&mut self, key: BatchKey, line: String) {
        self.entries.entry(key).or_default().push(line);
    }

    /// Move the accumulated lines for a key out of the buffer.
    /// Returns an empty vec when the key holds nothing.
    pub fn take(&mut self, key: &BatchKey) -> Vec<String> {
        self.entries.remove(key).unwrap_or_default()
    }

    /// Move out every entry belonging to one window, sorted by key.
    pub fn take_window(&mut self, window: &WindowKey) -> Vec<(BatchKey, Vec<String>)> {
        let keys: Vec<BatchKey> = self
            .entries
            .keys()
            .filter(|k| k.window == *window)
            .cloned()
            .collect();

        let mut taken: Vec<(BatchKey, Vec<String>)> = keys
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|lines| (k, lines)))
            .collect();
        taken.sort_by(|a, b| a.0.cmp(&b.0));
        taken
    }

    /// Put lines back under a key after a failed write, ahead of anything
    /// accumulated there since.
    pub fn restore(&mut self, key: BatchKey, mut lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        let entry = self.entries.entry(key).or_default();
        lines.append(entry);
        *entry = lines;
    }

    /// Move out every open entry, sorted by key. Used at shutdown: nothing
    /// that has ever been appended and not yet flushed may be dropped.
    pub fn drain_open(&mut self) -> Vec<(BatchKey, Vec<String>)> {
        let mut taken: Vec<(BatchKey, Vec<String>)> = self.entries.drain().collect();
        taken.sort_by(|a, b| a.0.cmp(&b.0));
        taken
    }

    /// Number of open keys.
    pub fn open_keys(&self) -> usize {
        self.entries.len()
    }

    /// Total buffered lines across all open keys.
    pub fn buffered_lines(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowTracker;
    use chrono::{TimeZone, Utc};

    fn window(minute: u32) -> WindowKey {
        WindowTracker::new(60).key_for(Utc.with_ymd_and_hms(2025, 11, 3, 21, minute, 0).unwrap())
    }

    fn key(partition: Option<&str>, minute: u32) -> BatchKey {
        BatchKey {
            partition: partition.map(String::from),
            window: window(minute),
        }
    }

    #[test]
    fn test_append_and_take_preserves_order() {
        let mut buffer = EventBuffer::new();
        let k = key(None, 0);
        buffer.append(k.clone(), "a".to_string());
        buffer.append(k.clone(), "b".to_string());
        assert_eq!(buffer.take(&k), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(buffer.open_keys(), 0);
    }

    #[test]
    fn test_take_unknown_key_is_empty() {
        let mut buffer = EventBuffer::new();
        assert!(buffer.take(&key(None, 0)).is_empty());
    }

    #[test]
    fn test_take_window_only_that_window() {
        let mut buffer = EventBuffer::new();
        buffer.append(key(Some("a"), 0), "1".to_string());
        buffer.append(key(Some("b"), 0), "2".to_string());
        buffer.append(key(Some("a"), 1), "3".to_string());

        let taken = buffer.take_window(&window(0));
        assert_eq!(taken.len(), 2);
        assert_eq!(buffer.open_keys(), 1);
        assert_eq!(buffer.take(&key(Some("a"), 1)), vec!["3".to_string()]);
    }

    #[test]
    fn test_restore_precedes_newer_lines() {
        let mut buffer = EventBuffer::new();
        let k = key(None, 0);
        buffer.append(k.clone(), "new".to_string());
        buffer.restore(k.clone(), vec!["old".to_string()]);
        assert_eq!(buffer.take(&k), vec!["old".to_string(), "new".to_string()]);
    }

    #[test]
    fn test_restore_empty_is_noop() {
        let mut buffer = EventBuffer::new();
        buffer.restore(key(None, 0), Vec::new());
        assert_eq!(buffer.open_keys(), 0);
    }

    #[test]
    fn test_drain_open_returns_everything_sorted() {
        let mut buffer = EventBuffer::new();
        buffer.append(key(Some("b"), 1), "3".to_string());
        buffer.append(key(Some("a"), 0), "1".to_string());
        buffer.append(key(Some("b"), 0), "2".to_string());

        let drained = buffer.drain_open();
        assert_eq!(drained.len(), 3);
        assert!(drained.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(buffer.open_keys(), 0);
        assert_eq!(buffer.buffered_lines(), 0);
    }
}
