use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::frame::FirehoseEvent;

/// Whether the session retains everything or only watched identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Keep every decoded event
    #[default]
    Mirror,
    /// Keep only events authored by the watch-set
    Filtered,
}

/// Fixed set of watched identities for one run.
///
/// Seeded once before the session starts; read-only during the receive loop.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    identities: HashSet<String>,
}

impl WatchSet {
    /// Build a watch-set from any iterator of identity strings.
    /// Duplicates collapse; order is irrelevant.
    pub fn from_identities<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identities: identities.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the event's author is watched.
    pub fn matches(&self, event: &FirehoseEvent) -> bool {
        self.identities.contains(&event.did)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.identities.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Maps an identity to the storage-path partition segment for its batches.
///
/// Contract: total (never panics), and returns a non-empty segment for a
/// non-empty identity. The sink additionally sanitizes the segment before it
/// becomes part of an object key, so unexpected characters degrade to
/// underscores rather than corrupting the path.
pub type Partitioner = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Default partitioner: the method-specific id of a `did:method:id`
/// identifier (e.g. `did:plc:abc123` -> `abc123`). Identities that do not
/// follow that shape fall back to the whole identity string.
pub fn did_partition(identity: &str) -> String {
    let mut parts = identity.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("did"), Some(method), Some(id)) if !method.is_empty() && !id.is_empty() => {
            id.to_string()
        }
        _ => identity.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(did: &str) -> FirehoseEvent {
        FirehoseEvent {
            did: did.to_string(),
            time_us: 1,
        }
    }

    #[test]
    fn test_matches() {
        let watch = WatchSet::from_identities(["did:plc:a", "did:plc:b"]);
        assert!(watch.matches(&event("did:plc:a")));
        assert!(!watch.matches(&event("did:plc:c")));
    }

    #[test]
    fn test_duplicates_collapse() {
        let watch = WatchSet::from_identities(["did:plc:a", "did:plc:a", "did:plc:b"]);
        assert_eq!(watch.len(), 2);
    }

    #[test]
    fn test_empty() {
        let watch = WatchSet::default();
        assert!(watch.is_empty());
        assert!(!watch.matches(&event("did:plc:a")));
    }

    #[test]
    fn test_did_partition_well_formed() {
        assert_eq!(
            did_partition("did:plc:btexzxhepcphnjfh453g2s4y"),
            "btexzxhepcphnjfh453g2s4y"
        );
        assert_eq!(did_partition("did:web:example.com"), "example.com");
    }

    #[test]
    fn test_did_partition_fallback() {
        assert_eq!(did_partition("alice"), "alice");
        assert_eq!(did_partition("did:"), "did:");
        assert_eq!(did_partition("did:plc:"), "did:plc:");
        assert_eq!(did_partition(""), "");
    }

    #[test]
    fn test_did_partition_keeps_extra_segments() {
        assert_eq!(did_partition("did:web:example.com:alice"), "example.com:alice");
    }
}
