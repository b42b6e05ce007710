//! Object sinks for completed batches.
//!
//! A batch is written as one newline-delimited JSON object under a
//! deterministic path: `<prefix>/[<partition>/]<window>.jsonl`. The S3 sink
//! is the production backend; the filesystem sink mirrors it for local runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use crate::buffer::BatchKey;
use crate::config::StorageConfig;

/// Content type for newline-delimited JSON payloads.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Errors surfaced by a batch write.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("write of {key} failed: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Durable storage of a completed batch under a deterministic path key.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    async fn put(&self, key: &str, payload: Bytes, content_type: &str) -> Result<(), SinkError>;
}

#[async_trait]
impl<T: ObjectSink + ?Sized> ObjectSink for std::sync::Arc<T> {
    async fn put(&self, key: &str, payload: Bytes, content_type: &str) -> Result<(), SinkError> {
        (**self).put(key, payload, content_type).await
    }
}

/// Object key for one batch: `<prefix>/[<partition>/]<window>.jsonl`.
pub fn object_path(prefix: &str, key: &BatchKey) -> String {
    let mut path = String::new();
    let prefix = prefix.trim_matches('/');
    if !prefix.is_empty() {
        path.push_str(prefix);
        path.push('/');
    }
    if let Some(partition) = &key.partition {
        path.push_str(&sanitize_path_component(partition));
        path.push('/');
    }
    path.push_str(&key.window.to_string());
    path.push_str(".jsonl");
    path
}

/// Newline-joined lines with a trailing newline.
pub fn ndjson_payload(lines: &[String]) -> Bytes {
    let mut payload = lines.join("\n");
    payload.push('\n');
    Bytes::from(payload)
}

/// Sanitize a path component to prevent path traversal
pub fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// S3 batch sink.
pub struct S3Sink {
    client: S3Client,
    bucket: String,
}

impl S3Sink {
    /// Create a new S3 sink from the storage configuration.
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 sink initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectSink for S3Sink {
    async fn put(&self, key: &str, payload: Bytes, content_type: &str) -> Result<(), SinkError> {
        let size_bytes = payload.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(payload))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| SinkError::Upload {
                key: key.to_string(),
                source: Box::new(e),
            })?;

        debug!(key = %key, size_bytes, "batch uploaded");
        Ok(())
    }
}

/// Local-directory batch sink for development runs.
pub struct FsSink {
    root: PathBuf,
}

impl FsSink {
    /// Create a new filesystem sink rooted at the storage configuration's
    /// local directory.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let root = PathBuf::from(&config.local_dir);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create output directory {}", root.display()))?;

        info!(root = %root.display(), "filesystem sink initialized");
        Ok(Self { root })
    }
}

#[async_trait]
impl ObjectSink for FsSink {
    async fn put(&self, key: &str, payload: Bytes, _content_type: &str) -> Result<(), SinkError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::Io {
                    key: key.to_string(),
                    source: e,
                })?;
        }

        tokio::fs::write(&path, &payload)
            .await
            .map_err(|e| SinkError::Io {
                key: key.to_string(),
                source: e,
            })?;

        debug!(path = %path.display(), size_bytes = payload.len(), "batch written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowTracker;
    use chrono::{TimeZone, Utc};

    fn window_key() -> crate::window::WindowKey {
        WindowTracker::new(60).key_for(Utc.with_ymd_and_hms(2025, 11, 3, 21, 34, 0).unwrap())
    }

    #[test]
    fn test_object_path_windowed() {
        let key = BatchKey {
            partition: None,
            window: window_key(),
        };
        assert_eq!(object_path("bsky", &key), "bsky/20251103_2134.jsonl");
    }

    #[test]
    fn test_object_path_per_identity() {
        let key = BatchKey {
            partition: Some("btexzxhepcphnjfh453g2s4y".to_string()),
            window: window_key(),
        };
        assert_eq!(
            object_path("bsky", &key),
            "bsky/btexzxhepcphnjfh453g2s4y/20251103_2134.jsonl"
        );
    }

    #[test]
    fn test_object_path_empty_prefix() {
        let key = BatchKey {
            partition: None,
            window: window_key(),
        };
        assert_eq!(object_path("", &key), "20251103_2134.jsonl");
        assert_eq!(object_path("/", &key), "20251103_2134.jsonl");
    }

    #[test]
    fn test_object_path_sanitizes_partition() {
        let key = BatchKey {
            partition: Some("../escape me".to_string()),
            window: window_key(),
        };
        assert_eq!(object_path("bsky", &key), "bsky/___escape_me/20251103_2134.jsonl");
    }

    #[test]
    fn test_ndjson_payload() {
        let lines = vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()];
        let payload = ndjson_payload(&lines);
        assert_eq!(&payload[..], b"{\"a\":1}\n{\"b\":2}\n");
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("abc-123_x"), "abc-123_x");
        assert_eq!(sanitize_path_component("a/b:c d"), "a_b_c_d");
        assert_eq!(sanitize_path_component("dev..ice"), "dev__ice");
    }

    #[tokio::test]
    async fn test_fs_sink_writes_payload() {
        let dir = std::env::temp_dir().join("skywatch-fs-sink-test");
        let _ = std::fs::remove_dir_all(&dir);
        let config = StorageConfig {
            backend: crate::config::StorageBackend::Filesystem,
            bucket: String::new(),
            prefix: "bsky".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            local_dir: dir.to_string_lossy().into_owned(),
        };

        let sink = FsSink::new(&config).unwrap();
        sink.put(
            "bsky/20251103_2134.jsonl",
            Bytes::from_static(b"{\"a\":1}\n"),
            NDJSON_CONTENT_TYPE,
        )
        .await
        .unwrap();

        let written = std::fs::read(dir.join("bsky/20251103_2134.jsonl")).unwrap();
        assert_eq!(written, b"{\"a\":1}\n");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
