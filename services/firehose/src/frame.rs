//! Frame decoding for Jetstream messages.
//!
//! A raw websocket frame is parsed into a single JSON value; deep validation
//! of required fields is deferred to the consumer, because the mirror mode
//! only needs top-level fields while the filtered mode also needs the
//! nested commit payload.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while decoding a frame into an event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("event is missing required field: {0}")]
    MissingFields(&'static str),
}

/// An opaque payload received from the transport.
#[derive(Debug, Clone)]
pub enum RawFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Decode a raw frame into a JSON value.
///
/// Binary frames are transcoded with a lossy UTF-8 decode first; malformed
/// byte sequences are replaced, never fatal. A parse failure yields
/// `DecodeError::InvalidJson` and the caller skips the frame.
pub fn decode(frame: &RawFrame) -> Result<Value, DecodeError> {
    let text = match frame {
        RawFrame::Text(s) => std::borrow::Cow::Borrowed(s.as_str()),
        RawFrame::Binary(b) => String::from_utf8_lossy(b),
    };

    serde_json::from_str(text.as_ref()).map_err(|e| DecodeError::InvalidJson(e.to_string()))
}

/// Top-level fields every mode needs from a decoded event.
#[derive(Debug, Clone)]
pub struct FirehoseEvent {
    /// Identity of the event author
    pub did: String,
    /// Producer-side event time in microseconds
    pub time_us: i64,
}

impl FirehoseEvent {
    /// Extract the required top-level fields from a decoded value.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let did = value
            .get("did")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingFields("did"))?;
        let time_us = value
            .get("time_us")
            .and_then(Value::as_i64)
            .ok_or(DecodeError::MissingFields("time_us"))?;

        Ok(Self {
            did: did.to_string(),
            time_us,
        })
    }
}

/// Compact per-event record buffered in filtered mode.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub cid: String,
    pub did: String,
    pub rkey: String,
    pub created_at: i64,
    pub record: Value,
    pub text: Option<String>,
}

impl EventRecord {
    /// Project the commit payload of a decoded event.
    ///
    /// Requires the commit shape (`cid`, `rkey`, `record`); the record body's
    /// free text is optional.
    pub fn project(event: &FirehoseEvent, value: &Value) -> Result<Self, DecodeError> {
        let commit = value
            .get("commit")
            .filter(|c| !c.is_null())
            .ok_or(DecodeError::MissingFields("commit"))?;
        let cid = commit
            .get("cid")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingFields("commit.cid"))?;
        let rkey = commit
            .get("rkey")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingFields("commit.rkey"))?;
        let record = commit
            .get("record")
            .cloned()
            .ok_or(DecodeError::MissingFields("commit.record"))?;
        let text = record
            .get("text")
            .and_then(Value::as_str)
            .map(String::from);

        Ok(Self {
            cid: cid.to_string(),
            did: event.did.clone(),
            rkey: rkey.to_string(),
            created_at: event.time_us,
            record,
            text,
        })
    }
}
