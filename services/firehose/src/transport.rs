//! Websocket transport for the Jetstream subscribe endpoint.
//!
//! Connection failures at handshake time are fatal (`ConnectError`);
//! mid-stream faults and orderly closures are distinct signals the session
//! handles differently.

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::config::JetstreamConfig;
use crate::frame::RawFrame;

pub use tokio_tungstenite::tungstenite::Error as WsError;

/// Fatal connection-time errors. Retry policy lives in the driver, not here.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("handshake with {url} failed: {source}")]
    Handshake {
        url: String,
        #[source]
        source: WsError,
    },

    #[error("connection to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },
}

/// Mid-stream receive faults. Recoverable: the session logs and continues.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("receive failed: {0}")]
    Receive(#[from] WsError),
}

/// A connected inbound event stream.
///
/// `Ok(Some(frame))` is a payload frame, `Ok(None)` is an orderly close,
/// `Err` is a mid-stream fault.
#[async_trait]
pub trait EventSource: Send {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError>;
}

/// Subscribe URL with one `wantedCollections` parameter per collection.
pub fn subscribe_url(config: &JetstreamConfig) -> String {
    let mut url = config.endpoint.trim_end_matches('/').to_string();
    let mut separator = if url.contains('?') { '&' } else { '?' };

    for collection in &config.collections {
        url.push(separator);
        url.push_str("wantedCollections=");
        url.push_str(collection);
        separator = '&';
    }

    url
}

/// Websocket client for the Jetstream firehose.
pub struct JetstreamSource {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl JetstreamSource {
    /// Open the subscription. Handshake failure is fatal for the session.
    pub async fn connect(config: &JetstreamConfig) -> Result<Self, ConnectError> {
        let url = subscribe_url(config);

        let (stream, response) =
            tokio::time::timeout(config.connect_timeout(), connect_async(url.as_str()))
            .await
            .map_err(|_| ConnectError::Timeout {
                url: url.clone(),
                timeout_secs: config.connect_timeout_secs,
            })?
            .map_err(|e| ConnectError::Handshake {
                url: url.clone(),
                source: e,
            })?;

        info!(
            url = %url,
            status = %response.status(),
            "connected to jetstream"
        );

        Ok(Self { stream })
    }
}

#[async_trait]
impl EventSource for JetstreamSource {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(RawFrame::Text(text))),
                Some(Ok(Message::Binary(bytes))) => return Ok(Some(RawFrame::Binary(bytes))),
                // control frames are consumed here; pongs are queued by the
                // protocol layer
                Some(Ok(Message::Ping(_)))
                | Some(Ok(Message::Pong(_)))
                | Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!(close_frame = ?frame, "server closed the stream");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(TransportError::Receive(e)),
                None => return Ok(None),
            }
        }
    }
}
