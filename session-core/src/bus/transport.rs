//! Physical transport under the bus client
//!
//! A [`Transport`] opens one connection to the kernel and hands back a pair of
//! channels: serialized envelopes go out on `outbound`, frames and the final
//! close notification come back on `inbound`. The bus client never touches the
//! socket itself.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Query parameter carrying the authentication token.
pub const TOKEN_PARAM: &str = "token";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Events reported by the reader side of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame, expected to hold a JSON envelope
    Frame(String),
    /// The connection is gone; no further events follow
    Closed { reason: Option<String> },
}

/// An open connection, as seen by the bus client
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Kernel endpoint with the auth token already applied
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    pub fn new(base: &str, token: &str) -> Result<Self, TransportError> {
        let mut url = Url::parse(base)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{base}: {e}")))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::InvalidEndpoint(format!(
                    "unsupported scheme '{other}' in {base}"
                )))
            }
        }

        if !token.is_empty() {
            url.query_pairs_mut().append_pair(TOKEN_PARAM, token);
        }

        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// URL with the token masked, safe for logs.
    pub fn redacted(&self) -> String {
        if self.url.query().is_none() {
            return self.url.to_string();
        }

        let pairs: Vec<(String, String)> = self
            .url
            .query_pairs()
            .map(|(key, value)| {
                let value = if key == TOKEN_PARAM {
                    "***".to_string()
                } else {
                    value.into_owned()
                };
                (key.into_owned(), value)
            })
            .collect();

        let mut url = self.url.clone();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.redacted())
            .finish()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Opens connections to the kernel.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError>;
}

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError> {
        let (stream, _response) = connect_async(endpoint.url().as_str())
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        tracing::debug!(endpoint = %endpoint, "WebSocket handshake complete");

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let writer_events = inbound_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    let _ = writer_events.send(TransportEvent::Closed {
                        reason: Some(e.to_string()),
                    });
                    return;
                }
            }
            // Outbound sender dropped by the bus: close the socket
            let _ = sink.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            tracing::warn!("Dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let _ = inbound_tx.send(TransportEvent::Closed {
                            reason: frame.map(|f| f.reason.to_string()),
                        });
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = inbound_tx.send(TransportEvent::Closed {
                            reason: Some(e.to_string()),
                        });
                        return;
                    }
                };

                if inbound_tx.send(event).is_err() {
                    // Bus dropped this connection
                    return;
                }
            }
            let _ = inbound_tx.send(TransportEvent::Closed { reason: None });
        });

        Ok(Connection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
