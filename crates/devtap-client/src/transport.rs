//! Message transport underneath a connection.
//!
//! A transport moves complete text messages. Sends are serialized behind
//! one gate and receives behind another, so a message is never split by
//! a concurrent writer and only one reader assembles inbound frames.

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::ClientConfig;
use crate::error::CdpError;

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Atomic cell holding a [`ConnectionState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(Self::encode(state)))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        match self.0.load(Ordering::Acquire) {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.0.store(Self::encode(state), Ordering::Release);
    }

    /// Move to `Closing` unless already closed.
    pub(crate) fn begin_closing(&self) {
        let _ = self.0.compare_exchange(
            Self::encode(ConnectionState::Open),
            Self::encode(ConnectionState::Closing),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn encode(state: ConnectionState) -> u8 {
        match state {
            ConnectionState::Connecting => 0,
            ConnectionState::Open => 1,
            ConnectionState::Closing => 2,
            ConnectionState::Closed => 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Ordered, message-oriented duplex channel to a DevTools endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Write one complete message. Concurrent senders are queued in the
    /// order they reach the send gate.
    async fn send(&self, message: String) -> Result<(), CdpError>;

    /// Read the next complete inbound message, joining fragments until the
    /// final one arrives.
    async fn receive(&self) -> Result<String, CdpError>;

    fn state(&self) -> ConnectionState;

    /// Start an orderly shutdown. The pending `receive` ends with
    /// [`CdpError::ConnectionClosed`] once the peer acknowledges.
    async fn close(&self) -> Result<(), CdpError>;
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

/// [`Transport`] over a tokio-tungstenite WebSocket.
pub struct WebSocketTransport<S = MaybeTlsStream<TcpStream>> {
    writer: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    reader: Mutex<SplitStream<WebSocketStream<S>>>,
    state: StateCell,
}

impl WebSocketTransport {
    /// Open a WebSocket to `url`, e.g. `ws://localhost:9222/devtools/page/ABC`.
    pub async fn connect(url: &str, config: &ClientConfig) -> Result<Self, CdpError> {
        tracing::info!(url, "connecting to DevTools WebSocket");

        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(config.max_message_size))
            .max_frame_size(Some(config.max_frame_size));

        let (stream, _) = tokio_tungstenite::connect_async_with_config(url, Some(ws_config), true)
            .await
            .map_err(|e| CdpError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(url, "DevTools WebSocket connection established");
        Ok(Self::from_stream(stream))
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an already-open WebSocket stream.
    pub fn from_stream(stream: WebSocketStream<S>) -> Self {
        let (writer, reader) = stream.split();
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            state: StateCell::new(ConnectionState::Open),
        }
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, message: String) -> Result<(), CdpError> {
        let mut writer = self.writer.lock().await;
        if self.state.get() != ConnectionState::Open {
            return Err(CdpError::ConnectionClosed);
        }
        writer.send(Message::Text(message.into())).await.map_err(|e| {
            self.state.set(ConnectionState::Closed);
            CdpError::Transport {
                detail: format!("failed to send WebSocket message: {e}"),
            }
        })
    }

    async fn receive(&self) -> Result<String, CdpError> {
        let mut reader = self.reader.lock().await;
        loop {
            let msg = match reader.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    self.state.set(ConnectionState::Closed);
                    return Err(CdpError::Transport {
                        detail: format!("WebSocket read error: {e}"),
                    });
                }
                None => {
                    self.state.set(ConnectionState::Closed);
                    return Err(CdpError::ConnectionClosed);
                }
            };

            match msg {
                Message::Text(text) => return Ok(text.to_string()),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(text),
                    Err(_) => {
                        tracing::warn!(len = bytes.len(), "skipping non-UTF-8 binary message");
                    }
                },
                Message::Close(frame) => {
                    tracing::info!(?frame, "WebSocket closed by remote");
                    self.state.set(ConnectionState::Closed);
                    return Err(CdpError::ConnectionClosed);
                }
                // Pings are answered by the WebSocket layer itself.
                _ => {}
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn close(&self) -> Result<(), CdpError> {
        self.state.begin_closing();
        let mut writer = self.writer.lock().await;
        writer.close().await.map_err(|e| CdpError::Transport {
            detail: format!("failed to close WebSocket: {e}"),
        })
    }
}
