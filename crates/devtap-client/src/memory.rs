//! In-process transport for tests and embedding.
//!
//! [`pair`] returns a [`MemoryTransport`] for the client side and a
//! [`MemoryPeer`] that plays the browser: it pushes inbound fragments and
//! reads whatever the client sent.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, Notify};

use crate::error::CdpError;
use crate::transport::{ConnectionState, StateCell, Transport};

/// Default cap on an assembled inbound message.
const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 << 20;

#[derive(Debug)]
enum PeerFrame {
    Fragment { payload: String, fin: bool },
    Close,
}

/// Client end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryTransport {
    inbound: Mutex<mpsc::UnboundedReceiver<PeerFrame>>,
    /// Wakes the reader when the client closes its end.
    closed: Notify,
    outbound: mpsc::UnboundedSender<String>,
    state: StateCell,
    max_message_size: usize,
}

/// Browser end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<PeerFrame>,
    outbound: Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Create a connected transport/peer pair.
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    pair_with_limit(DEFAULT_MAX_MESSAGE_SIZE)
}

/// Like [`pair`], with a custom cap on assembled inbound messages.
pub fn pair_with_limit(max_message_size: usize) -> (MemoryTransport, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let transport = MemoryTransport {
        inbound: Mutex::new(in_rx),
        closed: Notify::new(),
        outbound: out_tx,
        state: StateCell::new(ConnectionState::Open),
        max_message_size,
    };
    let peer = MemoryPeer {
        inbound: in_tx,
        outbound: Mutex::new(out_rx),
    };
    (transport, peer)
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: String) -> Result<(), CdpError> {
        if self.state.get() != ConnectionState::Open {
            return Err(CdpError::ConnectionClosed);
        }
        self.outbound.send(message).map_err(|_| {
            self.state.set(ConnectionState::Closed);
            CdpError::Transport {
                detail: "peer is gone".into(),
            }
        })
    }

    async fn receive(&self) -> Result<String, CdpError> {
        let mut inbound = self.inbound.lock().await;
        let mut message = String::new();
        loop {
            let frame = tokio::select! {
                frame = inbound.recv() => frame,
                () = self.closed.notified() => Some(PeerFrame::Close),
            };
            match frame {
                Some(PeerFrame::Fragment { payload, fin }) => {
                    message.push_str(&payload);
                    if message.len() > self.max_message_size {
                        self.state.set(ConnectionState::Closed);
                        return Err(CdpError::Transport {
                            detail: format!(
                                "inbound message exceeds {} bytes",
                                self.max_message_size
                            ),
                        });
                    }
                    if fin {
                        return Ok(message);
                    }
                }
                Some(PeerFrame::Close) | None => {
                    self.state.set(ConnectionState::Closed);
                    return Err(CdpError::ConnectionClosed);
                }
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn close(&self) -> Result<(), CdpError> {
        self.state.begin_closing();
        // `notify_one` keeps a permit if no receive is in progress yet.
        self.closed.notify_one();
        Ok(())
    }
}

impl MemoryPeer {
    /// Deliver one complete message.
    pub fn push(&self, text: impl Into<String>) {
        self.push_fragment(text, true);
    }

    /// Deliver a JSON value as one complete message.
    pub fn push_json(&self, value: &Value) {
        self.push(value.to_string());
    }

    /// Deliver one fragment; `fin` marks the last fragment of a message.
    pub fn push_fragment(&self, payload: impl Into<String>, fin: bool) {
        let _ = self.inbound.send(PeerFrame::Fragment {
            payload: payload.into(),
            fin,
        });
    }

    /// Close the connection from the browser side.
    pub fn close(&self) {
        let _ = self.inbound.send(PeerFrame::Close);
    }

    /// Next message the client sent, parsed as JSON. `None` once the
    /// client end is dropped.
    pub async fn next_sent(&self) -> Option<Value> {
        let text = self.outbound.lock().await.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// A message the client already sent, without waiting.
    pub async fn try_next_sent(&self) -> Option<Value> {
        let text = self.outbound.lock().await.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fragments_are_joined_until_final() {
        let (transport, peer) = pair();
        peer.push_fragment(r#"{"id":1,"#, false);
        peer.push_fragment(r#""result":"#, false);
        peer.push_fragment(r#"{}}"#, true);
        peer.push(r#"{"id":2}"#);

        assert_eq!(transport.receive().await.unwrap(), r#"{"id":1,"result":{}}"#);
        assert_eq!(transport.receive().await.unwrap(), r#"{"id":2}"#);
    }

    #[tokio::test]
    async fn oversized_message_is_a_transport_failure() {
        let (transport, peer) = pair_with_limit(8);
        peer.push_fragment("12345", false);
        peer.push_fragment("67890", true);
        assert!(matches!(
            transport.receive().await,
            Err(CdpError::Transport { .. })
        ));
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn sends_reach_the_peer_in_order() {
        let (transport, peer) = pair();
        transport.send(json!({"id": 1}).to_string()).await.unwrap();
        transport.send(json!({"id": 2}).to_string()).await.unwrap();
        assert_eq!(peer.next_sent().await.unwrap()["id"], 1);
        assert_eq!(peer.next_sent().await.unwrap()["id"], 2);
        assert!(peer.try_next_sent().await.is_none());
    }

    #[tokio::test]
    async fn close_ends_receive_and_blocks_sends() {
        let (transport, _peer) = pair();
        transport.close().await.unwrap();
        assert!(matches!(
            transport.send("{}".into()).await,
            Err(CdpError::ConnectionClosed)
        ));
        assert!(matches!(
            transport.receive().await,
            Err(CdpError::ConnectionClosed)
        ));
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn dropped_peer_closes_the_stream() {
        let (transport, peer) = pair();
        drop(peer);
        assert!(transport.receive().await.is_err());
        assert!(transport.send("{}".into()).await.is_err());
    }
}
