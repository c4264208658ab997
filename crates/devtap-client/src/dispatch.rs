//! The connection's single reader.
//!
//! Pulls complete messages off the transport in wire order and routes
//! them: responses settle their pending call, events go to the oldest
//! one-shot waiter and to every persistent listener. It is the only code
//! that settles call and waiter slots. When the transport fails or
//! closes, every outstanding call and waiter is failed with
//! [`CdpError::ConnectionClosed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::correlation::CorrelationTable;
use crate::error::CdpError;
use crate::events::EventRegistry;
use crate::protocol::{parse_inbound, Inbound};
use crate::transport::Transport;

/// What the dispatcher did with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Routed {
    Response { id: u64, matched: bool },
    Event { method: String, waiter_settled: bool },
    Ignored,
    Malformed,
}

/// Signals the end of the dispatch loop to interested callers.
#[derive(Debug, Default)]
pub(crate) struct LoopStatus {
    running: AtomicBool,
    stopped: Notify,
}

impl LoopStatus {
    pub(crate) fn started() -> Self {
        Self {
            running: AtomicBool::new(true),
            stopped: Notify::new(),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.stopped.notify_waiters();
    }

    pub(crate) async fn wait_stopped(&self) {
        loop {
            let notified = self.stopped.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

pub(crate) struct Dispatcher {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) calls: Arc<CorrelationTable>,
    pub(crate) events: Arc<EventRegistry>,
    pub(crate) status: Arc<LoopStatus>,
}

impl Dispatcher {
    /// Run until the transport stops producing messages.
    pub(crate) async fn run(self) {
        let reason = loop {
            match self.transport.receive().await {
                Ok(text) => {
                    self.route(&text);
                }
                Err(e) => break e,
            }
        };

        match &reason {
            CdpError::ConnectionClosed => tracing::info!("DevTools connection closed"),
            other => tracing::warn!(error = %other, "DevTools connection failed"),
        }

        let calls = self.calls.drain_all(CdpError::ConnectionClosed);
        let waiters = self.events.drain_all(CdpError::ConnectionClosed);
        if calls + waiters > 0 {
            tracing::info!(calls, waiters, "failed outstanding work on teardown");
        }
        self.status.stop();
    }

    /// Decode and route one complete inbound message.
    pub(crate) fn route(&self, text: &str) -> Routed {
        tracing::trace!(target: "devtap::wire", "recv {text}");

        let inbound = match parse_inbound(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                let preview: String = text.chars().take(200).collect();
                tracing::warn!(error = %e, message = %preview, "skipping malformed inbound message");
                return Routed::Malformed;
            }
        };

        match inbound {
            Inbound::Response { id, outcome } => {
                let matched = self.calls.resolve(id, outcome);
                Routed::Response { id, matched }
            }
            Inbound::Event(event) => {
                let waiter_settled = self.events.deliver(&event);
                self.events.notify_listeners(&event);
                Routed::Event {
                    method: event.method,
                    waiter_settled,
                }
            }
            Inbound::Unrecognized => {
                tracing::debug!("ignoring message with neither id nor method");
                Routed::Ignored
            }
        }
    }
}
