//! Best-effort outgoing queue.
//!
//! Enqueued messages go out in enqueue order through the same send gate
//! as foreground calls. A burst is drained by a single task; enqueueing
//! never waits on the network.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::correlation::CorrelationTable;
use crate::protocol::Command;
use crate::transport::{ConnectionState, Transport};

#[derive(Debug)]
struct QueuedSend {
    method: String,
    params: Option<Value>,
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<QueuedSend>,
    draining: bool,
}

/// Fire-and-forget send queue drained by one background task at a time.
pub struct OutgoingQueue {
    transport: Arc<dyn Transport>,
    calls: Arc<CorrelationTable>,
    runtime: Handle,
    state: Mutex<QueueState>,
    idle: Notify,
}

impl std::fmt::Debug for OutgoingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OutgoingQueue")
            .field("queued", &state.queue.len())
            .field("draining", &state.draining)
            .finish()
    }
}

impl OutgoingQueue {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        calls: Arc<CorrelationTable>,
        runtime: Handle,
    ) -> Self {
        Self {
            transport,
            calls,
            runtime,
            state: Mutex::new(QueueState::default()),
            idle: Notify::new(),
        }
    }

    /// Append a message and make sure a drain task is running.
    ///
    /// Safe to call from any thread, including from `Drop` impls.
    pub fn enqueue(self: &Arc<Self>, method: impl Into<String>, params: Option<Value>) {
        let start_drain = {
            let mut state = self.state.lock();
            state.queue.push_back(QueuedSend {
                method: method.into(),
                params,
            });
            !std::mem::replace(&mut state.draining, true)
        };

        if start_drain {
            let this = Arc::clone(self);
            self.runtime.spawn(async move { this.drain().await });
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until no drain task is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.state.lock().draining {
                return;
            }
            notified.await;
        }
    }

    async fn drain(&self) {
        loop {
            let next = {
                let mut state = self.state.lock();
                if self.transport.state() != ConnectionState::Open {
                    let dropped = state.queue.len();
                    state.queue.clear();
                    state.draining = false;
                    if dropped > 0 {
                        tracing::debug!(dropped, "connection not open, dropping queued sends");
                    }
                    None
                } else {
                    let next = state.queue.pop_front();
                    if next.is_none() {
                        state.draining = false;
                    }
                    next
                }
            };

            let Some(send) = next else {
                self.idle.notify_waiters();
                return;
            };

            let id = self.calls.allocate_id();
            let command = Command {
                id,
                method: &send.method,
                params: send.params.as_ref(),
            };
            let text = match command.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(method = %send.method, error = %e, "dropping unserializable queued send");
                    continue;
                }
            };

            tracing::trace!(target: "devtap::wire", id, "send {text}");
            if let Err(e) = self.transport.send(text).await {
                tracing::warn!(id, method = %send.method, error = %e, "queued send failed");
            }
        }
    }
}
