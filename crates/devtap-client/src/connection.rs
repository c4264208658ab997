//! The client-facing DevTools connection.
//!
//! A [`Connection`] owns one transport and the tables that make
//! request/response correlation, event waiting and resource release work
//! over it. Handles are cheap to clone and may be used from any task; a
//! single dispatch task reads the socket for the lifetime of the
//! connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::correlation::CorrelationTable;
use crate::dispatch::{Dispatcher, LoopStatus};
use crate::domains::DomainRegistry;
use crate::error::{CdpError, RemoteError};
use crate::events::{EventRegistry, EventWait, ListenerError, ListenerId};
use crate::lifecycle::{ObjectGroup, RemoteHandle};
use crate::outgoing::OutgoingQueue;
use crate::protocol::{decode_value, CdpEvent, Command};
use crate::transport::{ConnectionState, Transport, WebSocketTransport};
use crate::types::RemoteObject;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    transport: Arc<dyn Transport>,
    calls: Arc<CorrelationTable>,
    events: Arc<EventRegistry>,
    outgoing: Arc<OutgoingQueue>,
    domains: DomainRegistry,
    status: Arc<LoopStatus>,
    config: ClientConfig,
    next_group: AtomicU64,
    runtime: Handle,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if self.transport.state() != ConnectionState::Open {
            return;
        }
        // Last handle is gone; closing the socket ends the dispatch task.
        let transport = Arc::clone(&self.transport);
        self.runtime.spawn(async move {
            if let Err(e) = transport.close().await {
                tracing::debug!(error = %e, "close on drop failed");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A live connection to one DevTools target.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.shared.transport.state())
            .field("pending_calls", &self.shared.calls.pending_count())
            .field("events", &self.shared.events)
            .finish()
    }
}

impl Connection {
    /// Connect to a target's `webSocketDebuggerUrl` with default settings.
    pub async fn connect(url: &str) -> Result<Self, CdpError> {
        Self::connect_with_config(url, ClientConfig::default()).await
    }

    pub async fn connect_with_config(url: &str, config: ClientConfig) -> Result<Self, CdpError> {
        config.validate()?;
        tracing::info!(url, "connecting to DevTools endpoint");
        let transport = WebSocketTransport::connect(url, &config).await?;
        let connection = Self::from_transport(transport, config)?;
        tracing::info!(url, "DevTools connection established");
        Ok(connection)
    }

    /// Wrap an already-open transport and start the dispatch task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_transport<T: Transport>(transport: T, config: ClientConfig) -> Result<Self, CdpError> {
        let runtime = Handle::try_current().map_err(|e| CdpError::Transport {
            detail: format!("no tokio runtime to drive the connection: {e}"),
        })?;

        let transport: Arc<dyn Transport> = Arc::new(transport);
        let calls = Arc::new(CorrelationTable::new());
        let events = Arc::new(EventRegistry::new());
        let status = Arc::new(LoopStatus::started());
        let outgoing = Arc::new(OutgoingQueue::new(
            Arc::clone(&transport),
            Arc::clone(&calls),
            runtime.clone(),
        ));

        let dispatcher = Dispatcher {
            transport: Arc::clone(&transport),
            calls: Arc::clone(&calls),
            events: Arc::clone(&events),
            status: Arc::clone(&status),
        };
        runtime.spawn(dispatcher.run());

        Ok(Self {
            shared: Arc::new(Shared {
                transport,
                calls,
                events,
                outgoing,
                domains: DomainRegistry::new(),
                status,
                config,
                next_group: AtomicU64::new(1),
                runtime,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.transport.state()
    }

    /// True while the socket is open and the dispatch task is running.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open && self.shared.status.is_running()
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn write(&self, id: u64, method: &str, params: Option<&Value>) -> Result<(), CdpError> {
        let text = Command { id, method, params }.to_json()?;
        tracing::trace!(target: "devtap::wire", id, "send {text}");
        self.shared.transport.send(text).await
    }

    /// Send a command without waiting for, or correlating, its response.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<(), CdpError> {
        let id = self.shared.calls.allocate_id();
        tracing::debug!(id, method, "sending DevTools command");
        self.write(id, method, params.as_ref()).await
    }

    /// Send a command and wait for its raw result.
    pub async fn call_raw(&self, method: &str, params: Option<Value>) -> Result<Value, CdpError> {
        self.call_raw_with_id(None, method, params).await
    }

    /// Like [`Connection::call_raw`] with a caller-chosen correlation id.
    ///
    /// Fails with [`CdpError::DuplicateId`] if `id` is still outstanding.
    pub async fn call_raw_with_id(
        &self,
        id: Option<u64>,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, CdpError> {
        let (id, slot) = self.shared.calls.register(id)?;
        tracing::debug!(id, method, "sending DevTools command");

        if let Err(e) = self.write(id, method, params.as_ref()).await {
            self.shared.calls.cancel(id);
            return Err(e);
        }

        let result = slot.wait().await;
        if let Err(e) = &result {
            tracing::debug!(id, method, error = %e, "DevTools command failed");
        }
        result
    }

    /// Send a command and decode its result into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, CdpError> {
        let value = self.call_raw(method, params).await?;
        decode_value(value)
    }

    /// Like [`Connection::call`], but a server-reported error is returned
    /// as data in the inner `Result` instead of as a failure.
    pub async fn call_or_failure<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Result<T, RemoteError>, CdpError> {
        match self.call_raw(method, params).await {
            Ok(value) => decode_value(value).map(Ok),
            Err(CdpError::Remote(err)) => Ok(Err(err)),
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Register a one-shot wait for the next occurrence of `method`.
    ///
    /// The wait is registered before this returns, so the command that
    /// triggers the event can be sent next without a race.
    pub fn await_event_once<T>(&self, method: &str) -> Result<EventWait<T>, CdpError> {
        let slot = self.shared.events.await_once(method)?;
        Ok(EventWait::new(method, slot))
    }

    /// Add a listener that sees every inbound event.
    pub fn subscribe<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&CdpEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.shared.events.subscribe(None, handler)
    }

    /// Add a listener for one event method.
    pub fn subscribe_to<F>(&self, method: &str, handler: F) -> ListenerId
    where
        F: Fn(&CdpEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.shared.events.subscribe(Some(method), handler)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.events.listener_count()
    }

    /// Stream every inbound event through a channel.
    ///
    /// The listener stays registered until the returned id is unsubscribed;
    /// events arriving after the receiver is dropped are discarded.
    pub fn event_stream(&self) -> (ListenerId, mpsc::UnboundedReceiver<CdpEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
            Ok(())
        });
        (id, rx)
    }

    // -----------------------------------------------------------------------
    // Background sends and remote objects
    // -----------------------------------------------------------------------

    /// Queue a fire-and-forget command. Never waits on the network.
    pub fn queue_send(&self, method: &str, params: Option<Value>) {
        self.shared.outgoing.enqueue(method, params);
    }

    /// Wait until every queued send has been written.
    pub async fn flush(&self) {
        self.shared.outgoing.wait_idle().await;
    }

    /// Create a fresh object group named `{prefix}-{kind}{n}`.
    pub fn object_group(&self, kind: &str) -> ObjectGroup {
        let n = self.shared.next_group.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{kind}{n}", self.shared.config.object_group_prefix);
        ObjectGroup::new(name, &self.shared.outgoing)
    }

    /// Take ownership of a server-side value's release obligation.
    pub fn adopt(&self, object: RemoteObject, group: Option<&ObjectGroup>) -> RemoteHandle {
        RemoteHandle::new(object, group, &self.shared.outgoing)
    }

    // -----------------------------------------------------------------------
    // Domains
    // -----------------------------------------------------------------------

    /// Register interest in a category, sending `{category}.enable` on
    /// the first acquire. Returns the new interest count.
    pub async fn enable(&self, category: &str) -> Result<u32, CdpError> {
        let method = format!("{category}.enable");
        let (this, method) = (self, method.as_str());
        self.shared
            .domains
            .acquire(category, move || async move {
                this.call_raw(method, None).await.map(drop)
            })
            .await
    }

    /// Drop interest in a category, sending `{category}.disable` on the
    /// last release. Returns the new interest count.
    pub async fn disable(&self, category: &str) -> Result<u32, CdpError> {
        let method = format!("{category}.disable");
        let (this, method) = (self, method.as_str());
        self.shared
            .domains
            .release(category, move || async move {
                this.call_raw(method, None).await.map(drop)
            })
            .await
    }

    pub fn is_enabled(&self, category: &str) -> bool {
        self.shared.domains.is_enabled(category)
    }

    pub fn domain_count(&self, category: &str) -> u32 {
        self.shared.domains.count(category)
    }

    /// Fail with [`CdpError::DomainNotEnabled`] unless `category` is held.
    pub fn ensure_enabled(&self, category: &str) -> Result<(), CdpError> {
        if self.is_enabled(category) {
            Ok(())
        } else {
            Err(CdpError::DomainNotEnabled {
                category: category.to_owned(),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Flush queued releases, close the socket and wait for the dispatch
    /// task to fail whatever is still outstanding.
    pub async fn close(&self) -> Result<(), CdpError> {
        self.flush().await;
        let closed = if self.state() == ConnectionState::Open {
            self.shared.transport.close().await
        } else {
            Ok(())
        };
        self.shared.status.wait_stopped().await;
        closed
    }

    /// Resolve once the dispatch task has stopped for any reason.
    pub async fn closed(&self) {
        self.shared.status.wait_stopped().await;
    }

    pub fn pending_calls(&self) -> usize {
        self.shared.calls.pending_count()
    }
}
