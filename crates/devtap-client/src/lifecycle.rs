//! Ownership of server-side objects.
//!
//! Values returned by script evaluation stay alive in the page until they
//! are released. An [`ObjectGroup`] releases everything created under its
//! name in one request; a [`RemoteHandle`] outside any group releases its
//! own object. Both release at most once, either through an explicit
//! `dispose` or when dropped, and always through the outgoing queue so
//! the caller never waits on the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde_json::json;

use crate::outgoing::OutgoingQueue;
use crate::types::{RemoteObject, ValueKind};

// ---------------------------------------------------------------------------
// ObjectGroup
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct GroupInner {
    name: String,
    disposed: AtomicBool,
    queue: Weak<OutgoingQueue>,
}

impl GroupInner {
    fn dispose(&self) -> bool {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        match self.queue.upgrade() {
            Some(queue) => {
                tracing::debug!(group = %self.name, "releasing object group");
                queue.enqueue(
                    "Runtime.releaseObjectGroup",
                    Some(json!({ "objectGroup": self.name })),
                );
                true
            }
            // Connection is gone and the page dropped the group with it.
            None => false,
        }
    }
}

impl Drop for GroupInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A named batch of server-side objects, released together.
///
/// Clones share one group; the release happens on the first `dispose` or
/// when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct ObjectGroup {
    inner: Arc<GroupInner>,
}

impl ObjectGroup {
    pub(crate) fn new(name: String, queue: &Arc<OutgoingQueue>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name,
                disposed: AtomicBool::new(false),
                queue: Arc::downgrade(queue),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Queue the group release. Returns `false` if it was already released.
    pub fn dispose(&self) -> bool {
        self.inner.dispose()
    }

    fn downgrade(&self) -> Weak<GroupInner> {
        Arc::downgrade(&self.inner)
    }
}

// ---------------------------------------------------------------------------
// RemoteHandle
// ---------------------------------------------------------------------------

/// Owned reference to one server-side value.
///
/// Not `Clone`: exactly one handle carries the release obligation.
#[derive(Debug)]
pub struct RemoteHandle {
    object: RemoteObject,
    /// Lookup only; the group owns the release of its members.
    group: Option<Weak<GroupInner>>,
    released: AtomicBool,
    queue: Weak<OutgoingQueue>,
}

impl RemoteHandle {
    pub(crate) fn new(
        object: RemoteObject,
        group: Option<&ObjectGroup>,
        queue: &Arc<OutgoingQueue>,
    ) -> Self {
        Self {
            object,
            group: group.map(ObjectGroup::downgrade),
            released: AtomicBool::new(false),
            queue: Arc::downgrade(queue),
        }
    }

    pub fn object(&self) -> &RemoteObject {
        &self.object
    }

    pub fn kind(&self) -> ValueKind {
        self.object.kind
    }

    pub fn object_id(&self) -> Option<&str> {
        self.object.object_id.as_deref()
    }

    /// The owning group's name, while that group is alive.
    pub fn group_name(&self) -> Option<String> {
        self.group
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|g| g.name.clone())
    }

    /// The owning group, while that group is alive.
    pub fn group(&self) -> Option<ObjectGroup> {
        self.group
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| ObjectGroup { inner })
    }

    pub fn belongs_to_group(&self) -> bool {
        self.group.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Queue the release of this value.
    ///
    /// A no-op for grouped handles, primitives without an object id, and
    /// handles already released. Returns `true` if a release was queued.
    pub fn dispose(&self) -> bool {
        if self.group.is_some() {
            return false;
        }
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let Some(object_id) = self.object.object_id.as_deref() else {
            return false;
        };
        let Some(queue) = self.queue.upgrade() else {
            return false;
        };
        tracing::debug!(object_id, "releasing remote object");
        queue.enqueue("Runtime.releaseObject", Some(json!({ "objectId": object_id })));
        true
    }

    /// Give up the release obligation and return the raw description.
    pub fn into_object(self) -> RemoteObject {
        self.released.store(true, Ordering::Release);
        self.object.clone()
    }
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationTable;
    use crate::memory::{self, MemoryPeer};
    use crate::transport::Transport;
    use serde_json::Value;
    use tokio::runtime::Handle;

    fn queue() -> (Arc<OutgoingQueue>, MemoryPeer) {
        let (transport, peer) = memory::pair();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let queue = Arc::new(OutgoingQueue::new(
            transport,
            Arc::new(CorrelationTable::new()),
            Handle::current(),
        ));
        (queue, peer)
    }

    fn object(id: Option<&str>) -> RemoteObject {
        RemoteObject {
            kind: ValueKind::Object,
            subtype: None,
            class_name: Some("Object".into()),
            value: None,
            unserializable_value: None,
            description: None,
            object_id: id.map(str::to_owned),
        }
    }

    async fn sent(peer: &MemoryPeer, queue: &OutgoingQueue) -> Vec<Value> {
        queue.wait_idle().await;
        let mut out = Vec::new();
        while let Some(msg) = peer.try_next_sent().await {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn handle_releases_once() {
        let (queue, peer) = queue();
        let handle = RemoteHandle::new(object(Some("obj-1")), None, &queue);
        assert!(handle.dispose());
        assert!(!handle.dispose());
        drop(handle);

        let sent = sent(&peer, &queue).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["method"], "Runtime.releaseObject");
        assert_eq!(sent[0]["params"]["objectId"], "obj-1");
    }

    #[tokio::test]
    async fn drop_releases_ungrouped_handle() {
        let (queue, peer) = queue();
        drop(RemoteHandle::new(object(Some("obj-2")), None, &queue));
        let sent = sent(&peer, &queue).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["params"]["objectId"], "obj-2");
    }

    #[tokio::test]
    async fn primitives_need_no_release() {
        let (queue, peer) = queue();
        let handle = RemoteHandle::new(object(None), None, &queue);
        assert!(!handle.dispose());
        assert!(handle.is_released());
        drop(handle);
        assert!(sent(&peer, &queue).await.is_empty());
    }

    #[tokio::test]
    async fn grouped_handles_defer_to_the_group() {
        let (queue, peer) = queue();
        let group = ObjectGroup::new("devtap-evaluate1".into(), &queue);
        let a = RemoteHandle::new(object(Some("a")), Some(&group), &queue);
        let b = RemoteHandle::new(object(Some("b")), Some(&group), &queue);
        assert_eq!(a.group_name().as_deref(), Some("devtap-evaluate1"));
        assert_eq!(a.group().map(|g| g.name().to_owned()).as_deref(), Some("devtap-evaluate1"));

        assert!(!a.dispose());
        drop(b);
        assert!(group.dispose());
        assert!(!group.dispose());
        drop(a);
        drop(group);

        let sent = sent(&peer, &queue).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["method"], "Runtime.releaseObjectGroup");
        assert_eq!(sent[0]["params"]["objectGroup"], "devtap-evaluate1");
    }

    #[tokio::test]
    async fn last_group_clone_releases_on_drop() {
        let (queue, peer) = queue();
        let group = ObjectGroup::new("g".into(), &queue);
        let clone = group.clone();
        drop(group);
        assert!(sent(&peer, &queue).await.is_empty());
        drop(clone);
        let sent = sent(&peer, &queue).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["params"]["objectGroup"], "g");
    }

    #[tokio::test]
    async fn into_object_skips_release() {
        let (queue, peer) = queue();
        let handle = RemoteHandle::new(object(Some("kept")), None, &queue);
        let raw = handle.into_object();
        assert_eq!(raw.object_id.as_deref(), Some("kept"));
        assert!(sent(&peer, &queue).await.is_empty());
    }
}
