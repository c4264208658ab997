//! Single-assignment result slot.
//!
//! A slot is settled at most once (the first `settle` wins, later ones are
//! no-ops) and may be read by any number of waiters. Settling and waiting
//! may happen on different tasks or threads.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Notify, OnceCell};

use crate::error::CdpError;

pub type SlotResult = Result<Value, CdpError>;

#[derive(Debug, Default)]
struct Inner {
    value: OnceCell<SlotResult>,
    notify: Notify,
}

/// Shared one-shot placeholder for a call result or an event payload.
#[derive(Debug, Clone, Default)]
pub struct Slot {
    inner: Arc<Inner>,
}

impl Slot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `result` unless the slot is already settled.
    ///
    /// Returns `true` if this call settled the slot.
    pub fn settle(&self, result: SlotResult) -> bool {
        let settled = self.inner.value.set(result).is_ok();
        if settled {
            self.inner.notify.notify_waiters();
        }
        settled
    }

    pub fn is_settled(&self) -> bool {
        self.inner.value.initialized()
    }

    /// The settled value, if any, without waiting.
    pub fn peek(&self) -> Option<SlotResult> {
        self.inner.value.get().cloned()
    }

    /// Wait until the slot is settled and return a copy of its value.
    pub async fn wait(&self) -> SlotResult {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a settle between the
            // check and the await is not lost.
            notified.as_mut().enable();
            if let Some(result) = self.inner.value.get() {
                return result.clone();
            }
            notified.await;
        }
    }

    /// Number of live handles to this slot, including the caller's.
    pub(crate) fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn first_settle_wins() {
        let slot = Slot::new();
        assert!(slot.settle(Ok(json!(1))));
        assert!(!slot.settle(Ok(json!(2))));
        assert!(!slot.settle(Err(CdpError::ConnectionClosed)));
        assert_eq!(slot.wait().await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn many_readers_see_the_same_value() {
        let slot = Slot::new();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let slot = slot.clone();
                tokio::spawn(async move { slot.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        slot.settle(Ok(json!({"x": 5})));

        for reader in readers {
            assert_eq!(reader.await.unwrap().unwrap(), json!({"x": 5}));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn settle_from_another_thread_wakes_waiter() {
        let slot = Slot::new();
        let settler = slot.clone();
        let handle = std::thread::spawn(move || settler.settle(Err(CdpError::ConnectionClosed)));
        let result = slot.wait().await;
        assert!(handle.join().unwrap());
        assert!(matches!(result, Err(CdpError::ConnectionClosed)));
    }

    #[test]
    fn peek_reports_state() {
        let slot = Slot::new();
        assert!(!slot.is_settled());
        assert!(slot.peek().is_none());
        slot.settle(Ok(Value::Null));
        assert!(slot.is_settled());
        assert_eq!(slot.peek().unwrap().unwrap(), Value::Null);
    }
}
