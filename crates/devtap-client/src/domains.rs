//! Reference-counted domain enablement.
//!
//! Independent callers may each ask for a category ("Page", "DOM", ...)
//! to be enabled. Only the 0 -> 1 transition sends `{category}.enable` and
//! only the 1 -> 0 transition sends `{category}.disable`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::CdpError;

#[derive(Debug, Default)]
struct CategoryState {
    /// Serializes transitions so a second acquirer waits for the enable.
    gate: tokio::sync::Mutex<()>,
    count: AtomicU32,
}

/// Per-connection interest counts, keyed by category.
#[derive(Debug, Default)]
pub struct DomainRegistry {
    categories: Mutex<HashMap<String, Arc<CategoryState>>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, category: &str) -> Arc<CategoryState> {
        Arc::clone(self.categories.lock().entry(category.to_owned()).or_default())
    }

    /// Current interest count for `category`.
    pub fn count(&self, category: &str) -> u32 {
        self.categories
            .lock()
            .get(category)
            .map_or(0, |s| s.count.load(Ordering::Acquire))
    }

    pub fn is_enabled(&self, category: &str) -> bool {
        self.count(category) > 0
    }

    /// Register interest, running `enable` on the 0 -> 1 transition.
    ///
    /// If `enable` fails the count is left unchanged. Returns the new count.
    pub async fn acquire<F, Fut>(&self, category: &str, enable: F) -> Result<u32, CdpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), CdpError>>,
    {
        let state = self.state(category);
        let _gate = state.gate.lock().await;
        let count = state.count.load(Ordering::Acquire);
        if count == 0 {
            tracing::debug!(category, "enabling domain");
            enable().await?;
        }
        state.count.store(count + 1, Ordering::Release);
        Ok(count + 1)
    }

    /// Drop interest, running `disable` on the 1 -> 0 transition.
    ///
    /// Releasing a category nobody holds is a caller bug and fails with
    /// [`CdpError::DomainUnderflow`]. Returns the new count.
    pub async fn release<F, Fut>(&self, category: &str, disable: F) -> Result<u32, CdpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), CdpError>>,
    {
        let state = self.state(category);
        let _gate = state.gate.lock().await;
        let count = state.count.load(Ordering::Acquire);
        match count {
            0 => {
                tracing::error!(category, "domain released without a matching acquire");
                Err(CdpError::DomainUnderflow {
                    category: category.to_owned(),
                })
            }
            1 => {
                // Interest is gone even if the disable call fails.
                state.count.store(0, Ordering::Release);
                tracing::debug!(category, "disabling domain");
                disable().await?;
                Ok(0)
            }
            n => {
                state.count.store(n - 1, Ordering::Release);
                Ok(n - 1)
            }
        }
    }
}
