//! Correlation of outstanding calls to their responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::CdpError;
use crate::slot::{Slot, SlotResult};

#[derive(Debug, Default)]
struct Table {
    pending: HashMap<u64, Slot>,
    /// Set once the table has been drained; later registrations fail with it.
    closed: Option<CdpError>,
}

/// Maps call ids to the slots awaiting their responses.
#[derive(Debug)]
pub struct CorrelationTable {
    next_id: AtomicU64,
    table: Mutex<Table>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            table: Mutex::new(Table::default()),
        }
    }

    /// Allocate a fresh id without registering it.
    ///
    /// Used by fire-and-forget sends whose responses nobody awaits. Ids of
    /// calls still pending, hinted ones included, are skipped.
    pub fn allocate_id(&self) -> u64 {
        let table = self.table.lock();
        self.next_free_id(&table)
    }

    fn next_free_id(&self, table: &Table) -> u64 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            // Zero only shows up after the counter wraps.
            if id != 0 && !table.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Register a pending call and return its id and result slot.
    ///
    /// With `id_hint` the caller's id is used verbatim; otherwise the next
    /// free id is allocated.
    pub fn register(&self, id_hint: Option<u64>) -> Result<(u64, Slot), CdpError> {
        let mut table = self.table.lock();
        if let Some(err) = &table.closed {
            return Err(err.clone());
        }

        let id = match id_hint {
            Some(id) if table.pending.contains_key(&id) => {
                return Err(CdpError::DuplicateId { id });
            }
            Some(id) => id,
            None => self.next_free_id(&table),
        };

        let slot = Slot::new();
        table.pending.insert(id, slot.clone());
        Ok((id, slot))
    }

    /// Settle and remove the call registered under `id`.
    ///
    /// Returns `false` for unknown ids (stale or duplicate responses).
    pub fn resolve(&self, id: u64, result: SlotResult) -> bool {
        let slot = self.table.lock().pending.remove(&id);
        match slot {
            Some(slot) => {
                slot.settle(result);
                true
            }
            None => {
                tracing::debug!(id, "received response for unknown call id");
                false
            }
        }
    }

    /// Forget a registration whose request never made it onto the wire.
    pub fn cancel(&self, id: u64) {
        self.table.lock().pending.remove(&id);
    }

    /// Fail every outstanding call with `err` and refuse new registrations.
    ///
    /// Returns the number of calls that were still pending.
    pub fn drain_all(&self, err: CdpError) -> usize {
        let drained: Vec<Slot> = {
            let mut table = self.table.lock();
            table.closed = Some(err.clone());
            table.pending.drain().map(|(_, slot)| slot).collect()
        };
        let count = drained.len();
        for slot in drained {
            slot.settle(Err(err.clone()));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.table.lock().pending.len()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.table.lock().pending.contains_key(&id)
    }
}
