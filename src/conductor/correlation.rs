// src/conductor/correlation.rs

//! Correlation table: electron id → single-use result slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::sync::lock_ignore_poison;
use crate::{ConductorError, Properties, Result, ResultSlot};

/// Tracks electrons sent by this conductor that are waiting for a result.
///
/// Each entry is a `oneshot` sender, so a slot can be fulfilled at most once
/// and is released as part of fulfillment. The lock is only held for the map
/// operation itself; delivering into a slot happens after it is released.
pub(crate) struct CorrelationTable {
    // ---
    slots: Mutex<HashMap<String, Slot>>,
    generation: AtomicU64,
}

struct Slot {
    generation: u64,
    tx: oneshot::Sender<Properties>,
    settled: CancellationToken,
}

impl Slot {
    fn settle(self) -> oneshot::Sender<Properties> {
        self.settled.cancel();
        self.tx
    }
}

/// Identifies one registration, so a late cleanup never removes a slot that
/// has since been registered again under the same electron id.
pub(crate) struct SlotTicket {
    pub generation: u64,
    /// Cancelled once the slot leaves the table for any reason.
    pub settled: CancellationToken,
}

impl CorrelationTable {
    // ---

    pub fn new() -> Self {
        // ---
        Self {
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(1),
        }
    }

    /// Register a slot for `electron_id` and return its read side.
    ///
    /// A slot whose reader was already dropped is replaced; a live one is not.
    pub fn register(&self, electron_id: &str) -> Result<(ResultSlot, SlotTicket)> {
        // ---
        let mut slots = lock_ignore_poison(&self.slots);

        if let Some(existing) = slots.get(electron_id) {
            if !existing.tx.is_closed() {
                return Err(ConductorError::DuplicateElectron(electron_id.to_string()));
            }
        }

        let (tx, rx) = oneshot::channel();
        let ticket = SlotTicket {
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
            settled: CancellationToken::new(),
        };
        let slot = Slot {
            generation: ticket.generation,
            tx,
            settled: ticket.settled.clone(),
        };

        if let Some(stale) = slots.insert(electron_id.to_string(), slot) {
            stale.settle();
        }
        Ok((rx, ticket))
    }

    /// Deliver `properties` to the slot registered for its electron.
    ///
    /// Returns false if no slot exists (late, duplicate or foreign result) or
    /// if the reader has gone away.
    pub fn fulfill(&self, properties: Properties) -> bool {
        // ---
        let slot = lock_ignore_poison(&self.slots).remove(&properties.electron_id);

        match slot {
            Some(slot) => slot.settle().send(properties).is_ok(),
            None => false,
        }
    }

    /// Drop the slot for `electron_id` without fulfilling it.
    pub fn remove(&self, electron_id: &str) -> bool {
        // ---
        let slot = lock_ignore_poison(&self.slots).remove(electron_id);
        slot.map(Slot::settle).is_some()
    }

    /// Drop the slot for `electron_id` only if it is still the registration
    /// `ticket` was issued for.
    pub fn release(&self, electron_id: &str, ticket: &SlotTicket) -> bool {
        // ---
        let mut slots = lock_ignore_poison(&self.slots);

        match slots.get(electron_id) {
            Some(slot) if slot.generation == ticket.generation => {
                slots.remove(electron_id).map(Slot::settle).is_some()
            }
            _ => false,
        }
    }

    /// Drop every outstanding slot. Readers observe a closed channel.
    ///
    /// Returns the number of slots released.
    pub fn close_all(&self) -> usize {
        // ---
        let drained: Vec<_> = lock_ignore_poison(&self.slots).drain().collect();
        let released = drained.len();
        for (_, slot) in drained {
            slot.settle();
        }
        released
    }

    /// Number of outstanding slots.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.slots).len()
    }
}
