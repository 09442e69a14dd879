// src/conductor/senders.rs

//! Sender registry: electron id → reply queue of whoever sent it.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::sync::lock_ignore_poison;

/// Remembers which reply queue each received electron came from.
///
/// Entries may be looked up any number of times. Without a capacity they live
/// as long as the conductor; with one, the oldest entries are evicted first.
pub(crate) struct SenderRegistry {
    // ---
    inner: Mutex<Registry>,
    capacity: Option<usize>,
}

struct Registry {
    senders: HashMap<String, String>,
    order: VecDeque<String>,
}

impl SenderRegistry {
    // ---

    pub fn new(capacity: Option<usize>) -> Self {
        // ---
        Self {
            inner: Mutex::new(Registry {
                senders: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Record that `electron_id` was sent by `sender_id`.
    pub fn record(&self, electron_id: &str, sender_id: &str) {
        // ---
        let mut reg = lock_ignore_poison(&self.inner);

        let previous = reg
            .senders
            .insert(electron_id.to_string(), sender_id.to_string());

        if self.capacity.is_none() || previous.is_some() {
            return;
        }

        reg.order.push_back(electron_id.to_string());
        while self.capacity.is_some_and(|cap| reg.senders.len() > cap) {
            match reg.order.pop_front() {
                Some(oldest) => {
                    reg.senders.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Reply queue for `electron_id`, if known.
    pub fn lookup(&self, electron_id: &str) -> Option<String> {
        lock_ignore_poison(&self.inner).senders.get(electron_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.inner).senders.len()
    }
}
