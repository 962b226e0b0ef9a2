//! Fixed-size product table: a slot pool plus three index queues.
//!
//! The original C implementation threaded `prod_info_t` structs onto
//! intrusive `next`/`prev` pointers for three separate lists (free,
//! awaiting-ack, retry). Here the pool is a flat `Vec<Product>` and each
//! list is a `VecDeque<SlotId>` of indices into it, which sidesteps
//! self-referential structures entirely and keeps everything `Send`.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::product::{Product, ProductState};

/// Index into the table's slot pool.
pub type SlotId = usize;

/// Fixed-capacity table of in-flight products.
///
/// `window` slots are reserved for products that are `Sent` and awaiting
/// an ack; the table additionally holds queued-but-not-yet-sent and
/// retry-pending products up to `capacity`.
pub struct ProductTable {
    slots: Vec<Option<Product>>,
    free: VecDeque<SlotId>,
    awaiting_ack: VecDeque<SlotId>,
    retry: VecDeque<SlotId>,
    capacity: usize,
    window: usize,
    max_retry: i64,
    /// `None` means `queue_ttl == 0`: never discard by age.
    ttl: Option<Duration>,
}

impl ProductTable {
    pub fn new(capacity: usize, window: usize, max_retry: i64, ttl: Option<Duration>) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut free = VecDeque::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(None);
            free.push_back(i);
        }
        Self {
            slots,
            free,
            awaiting_ack: VecDeque::new(),
            retry: VecDeque::new(),
            capacity,
            window,
            max_retry,
            ttl,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_free_slot(&self) -> bool {
        !self.free.is_empty()
    }

    pub fn awaiting_ack_count(&self) -> usize {
        self.awaiting_ack.len()
    }

    /// Whether the sliding window has room for another in-flight send.
    pub fn window_has_room(&self) -> bool {
        self.awaiting_ack.len() < self.window
    }

    /// Insert a freshly queued product, returning its slot id.
    pub fn insert(&mut self, product: Product) -> Option<SlotId> {
        let slot = self.free.pop_front()?;
        self.slots[slot] = Some(product);
        Some(slot)
    }

    pub fn get(&self, slot: SlotId) -> Option<&Product> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut Product> {
        self.slots.get_mut(slot).and_then(|s| s.as_mut())
    }

    /// Transition `slot` to `Sent` and move it onto the awaiting-ack list.
    pub fn mark_sent(&mut self, slot: SlotId) {
        if let Some(p) = self.get_mut(slot) {
            p.state = ProductState::Sent;
            p.attempts += 1;
        }
        self.awaiting_ack.push_back(slot);
    }

    /// Remove `slot` from the awaiting-ack list (called when its ack
    /// arrives, whether success, retry, or failure). Returns `true` if
    /// the slot was found there.
    ///
    /// The freed index comes from `slot` itself, the identifier carried
    /// in the ack frame -- not from any outer loop position.
    pub fn remove_from_awaiting_ack(&mut self, slot: SlotId) -> bool {
        if let Some(pos) = self.awaiting_ack.iter().position(|&s| s == slot) {
            self.awaiting_ack.remove(pos);
            true
        } else {
            false
        }
    }

    /// Move `slot` onto the retry list (nack, timeout, or transport fault).
    pub fn mark_retry(&mut self, slot: SlotId) {
        if let Some(p) = self.get_mut(slot) {
            p.state = ProductState::Retry;
        }
        self.retry.push_back(slot);
    }

    /// Pop the next retry-pending slot, if the caller should attempt a resend.
    pub fn pop_retry(&mut self) -> Option<SlotId> {
        self.retry.pop_front()
    }

    pub fn retry_count(&self) -> usize {
        self.retry.len()
    }

    /// Whether `slot` has exhausted its retry budget (`max_retry < 0`
    /// means unlimited retries).
    pub fn retries_exhausted(&self, slot: SlotId) -> bool {
        if self.max_retry < 0 {
            return false;
        }
        match self.get(slot) {
            Some(p) => p.attempts as i64 > self.max_retry,
            None => true,
        }
    }

    /// Free a slot unconditionally, returning it to the free list.
    /// Removes it from whichever other list it might still be on.
    pub fn free_slot(&mut self, slot: SlotId) {
        self.remove_from_awaiting_ack(slot);
        if let Some(pos) = self.retry.iter().position(|&s| s == slot) {
            self.retry.remove(pos);
        }
        self.slots[slot] = None;
        self.free.push_back(slot);
    }

    /// Scan all non-free slots for products that have exceeded their TTL
    /// and free them, returning the slots that were discarded.
    pub fn discard_expired(&mut self, now: Instant) -> Vec<SlotId> {
        let ttl = self.ttl;
        let expired: Vec<SlotId> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Some(p) if p.is_expired(ttl, now) => Some(i),
                _ => None,
            })
            .collect();
        for &slot in &expired {
            self.free_slot(slot);
        }
        expired
    }

    /// Paths for every occupied slot, so the poller doesn't re-queue a
    /// product that's already sitting in the table.
    pub fn in_flight_paths(&self) -> std::collections::HashSet<PathBuf> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref().map(|p| p.path.clone()))
            .collect()
    }

    /// Recovery procedure run after a reconnect: any product still marked
    /// `Sent` had its ack in flight when the connection dropped, so its
    /// delivery is unknown. Move every such slot back onto the retry list
    /// rather than assuming success or silently losing it.
    pub fn rebuild(&mut self) {
        let sent_slots: Vec<SlotId> = self.awaiting_ack.drain(..).collect();
        for slot in sent_slots {
            self.mark_retry(slot);
        }
    }
}
