//! Product lifecycle state and the per-product record kept in the table.

use std::path::PathBuf;
use std::time::Instant;

use crate::wmo::WmoHeading;

/// Lifecycle states a product moves through in the table (spec §3,
/// mirroring the original's `STATE_*` constants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductState {
    /// Slot is unused and available for a new product.
    Free,
    /// Queued by the poller, not yet sent.
    Queued,
    /// Sent, awaiting an ack within the sliding window.
    Sent,
    /// Server acknowledged success.
    Acked,
    /// Server acknowledged rejection; scheduled for a bounded retry.
    Nacked,
    /// Scheduled for a retry after a transport fault or timeout.
    Retry,
    /// Exhausted its retry budget or exceeded its TTL; discarded.
    Failed,
}

/// A single product tracked by the table, from the moment the poller
/// discovers its source file until it is freed.
#[derive(Debug, Clone)]
pub struct Product {
    pub state: ProductState,
    pub seqno: u32,
    pub path: PathBuf,
    pub size: u64,
    pub priority: i32,
    pub heading: WmoHeading,
    /// When this product was first queued; used for TTL discard.
    pub queued_at: Instant,
    /// Wire `queue_time` field, seconds since epoch at queue time.
    pub queue_time_epoch: i64,
    /// Number of send attempts made so far.
    pub attempts: u32,
}

impl Product {
    /// A `None` ttl (`queue_ttl = 0` in spec terms) means never discard by age.
    pub fn is_expired(&self, ttl: Option<std::time::Duration>, now: Instant) -> bool {
        match ttl {
            Some(ttl) => now.duration_since(self.queued_at) >= ttl,
            None => false,
        }
    }
}
