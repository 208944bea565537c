//! Pending Queue
//!
//! Bookkeeping for the write-behind queue. Pure state, no locking or
//! blocking; the owning [`super::AsyncStore`] guards it with a mutex.
//!
//! ## Per-key states
//! ```text
//!   Clean ──store/erase──▶ Pending ──pop──▶ Draining ──finish──▶ Clean
//!                           │   ▲
//!                           └───┘ store/erase replaces the op in place
//! ```
//!
//! A key that is draining may also be pending again (a newer op arrived
//! after the worker took the older one). It is re-queued at the back, so
//! the worker always applies same-key ops in submission order.

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;

/// A queued operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingOp {
    Store(Bytes),
    Erase,
}

impl PendingOp {
    pub fn name(&self) -> &'static str {
        match self {
            PendingOp::Store(_) => "store",
            PendingOp::Erase => "erase",
        }
    }
}

#[derive(Debug)]
struct PendingEntry {
    op: PendingOp,
    size: u64,
}

/// The entry the worker is currently applying
#[derive(Debug)]
pub(crate) struct Draining {
    pub key: Bytes,
    pub op: PendingOp,
    pub size: u64,
}

#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pending: HashMap<Bytes, PendingEntry>,
    /// Keys of `pending`, oldest first
    order: VecDeque<Bytes>,
    draining: Option<Draining>,
    /// Oversized stores currently written through by a caller thread
    write_through: HashSet<Bytes>,
    /// Bytes held by pending and draining entries
    bytes_in_flight: u64,
    /// An `erase_all` is running against the inner store
    clearing: bool,

    /// No new operations are accepted
    pub closing: bool,
    /// Worker joined and inner store closed
    pub closed: bool,

    /// Bumped on every drain failure, so blocked callers can notice one
    pub failure_epoch: u64,
    pub last_failure: Option<String>,
    pub failures: u64,
}

impl QueueState {
    pub fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    /// Pending plus draining entries
    pub fn queued(&self) -> usize {
        self.order.len() + usize::from(self.draining.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Nothing queued, draining, written through or being cleared
    pub fn is_idle(&self) -> bool {
        self.order.is_empty()
            && self.draining.is_none()
            && self.write_through.is_empty()
            && !self.clearing
    }

    /// Whether no operation on `key` is queued, draining or written through,
    /// and no clear is running
    pub fn is_key_idle(&self, key: &[u8]) -> bool {
        !self.clearing
            && !self.pending.contains_key(key)
            && !self.write_through.contains(key)
            && self
                .draining
                .as_ref()
                .map_or(true, |d| d.key.as_ref() != key)
    }

    pub fn is_clearing(&self) -> bool {
        self.clearing
    }

    pub fn begin_clear(&mut self) {
        self.clearing = true;
    }

    pub fn end_clear(&mut self) {
        self.clearing = false;
    }

    pub fn is_written_through(&self, key: &[u8]) -> bool {
        self.write_through.contains(key)
    }

    /// Bytes the pending op for `key` holds (0 if none)
    pub fn pending_size(&self, key: &[u8]) -> u64 {
        self.pending.get(key).map_or(0, |entry| entry.size)
    }

    /// Latest queued intent for `key`.
    ///
    /// `Some(Some(value))` for a queued store, `Some(None)` for a queued
    /// erase, `None` when the queue knows nothing about the key.
    pub fn lookup(&self, key: &[u8]) -> Option<Option<Bytes>> {
        let op = match self.pending.get(key) {
            Some(entry) => &entry.op,
            None => match &self.draining {
                Some(d) if d.key.as_ref() == key => &d.op,
                _ => return None,
            },
        };
        Some(match op {
            PendingOp::Store(value) => Some(value.clone()),
            PendingOp::Erase => None,
        })
    }

    /// Latest queued intent for every key the queue knows about
    pub fn overlay(&self) -> HashMap<Bytes, bool> {
        let mut overlay = HashMap::with_capacity(self.pending.len() + 1);
        if let Some(d) = &self.draining {
            overlay.insert(d.key.clone(), matches!(d.op, PendingOp::Store(_)));
        }
        for (key, entry) in &self.pending {
            overlay.insert(key.clone(), matches!(entry.op, PendingOp::Store(_)));
        }
        overlay
    }

    /// Queue `op`; replaces a pending op for the same key in place
    pub fn enqueue(&mut self, key: Bytes, op: PendingOp, size: u64) {
        match self.pending.get_mut(&key) {
            Some(entry) => {
                self.bytes_in_flight = self.bytes_in_flight - entry.size + size;
                entry.op = op;
                entry.size = size;
            }
            None => {
                self.bytes_in_flight += size;
                self.order.push_back(key.clone());
                self.pending.insert(key, PendingEntry { op, size });
            }
        }
    }

    /// Hand the oldest pending entry to the worker
    pub fn pop(&mut self) -> Option<Draining> {
        while let Some(key) = self.order.pop_front() {
            if let Some(entry) = self.pending.remove(&key) {
                self.draining = Some(Draining {
                    key: key.clone(),
                    op: entry.op.clone(),
                    size: entry.size,
                });
                return Some(Draining {
                    key,
                    op: entry.op,
                    size: entry.size,
                });
            }
        }
        None
    }

    /// The draining entry is done (applied or given up on)
    pub fn finish_drain(&mut self) {
        if let Some(d) = self.draining.take() {
            self.bytes_in_flight -= d.size;
        }
    }

    /// Drop every pending and draining entry, returning how many were
    /// dropped. Only for a worker that can no longer drain them.
    pub fn abandon(&mut self) -> usize {
        let dropped = self.pending.len() + usize::from(self.draining.is_some());
        self.pending.clear();
        self.order.clear();
        self.draining = None;
        self.bytes_in_flight = 0;
        dropped
    }

    pub fn begin_write_through(&mut self, key: Bytes) {
        self.write_through.insert(key);
    }

    pub fn end_write_through(&mut self, key: &[u8]) {
        self.write_through.remove(key);
    }
}
