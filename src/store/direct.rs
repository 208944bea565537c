//! Direct Memory Manager
//!
//! Stores backed by anonymous mappings. Nothing survives the process.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::RealizeResult;

use super::region::{Backing, SegmentStore};
use super::{BinaryStore, BinaryStoreManager};

/// Manager for process-local, non-persistent stores
#[derive(Debug)]
pub struct DirectMemoryManager {
    initial: u64,
    maximum: u64,
    next_store: AtomicU32,
}

impl DirectMemoryManager {
    /// Sizes must already be clamped (see [`crate::bounds::clamp`])
    pub fn new(initial: u64, maximum: u64) -> Self {
        tracing::info!(
            "direct memory manager (initial {} bytes, maximum {} bytes)",
            initial,
            maximum
        );
        Self {
            initial,
            maximum,
            next_store: AtomicU32::new(0),
        }
    }

    pub fn open_store(&self) -> RealizeResult<SegmentStore> {
        let n = self.next_store.fetch_add(1, Ordering::SeqCst);
        let store = SegmentStore::open(
            format!("direct:{}", n),
            Backing::Anonymous,
            self.initial,
            self.maximum,
            None,
        )?;
        Ok(store)
    }
}

impl BinaryStoreManager for DirectMemoryManager {
    fn create_store(&self) -> RealizeResult<Box<dyn BinaryStore>> {
        Ok(Box::new(self.open_store()?))
    }

    fn kind(&self) -> &'static str {
        "direct"
    }
}
