//! Store Module
//!
//! The binary store contract and its built-in backends.
//!
//! ## Responsibilities
//! - [`BinaryStore`]: load/store/erase/iterate over opaque byte keys and values
//! - [`BinaryStoreManager`]: creates and destroys stores of one backend kind
//!
//! ## Backends
//! ```text
//! ┌──────────────────┬───────────────────────────┬───────────────┐
//! │ Manager          │ Region                    │ Survives exit │
//! ├──────────────────┼───────────────────────────┼───────────────┤
//! │ MappedFile       │ mmap'd segment files      │ yes           │
//! │ DirectMemory     │ anonymous mmap segments   │ no            │
//! │ Embedded         │ redb table                │ named only    │
//! └──────────────────┴───────────────────────────┴───────────────┘
//! ```

mod segment;
mod region;
mod mapped;
mod direct;
mod embedded;

use bytes::Bytes;

use crate::error::{RealizeResult, StoreResult};

pub use direct::DirectMemoryManager;
pub use embedded::{EmbeddedManager, EngineDurability, EngineSettings, MISSING_ENGINE_HINT};
#[cfg(feature = "embedded")]
pub use embedded::EmbeddedStore;
pub use mapped::MappedFileManager;
pub use region::SegmentStore;

/// Finite key sequence; call `keys()` again to restart
pub type Keys = Box<dyn Iterator<Item = Bytes> + Send>;

/// A key/value store over opaque byte sequences
///
/// Implementations are shared across cache worker threads and must be safe
/// for concurrent use on different keys.
pub trait BinaryStore: Send + Sync {
    /// Value currently associated with `key`, if any
    fn load(&self, key: &[u8]) -> StoreResult<Option<Bytes>>;

    /// Associate `value` with `key`, replacing any previous value
    fn store(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Remove `key`; erasing an absent key is not an error
    fn erase(&self, key: &[u8]) -> StoreResult<()>;

    /// Remove every key
    fn erase_all(&self) -> StoreResult<()>;

    /// Snapshot of the keys currently present
    fn keys(&self) -> StoreResult<Keys>;

    /// Release resources; later operations fail with `StoreError::Closed`
    fn close(&self) -> StoreResult<()>;

    /// Close and discard the store's data
    fn destroy(&self) -> StoreResult<()> {
        self.close()
    }
}

/// Factory for the stores of one storage tier
pub trait BinaryStoreManager: Send + Sync {
    /// Create a new store
    fn create_store(&self) -> RealizeResult<Box<dyn BinaryStore>>;

    /// Destroy a store previously created by this manager
    fn destroy_store(&self, store: Box<dyn BinaryStore>) -> StoreResult<()> {
        store.destroy()
    }

    /// Short backend name (for logging)
    fn kind(&self) -> &'static str;
}
