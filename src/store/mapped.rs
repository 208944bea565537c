//! Mapped File Manager
//!
//! Creates [`SegmentStore`]s whose segments are memory-mapped files.
//!
//! ## Layout
//! ```text
//! <directory>/
//!   store-0000/segment_000001.seg
//!   store-0000/segment_000002.seg
//!   store-0001/segment_000001.seg
//! ```
//!
//! Store directories are numbered in creation order, so a manager reopened
//! over the same directory hands out the same stores (with their data) again.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use crate::error::RealizeResult;

use super::region::{Backing, SegmentStore};
use super::{BinaryStore, BinaryStoreManager};

/// Manager for memory-mapped, file-persisted stores
#[derive(Debug)]
pub struct MappedFileManager {
    initial: u64,
    maximum: u64,
    root: PathBuf,
    /// Present when no directory was configured; removed once the manager
    /// and every store it created are dropped
    temp: Option<Arc<TempDir>>,
    next_store: AtomicU32,
}

impl MappedFileManager {
    /// Create a manager over `dir`, or over a private temp directory.
    ///
    /// Sizes must already be clamped (see [`crate::bounds::clamp`]).
    pub fn new(initial: u64, maximum: u64, dir: Option<&Path>) -> RealizeResult<Self> {
        let (root, temp) = match dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                (dir.to_path_buf(), None)
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("gridstore-mapped-")
                    .tempdir()?;
                (temp.path().to_path_buf(), Some(Arc::new(temp)))
            }
        };

        tracing::info!(
            "mapped file manager at {} (initial {} bytes, maximum {} bytes)",
            root.display(),
            initial,
            maximum
        );

        Ok(Self {
            initial,
            maximum,
            root,
            temp,
            next_store: AtomicU32::new(0),
        })
    }

    /// Root directory holding the store directories
    pub fn directory(&self) -> &Path {
        &self.root
    }

    /// Create the next store, keeping its concrete type
    pub fn open_store(&self) -> RealizeResult<SegmentStore> {
        let n = self.next_store.fetch_add(1, Ordering::SeqCst);
        let dir = self.root.join(format!("store-{:04}", n));

        let store = SegmentStore::open(
            format!("mapped:{}", dir.display()),
            Backing::Files { dir },
            self.initial,
            self.maximum,
            self.temp.clone(),
        )?;
        Ok(store)
    }
}

impl BinaryStoreManager for MappedFileManager {
    fn create_store(&self) -> RealizeResult<Box<dyn BinaryStore>> {
        Ok(Box::new(self.open_store()?))
    }

    fn kind(&self) -> &'static str {
        "mapped"
    }
}
