//! Segment Store
//!
//! A [`BinaryStore`] over a bounded set of memory-mapped segments, shared by
//! the mapped-file and direct-memory backends.
//!
//! ## Responsibilities
//! - Discover and recover existing segment files on open
//! - Grow by adding segments (doubling) until `maximum` bytes are mapped
//! - Reclaim dead records by compaction before reporting `CapacityExceeded`
//! - Keep a key → (segment, offset) index in RAM
//!
//! ## Concurrency
//! - One `RwLock` over index and segments
//! - `load` / `keys` take the read lock; mutations take the write lock

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tempfile::TempDir;

use crate::error::{StoreError, StoreResult};

use super::segment::{self, Segment, HEADER_SIZE, RECORD_HEADER_SIZE};
use super::{BinaryStore, Keys};

/// Segments are never smaller than this (unless `maximum` is)
const MIN_SEGMENT_SIZE: u64 = 1024;

/// Segment capacities are rounded up to this multiple
const SEGMENT_ALIGNMENT: u64 = 1024;

/// Where segments come from
#[derive(Debug, Clone)]
pub(crate) enum Backing {
    /// Segment files under a store directory
    Files { dir: PathBuf },
    /// Anonymous process memory
    Anonymous,
}

#[derive(Debug, Clone, Copy)]
struct Location {
    segment: usize,
    offset: u64,
}

struct Inner {
    segments: Vec<Segment>,
    index: HashMap<Bytes, Location>,
    next_segment_id: u32,
    closed: bool,
}

/// Bounded store over memory-mapped segments
pub struct SegmentStore {
    name: String,
    backing: Backing,
    initial: u64,
    maximum: u64,
    inner: RwLock<Inner>,
    /// Keeps a private temp directory alive for as long as the store is
    _temp: Option<Arc<TempDir>>,
}

impl SegmentStore {
    /// Open (or create) a store.
    ///
    /// File-backed stores recover any segments already present in the
    /// directory. The first segment is mapped eagerly so that mapping and
    /// disk-space failures surface here.
    pub(crate) fn open(
        name: String,
        backing: Backing,
        initial: u64,
        maximum: u64,
        temp: Option<Arc<TempDir>>,
    ) -> io::Result<Self> {
        let mut inner = Inner {
            segments: Vec::new(),
            index: HashMap::new(),
            next_segment_id: 1,
            closed: false,
        };

        if let Backing::Files { dir } = &backing {
            fs::create_dir_all(dir)?;
            inner.recover(dir)?;
        }

        let store = Self {
            name,
            backing,
            initial,
            maximum,
            inner: RwLock::new(inner),
            _temp: temp,
        };

        {
            let mut inner = store.inner.write();
            if inner.segments.is_empty() {
                if let Some(capacity) = store.next_segment_capacity(&inner, 0) {
                    store.add_segment(&mut inner, capacity)?;
                }
            }

            tracing::debug!(
                "{}: opened with {} segments, {} entries, {} bytes mapped (max {})",
                store.name,
                inner.segments.len(),
                inner.index.len(),
                inner.mapped_bytes(),
                store.maximum
            );
        }

        Ok(store)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Store name used in log messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the segment files, if file-backed
    pub fn directory(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Files { dir } => Some(dir),
            Backing::Anonymous => None,
        }
    }

    /// Number of live entries
    pub fn entry_count(&self) -> usize {
        self.inner.read().index.len()
    }

    /// Number of mapped segments
    pub fn segment_count(&self) -> usize {
        self.inner.read().segments.len()
    }

    /// Total bytes currently mapped (never above the configured maximum)
    pub fn mapped_bytes(&self) -> u64 {
        self.inner.read().mapped_bytes()
    }

    /// Configured maximum size in bytes
    pub fn maximum_size(&self) -> u64 {
        self.maximum
    }

    /// Configured initial size in bytes
    pub fn initial_size(&self) -> u64 {
        self.initial
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Capacity for the next segment, or `None` if it would exceed `maximum`
    fn next_segment_capacity(&self, inner: &Inner, record_len: u64) -> Option<u64> {
        let remaining = self.maximum.saturating_sub(inner.mapped_bytes());
        let needed = HEADER_SIZE + record_len.max(RECORD_HEADER_SIZE);

        let doubled = match inner.segments.last() {
            Some(last) => last.capacity().saturating_mul(2),
            None => self.initial,
        };
        let wanted = doubled
            .max(needed)
            .max(MIN_SEGMENT_SIZE)
            .next_multiple_of(SEGMENT_ALIGNMENT);

        let capacity = wanted.min(remaining);
        (capacity >= needed).then_some(capacity)
    }

    fn add_segment(&self, inner: &mut Inner, capacity: u64) -> io::Result<usize> {
        let id = inner.next_segment_id;
        let segment = match &self.backing {
            Backing::Files { dir } => Segment::create_file(&segment_path(dir, id), id, capacity)?,
            Backing::Anonymous => Segment::create_anonymous(id, capacity)?,
        };

        tracing::debug!("{}: added segment {} ({} bytes)", self.name, id, capacity);

        inner.next_segment_id += 1;
        inner.segments.push(segment);
        Ok(inner.segments.len() - 1)
    }

    /// Find a segment with room for `record_len` bytes, growing or
    /// compacting as needed
    fn allocate(&self, inner: &mut Inner, record_len: u64) -> StoreResult<usize> {
        if let Some(slot) = inner.segment_with_room(record_len) {
            return Ok(slot);
        }

        if let Some(capacity) = self.next_segment_capacity(inner, record_len) {
            return Ok(self.add_segment(inner, capacity)?);
        }

        let reclaimed = inner.compact();
        if reclaimed > 0 {
            tracing::debug!("{}: compaction reclaimed {} bytes", self.name, reclaimed);
            if let Some(slot) = inner.segment_with_room(record_len) {
                return Ok(slot);
            }
        }

        Err(StoreError::CapacityExceeded {
            required: record_len,
            available: inner.largest_free(),
        })
    }

    /// Allocate for an overwrite of `key` whose old record counts as free
    /// space.
    ///
    /// The old record is dropped from the index and marked dead before
    /// retrying. If the new record still does not fit, the old value is
    /// appended again (its space was just reclaimed) and the error returned.
    fn allocate_replacing(&self, inner: &mut Inner, key: &[u8], record_len: u64) -> StoreResult<usize> {
        let Some(previous) = inner.index.remove(key) else {
            return self.allocate(inner, record_len);
        };
        let old_value = Bytes::copy_from_slice(inner.segments[previous.segment].value_at(previous.offset)?);
        inner.segments[previous.segment].mark_dead(previous.offset);

        match self.allocate(inner, record_len) {
            Ok(slot) => Ok(slot),
            Err(e) => {
                match inner.segment_with_room(segment::record_len(key, &old_value)) {
                    Some(slot) => {
                        let offset = inner.segments[slot].append(key, &old_value);
                        inner
                            .index
                            .insert(Bytes::copy_from_slice(key), Location { segment: slot, offset });
                    }
                    None => tracing::error!(
                        "{}: lost previous value of a key after a failed overwrite",
                        self.name
                    ),
                }
                Err(e)
            }
        }
    }
}

impl Inner {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn mapped_bytes(&self) -> u64 {
        self.segments.iter().map(Segment::capacity).sum()
    }

    fn largest_free(&self) -> u64 {
        self.segments.iter().map(Segment::free).max().unwrap_or(0)
    }

    /// Newest segment first, then older ones
    fn segment_with_room(&self, record_len: u64) -> Option<usize> {
        (0..self.segments.len())
            .rev()
            .find(|&slot| self.segments[slot].free() >= record_len)
    }

    fn compact(&mut self) -> u64 {
        let Inner {
            segments, index, ..
        } = self;

        let mut reclaimed = 0;
        for (slot, segment) in segments.iter_mut().enumerate() {
            if segment.dead_bytes() == 0 {
                continue;
            }
            reclaimed += segment.compact(|key, old, new| {
                if let Some(location) = index.get_mut(key) {
                    if location.segment == slot && location.offset == old {
                        location.offset = new;
                    }
                }
            });
        }
        reclaimed
    }

    /// Map existing segment files (ascending id) and rebuild the index
    fn recover(&mut self, dir: &Path) -> io::Result<()> {
        let mut ids: Vec<u32> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                if let Some(id) = parse_segment_id(&path) {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();

        for id in ids {
            let mut segment = Segment::open_file(&segment_path(dir, id))?;
            let live = segment.scan();
            self.next_segment_id = self.next_segment_id.max(segment.id() + 1);
            self.segments.push(segment);
            let slot = self.segments.len() - 1;

            for (offset, key) in live {
                let location = Location {
                    segment: slot,
                    offset,
                };
                // A later record for the same key supersedes an earlier one
                if let Some(previous) = self.index.insert(Bytes::from(key), location) {
                    self.segments[previous.segment].mark_dead(previous.offset);
                }
            }
        }

        if !self.segments.is_empty() {
            tracing::info!(
                "recovered {} segments with {} entries from {}",
                self.segments.len(),
                self.index.len(),
                dir.display()
            );
        }
        Ok(())
    }
}

impl BinaryStore for SegmentStore {
    fn load(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        let inner = self.inner.read();
        inner.ensure_open()?;

        match inner.index.get(key) {
            Some(location) => {
                let value = inner.segments[location.segment].value_at(location.offset)?;
                Ok(Some(Bytes::copy_from_slice(value)))
            }
            None => Ok(None),
        }
    }

    fn store(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let record_len = segment::record_len(key, value);
        let largest_possible = self.maximum.saturating_sub(HEADER_SIZE);
        if record_len > largest_possible {
            return Err(StoreError::CapacityExceeded {
                required: record_len,
                available: largest_possible,
            });
        }

        let mut inner = self.inner.write();
        inner.ensure_open()?;

        let slot = match self.allocate(&mut inner, record_len) {
            Ok(slot) => slot,
            Err(StoreError::CapacityExceeded { .. }) if inner.index.contains_key(key) => {
                self.allocate_replacing(&mut inner, key, record_len)?
            }
            Err(e) => return Err(e),
        };
        let offset = inner.segments[slot].append(key, value);

        let location = Location {
            segment: slot,
            offset,
        };
        if let Some(previous) = inner.index.insert(Bytes::copy_from_slice(key), location) {
            inner.segments[previous.segment].mark_dead(previous.offset);
        }
        Ok(())
    }

    fn erase(&self, key: &[u8]) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        if let Some(location) = inner.index.remove(key) {
            inner.segments[location.segment].mark_dead(location.offset);
        }
        Ok(())
    }

    fn erase_all(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        inner.index.clear();
        for segment in inner.segments.iter_mut() {
            segment.clear();
        }
        Ok(())
    }

    fn keys(&self) -> StoreResult<Keys> {
        let inner = self.inner.read();
        inner.ensure_open()?;

        let keys: Vec<Bytes> = inner.index.keys().cloned().collect();
        Ok(Box::new(keys.into_iter()))
    }

    fn close(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;

        let mut result = Ok(());
        for segment in &inner.segments {
            if let Err(e) = segment.flush() {
                tracing::warn!("{}: flush of segment {} failed: {}", self.name, segment.id(), e);
                result = Err(StoreError::Io(e));
            }
        }
        inner.segments.clear();
        inner.index.clear();

        tracing::debug!("{}: closed", self.name);
        result
    }

    fn destroy(&self) -> StoreResult<()> {
        let closed = self.close();

        if let Backing::Files { dir } = &self.backing {
            match fs::remove_dir_all(dir) {
                Ok(()) => tracing::debug!("{}: removed {}", self.name, dir.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        closed
    }
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("name", &self.name)
            .field("backing", &self.backing)
            .field("initial", &self.initial)
            .field("maximum", &self.maximum)
            .finish()
    }
}

/// "segment_000042.seg" for id 42
fn segment_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("segment_{:06}.seg", id))
}

/// "segment_000042.seg" → Some(42)
fn parse_segment_id(path: &Path) -> Option<u32> {
    if path.extension()? != "seg" {
        return None;
    }
    let name = path.file_stem()?.to_string_lossy();
    name.strip_prefix("segment_")?.parse().ok()
}
