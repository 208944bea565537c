//! Segment
//!
//! One memory-mapped region: a fixed header followed by an append-only run of
//! records. File-backed segments live in `segment_NNNNNN.seg`; anonymous
//! segments use the same layout in process memory.
//!
//! ## Layout
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ Header (32 bytes, bincode)                                │
//! │   Magic: "GSEG" (4) | Version: u16 | Id: u32 | Capacity   │
//! ├───────────────────────────────────────────────────────────┤
//! │ Records                                                   │
//! │   [State: u8][KeyLen: u32][ValLen: u32][CRC32: u32]       │
//! │   [Key][Value]                                            │
//! │   ... repeated ...                                        │
//! │   State 0 (or end of segment) terminates the run          │
//! └───────────────────────────────────────────────────────────┘
//! ```

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes identifying a gridstore segment
pub(crate) const MAGIC: [u8; 4] = *b"GSEG";

/// Current segment format version
pub(crate) const VERSION: u16 = 1;

/// Bytes reserved for the segment header
pub(crate) const HEADER_SIZE: u64 = 32;

/// State (1) + KeyLen (4) + ValLen (4) + CRC32 (4)
pub(crate) const RECORD_HEADER_SIZE: u64 = 13;

pub(crate) const STATE_END: u8 = 0;
pub(crate) const STATE_LIVE: u8 = 1;
pub(crate) const STATE_DEAD: u8 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct SegmentHeader {
    magic: [u8; 4],
    version: u16,
    id: u32,
    capacity: u64,
}

/// Decoded record header
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    pub state: u8,
    pub key_len: u32,
    pub value_len: u32,
    pub crc: u32,
}

impl RecordHeader {
    /// Total bytes occupied by the record
    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_SIZE + self.key_len as u64 + self.value_len as u64
    }
}

/// Total bytes a record for this key/value pair occupies
pub(crate) fn record_len(key: &[u8], value: &[u8]) -> u64 {
    RECORD_HEADER_SIZE + key.len() as u64 + value.len() as u64
}

fn read_u32(buf: &[u8], pos: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[pos..pos + 4]);
    u32::from_le_bytes(bytes)
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

// =============================================================================
// Segment
// =============================================================================

/// A mapped region holding records
pub(crate) struct Segment {
    id: u32,
    map: MmapMut,
    /// Backing file; `None` for anonymous segments
    path: Option<PathBuf>,
    /// Offset of the first unused byte
    write_pos: u64,
    /// Bytes held by dead records (reclaimable by compaction)
    dead_bytes: u64,
}

impl Segment {
    /// Create (or truncate) a file-backed segment of `capacity` bytes
    ///
    /// Disk space is reserved up front so a full disk fails here rather than
    /// on a later write through the mapping.
    pub fn create_file(path: &Path, id: u32, capacity: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.allocate(capacity)?;
        file.set_len(capacity)?;

        // SAFETY: the file was just created by this store and is mapped only
        // here; nothing else truncates it while the mapping is alive.
        let map = unsafe { MmapOptions::new().map_mut(&file)? };

        let mut segment = Self {
            id,
            map,
            path: Some(path.to_path_buf()),
            write_pos: HEADER_SIZE,
            dead_bytes: 0,
        };
        segment.write_header()?;
        segment.map.flush_range(0, HEADER_SIZE as usize)?;
        Ok(segment)
    }

    /// Create an anonymous (process-local) segment
    pub fn create_anonymous(id: u32, capacity: u64) -> io::Result<Self> {
        let map = MmapOptions::new().len(capacity as usize).map_anon()?;
        let mut segment = Self {
            id,
            map,
            path: None,
            write_pos: HEADER_SIZE,
            dead_bytes: 0,
        };
        segment.write_header()?;
        Ok(segment)
    }

    /// Map an existing segment file and validate its header
    ///
    /// Call [`Segment::scan`] afterwards to find the live records.
    pub fn open_file(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE {
            return Err(invalid_data(format!(
                "segment {} is too short ({} bytes)",
                path.display(),
                file_len
            )));
        }

        // SAFETY: segment files are private to the owning store directory.
        let map = unsafe { MmapOptions::new().map_mut(&file)? };

        let header: SegmentHeader = bincode::deserialize(&map[..HEADER_SIZE as usize])
            .map_err(|e| invalid_data(format!("bad segment header in {}: {}", path.display(), e)))?;

        if header.magic != MAGIC {
            return Err(invalid_data(format!(
                "invalid segment magic in {}: {:?}",
                path.display(),
                header.magic
            )));
        }
        if header.version != VERSION {
            return Err(invalid_data(format!(
                "unsupported segment version {} in {}",
                header.version,
                path.display()
            )));
        }
        if header.capacity != file_len {
            return Err(invalid_data(format!(
                "segment {} capacity mismatch: header says {}, file has {}",
                path.display(),
                header.capacity,
                file_len
            )));
        }

        Ok(Self {
            id: header.id,
            map,
            path: Some(path.to_path_buf()),
            write_pos: HEADER_SIZE,
            dead_bytes: 0,
        })
    }

    fn write_header(&mut self) -> io::Result<()> {
        let header = SegmentHeader {
            magic: MAGIC,
            version: VERSION,
            id: self.id,
            capacity: self.capacity(),
        };
        let bytes = bincode::serialize(&header)
            .map_err(|e| invalid_data(format!("segment header encoding failed: {}", e)))?;
        self.map[..bytes.len()].copy_from_slice(&bytes);
        if self.map.len() > HEADER_SIZE as usize {
            self.map[HEADER_SIZE as usize] = STATE_END;
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> u64 {
        self.map.len() as u64
    }

    /// Bytes still available at the tail
    pub fn free(&self) -> u64 {
        self.capacity() - self.write_pos
    }

    pub fn dead_bytes(&self) -> u64 {
        self.dead_bytes
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Decode the record header at `offset`, if one fits there
    pub fn header_at(&self, offset: u64) -> Option<RecordHeader> {
        let pos = offset as usize;
        if offset + RECORD_HEADER_SIZE > self.capacity() {
            return None;
        }
        Some(RecordHeader {
            state: self.map[pos],
            key_len: read_u32(&self.map, pos + 1),
            value_len: read_u32(&self.map, pos + 5),
            crc: read_u32(&self.map, pos + 9),
        })
    }

    fn key_and_value(&self, offset: u64, header: &RecordHeader) -> (&[u8], &[u8]) {
        let key_start = (offset + RECORD_HEADER_SIZE) as usize;
        let value_start = key_start + header.key_len as usize;
        let value_end = value_start + header.value_len as usize;
        (
            &self.map[key_start..value_start],
            &self.map[value_start..value_end],
        )
    }

    /// Value bytes of the live record at `offset`
    pub fn value_at(&self, offset: u64) -> io::Result<&[u8]> {
        let header = self
            .header_at(offset)
            .filter(|h| h.state == STATE_LIVE && offset + h.record_len() <= self.write_pos)
            .ok_or_else(|| {
                invalid_data(format!(
                    "segment {}: no live record at offset {}",
                    self.id, offset
                ))
            })?;
        Ok(self.key_and_value(offset, &header).1)
    }

    /// Append a record; the caller has checked `free() >= record_len(..)`
    ///
    /// Returns the record's offset.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> u64 {
        let offset = self.write_pos;
        let pos = offset as usize;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(key);
        hasher.update(value);
        let crc = hasher.finalize();

        let key_start = pos + RECORD_HEADER_SIZE as usize;
        let value_start = key_start + key.len();
        let end = value_start + value.len();

        self.map[pos + 1..pos + 5].copy_from_slice(&(key.len() as u32).to_le_bytes());
        self.map[pos + 5..pos + 9].copy_from_slice(&(value.len() as u32).to_le_bytes());
        self.map[pos + 9..pos + 13].copy_from_slice(&crc.to_le_bytes());
        self.map[key_start..value_start].copy_from_slice(key);
        self.map[value_start..end].copy_from_slice(value);
        if end < self.map.len() {
            self.map[end] = STATE_END;
        }
        // Publish the record last
        self.map[pos] = STATE_LIVE;

        self.write_pos = end as u64;
        offset
    }

    /// Flip the record at `offset` to dead
    pub fn mark_dead(&mut self, offset: u64) {
        if let Some(header) = self.header_at(offset) {
            if header.state == STATE_LIVE {
                self.map[offset as usize] = STATE_DEAD;
                self.dead_bytes += header.record_len();
            }
        }
    }

    /// Walk the record run after opening, returning `(offset, key)` for every
    /// live record with a valid checksum.
    ///
    /// A torn record ends the run; a live record with a bad checksum is
    /// marked dead.
    pub fn scan(&mut self) -> Vec<(u64, Vec<u8>)> {
        let capacity = self.capacity();
        let mut live = Vec::new();
        let mut pos = HEADER_SIZE;
        self.dead_bytes = 0;

        while let Some(header) = self.header_at(pos) {
            if header.state == STATE_END {
                break;
            }

            let len = header.record_len();
            if header.state > STATE_DEAD || pos + len > capacity {
                tracing::warn!(
                    "segment {}: torn record at offset {}, truncating run",
                    self.id,
                    pos
                );
                self.map[pos as usize] = STATE_END;
                break;
            }

            if header.state == STATE_LIVE {
                let (key, value) = self.key_and_value(pos, &header);
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(key);
                hasher.update(value);

                if hasher.finalize() == header.crc {
                    live.push((pos, key.to_vec()));
                } else {
                    tracing::warn!(
                        "segment {}: checksum mismatch at offset {}, discarding record",
                        self.id,
                        pos
                    );
                    self.map[pos as usize] = STATE_DEAD;
                    self.dead_bytes += len;
                }
            } else {
                self.dead_bytes += len;
            }

            pos += len;
        }

        self.write_pos = pos;
        live
    }

    /// Slide live records down over dead ones.
    ///
    /// `moved(key, old_offset, new_offset)` is called for every relocated
    /// record. Returns the number of bytes reclaimed.
    pub fn compact(&mut self, mut moved: impl FnMut(&[u8], u64, u64)) -> u64 {
        let mut read = HEADER_SIZE;
        let mut write = HEADER_SIZE;

        while read < self.write_pos {
            let Some(header) = self.header_at(read) else {
                break;
            };
            let len = header.record_len();

            if header.state == STATE_LIVE {
                if read != write {
                    self.map
                        .copy_within(read as usize..(read + len) as usize, write as usize);
                    let key_start = (write + RECORD_HEADER_SIZE) as usize;
                    let key = &self.map[key_start..key_start + header.key_len as usize];
                    moved(key, read, write);
                }
                write += len;
            }
            read += len;
        }

        let reclaimed = self.write_pos - write;
        self.write_pos = write;
        if write < self.capacity() {
            self.map[write as usize] = STATE_END;
        }
        self.dead_bytes = 0;
        reclaimed
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.write_pos = HEADER_SIZE;
        self.dead_bytes = 0;
        if self.map.len() > HEADER_SIZE as usize {
            self.map[HEADER_SIZE as usize] = STATE_END;
        }
    }

    /// Write dirty pages of a file-backed segment to disk
    pub fn flush(&self) -> io::Result<()> {
        if self.path.is_some() {
            self.map.flush()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("capacity", &self.capacity())
            .field("write_pos", &self.write_pos)
            .field("dead_bytes", &self.dead_bytes)
            .finish()
    }
}
