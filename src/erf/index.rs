//! Side-car timestamp index for ERF traces.
//!
//! An index lives next to its trace as `<trace-path>.idx` and holds one
//! 16-byte entry per record:
//!
//! ```text
//! +--------------------------+--------------------------+
//! | timestamp (u64, LE 32.32)| offset (u64, LE)         |
//! +--------------------------+--------------------------+
//! ```
//!
//! Entries are in trace order, so both fields increase monotonically. The
//! index is memory-mapped and searched in place.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::packet::Packet;

use super::input::ErfInput;

/// Size of one index entry.
pub const INDEX_ENTRY_LEN: usize = 16;

/// Extension appended to the trace path.
pub const INDEX_SUFFIX: &str = ".idx";

/// One `(timestamp, offset)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub timestamp: u64,
    pub offset: u64,
}

impl IndexEntry {
    pub fn decode(data: &[u8; INDEX_ENTRY_LEN]) -> Self {
        let mut ts = [0u8; 8];
        let mut offset = [0u8; 8];
        ts.copy_from_slice(&data[..8]);
        offset.copy_from_slice(&data[8..]);
        Self {
            timestamp: u64::from_le_bytes(ts),
            offset: u64::from_le_bytes(offset),
        }
    }

    pub fn encode(&self) -> [u8; INDEX_ENTRY_LEN] {
        let mut out = [0u8; INDEX_ENTRY_LEN];
        out[..8].copy_from_slice(&self.timestamp.to_le_bytes());
        out[8..].copy_from_slice(&self.offset.to_le_bytes());
        out
    }
}

/// Path of the index belonging to `trace`.
pub fn index_path(trace: &Path) -> PathBuf {
    let mut name = OsString::from(trace.as_os_str());
    name.push(INDEX_SUFFIX);
    PathBuf::from(name)
}

/// Memory-mapped, read-only index.
pub struct SeekIndex {
    path: PathBuf,
    mmap: Mmap,
    entries: usize,
}

impl SeekIndex {
    /// Open the index for `trace`.
    ///
    /// Returns `Ok(None)` when there is no index or it holds no entries.
    pub fn open(trace: &Path) -> Result<Option<Self>> {
        let path = index_path(trace);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::file(path, e)),
        };

        let size = file.metadata().map_err(|e| Error::file(&path, e))?.len() as usize;
        if size < INDEX_ENTRY_LEN {
            tracing::debug!("Ignoring empty index {}", path.display());
            return Ok(None);
        }
        if size % INDEX_ENTRY_LEN != 0 {
            tracing::warn!(
                "Index {} has a trailing partial entry, ignoring it",
                path.display()
            );
        }

        let mmap = unsafe { Mmap::map(&file).map_err(|e| Error::file(&path, e))? };

        Ok(Some(Self {
            path,
            mmap,
            entries: size / INDEX_ENTRY_LEN,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of whole entries.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Entry at position `i`; callers keep `i < len()`.
    pub fn entry(&self, i: usize) -> IndexEntry {
        let start = i * INDEX_ENTRY_LEN;
        let mut raw = [0u8; INDEX_ENTRY_LEN];
        raw.copy_from_slice(&self.mmap[start..start + INDEX_ENTRY_LEN]);
        IndexEntry::decode(&raw)
    }

    /// Find where a scan for `target` should start.
    ///
    /// Lower-bound binary search for the first entry at or after `target`.
    /// An exact hit is returned as is, which puts a run of equal timestamps
    /// at its first record. Otherwise the entry just before it is returned,
    /// or the first entry when every entry is later than `target`.
    pub fn locate(&self, target: u64) -> Option<IndexEntry> {
        if self.entries == 0 {
            return None;
        }

        let mut lo = 0usize;
        let mut hi = self.entries;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entry(mid).timestamp < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        let current = if lo < self.entries && self.entry(lo).timestamp == target {
            lo
        } else {
            lo.saturating_sub(1)
        };
        Some(self.entry(current))
    }
}

/// Writes an index alongside a trace.
pub struct IndexWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    entries: usize,
}

impl IndexWriter {
    /// Create (or replace) the index for `trace`.
    pub fn create(trace: &Path) -> Result<Self> {
        let path = index_path(trace);
        let file = File::create(&path).map_err(|e| Error::file(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            entries: 0,
        })
    }

    pub fn append(&mut self, entry: IndexEntry) -> Result<()> {
        self.writer
            .write_all(&entry.encode())
            .map_err(|e| Error::file(&self.path, e))?;
        self.entries += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn finish(mut self) -> Result<usize> {
        self.writer
            .flush()
            .map_err(|e| Error::file(&self.path, e))?;
        Ok(self.entries)
    }
}

/// Build `<trace>.idx` by reading every record of an existing trace.
///
/// Returns the number of entries written.
pub fn build_index(trace: &Path) -> Result<usize> {
    let mut input = ErfInput::open(trace)?;
    let mut writer = IndexWriter::create(trace)?;
    let mut packet = Packet::new();

    loop {
        let offset = input.tell();
        if input.read_packet(&mut packet)?.is_none() {
            break;
        }
        let timestamp = packet.erf_header()?.ts;
        writer.append(IndexEntry { timestamp, offset })?;
    }

    let entries = writer.finish()?;
    tracing::debug!("Indexed {} records of {}", entries, trace.display());
    Ok(entries)
}
