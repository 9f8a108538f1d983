//! The in-memory needle index and its `NNNN.idx` sidecar format.
//!
//! The sidecar is a flat sequence of 32-byte little-endian records
//! `{cookie, offset, size, timestamp}`, appended in write order. On open it
//! lets the engine skip the forward scan of the volume; if it is missing or
//! does not cover the whole volume it is considered stale and rebuilt.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

/// Size in bytes of one sidecar index record.
pub const INDEX_RECORD_SIZE: usize = 32;

/// One needle's entry in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// The needle cookie (CRC32 of the content fingerprint).
    pub cookie: u64,
    /// Byte offset of the needle header within the volume.
    pub offset: u64,
    /// Payload length in bytes.
    pub size: u64,
    /// Unix-epoch seconds at append time.
    pub timestamp: u64,
}

impl IndexEntry {
    /// Encode the entry into its 32-byte sidecar form.
    #[must_use]
    pub fn encode(&self) -> [u8; INDEX_RECORD_SIZE] {
        let mut buf = [0u8; INDEX_RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.cookie.to_le_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.size.to_le_bytes());
        buf[24..32].copy_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    /// Decode an entry from its 32-byte sidecar form.
    #[must_use]
    pub fn decode(buf: &[u8; INDEX_RECORD_SIZE]) -> Self {
        Self {
            cookie: u64::from_le_bytes(buf[0..8].try_into().unwrap_or_default()),
            offset: u64::from_le_bytes(buf[8..16].try_into().unwrap_or_default()),
            size: u64::from_le_bytes(buf[16..24].try_into().unwrap_or_default()),
            timestamp: u64::from_le_bytes(buf[24..32].try_into().unwrap_or_default()),
        }
    }
}

// ---------------------------------------------------------------------------
// NeedleIndex
// ---------------------------------------------------------------------------

/// In-memory needle index for one volume: offset to entry, plus logical
/// tombstones for deleted needles.
///
/// Tombstoned entries stay in the map (their bytes are still on disk until
/// offline compaction) but are invisible to readers.
#[derive(Debug, Default)]
pub struct NeedleIndex {
    entries: HashMap<u64, IndexEntry>,
    tombstones: std::collections::HashSet<u64>,
}

impl NeedleIndex {
    /// Build an index from recovered entries.
    #[must_use]
    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let entries = entries.into_iter().map(|e| (e.offset, e)).collect();
        Self {
            entries,
            tombstones: std::collections::HashSet::new(),
        }
    }

    /// Record a newly appended needle.
    pub fn insert(&mut self, entry: IndexEntry) {
        self.entries.insert(entry.offset, entry);
    }

    /// Look up a live (non-tombstoned) needle by offset.
    #[must_use]
    pub fn get(&self, offset: u64) -> Option<&IndexEntry> {
        if self.tombstones.contains(&offset) {
            return None;
        }
        self.entries.get(&offset)
    }

    /// Logically delete the needle at `offset`. Returns whether a live
    /// needle existed there.
    pub fn tombstone(&mut self, offset: u64) -> bool {
        if self.entries.contains_key(&offset) {
            self.tombstones.insert(offset)
        } else {
            false
        }
    }

    /// Number of needles ever indexed (live + tombstoned).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no needles at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of live (non-tombstoned) needles.
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.entries.len() - self.tombstones.len()
    }

    /// Sum of on-disk bytes covered by indexed needles (headers, payloads,
    /// trailers), regardless of tombstone state.
    #[must_use]
    pub fn covered_bytes(&self) -> u64 {
        self.entries
            .values()
            .map(|e| crate::needle::needle_len(e.size))
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Sidecar I/O
// ---------------------------------------------------------------------------

/// Read all records from a sidecar index file.
///
/// A trailing partial record (torn by a crash mid-append) is ignored.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub fn read_sidecar(path: &Path) -> std::io::Result<Vec<IndexEntry>> {
    let mut file = File::open(path)?;
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;

    let complete = raw.len() / INDEX_RECORD_SIZE;
    let mut entries = Vec::with_capacity(complete);
    for chunk in raw.chunks_exact(INDEX_RECORD_SIZE) {
        let buf: [u8; INDEX_RECORD_SIZE] = chunk.try_into().unwrap_or_default();
        entries.push(IndexEntry::decode(&buf));
    }
    if raw.len() % INDEX_RECORD_SIZE != 0 {
        debug!(
            path = %path.display(),
            trailing = raw.len() % INDEX_RECORD_SIZE,
            "ignoring torn sidecar tail"
        );
    }
    Ok(entries)
}

/// Append one record to a sidecar index writer.
///
/// # Errors
///
/// Returns an I/O error if the write fails.
pub fn append_sidecar(writer: &mut impl Write, entry: &IndexEntry) -> std::io::Result<()> {
    writer.write_all(&entry.encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn entry(offset: u64, size: u64) -> IndexEntry {
        IndexEntry {
            cookie: 7,
            offset,
            size,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_should_roundtrip_index_record() {
        let e = entry(4096, 123);
        assert_eq!(IndexEntry::decode(&e.encode()), e);
    }

    #[test]
    fn test_should_hide_tombstoned_entries() {
        let mut index = NeedleIndex::default();
        index.insert(entry(0, 10));
        index.insert(entry(38, 20));
        assert_eq!(index.live_len(), 2);

        assert!(index.tombstone(0));
        assert!(index.get(0).is_none());
        assert!(index.get(38).is_some());
        assert_eq!(index.live_len(), 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_should_not_tombstone_unknown_offset() {
        let mut index = NeedleIndex::default();
        assert!(!index.tombstone(999));
    }

    #[test]
    fn test_should_sum_covered_bytes() {
        let mut index = NeedleIndex::default();
        index.insert(entry(0, 10));
        index.insert(entry(38, 0));
        // 28 + 10 for the first needle, 28 for the empty one.
        assert_eq!(index.covered_bytes(), 66);
    }

    #[test]
    fn test_should_read_sidecar_and_ignore_torn_tail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("0001.idx");

        let mut file = File::create(&path).expect("create sidecar");
        append_sidecar(&mut file, &entry(0, 10)).expect("append");
        append_sidecar(&mut file, &entry(38, 20)).expect("append");
        // Torn tail: half a record.
        file.write_all(&[0u8; 16]).expect("write torn tail");
        drop(file);

        let entries = read_sidecar(&path).expect("read sidecar");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[1].offset, 38);
    }
}
