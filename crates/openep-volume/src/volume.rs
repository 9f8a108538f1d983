//! A single packed volume: recovery, positional reads, append bookkeeping.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use openep_core::{EndpointError, EndpointResult, Resource};

use crate::index::{IndexEntry, NeedleIndex, read_sidecar};
use crate::needle::{NEEDLE_HEADER_SIZE, NEEDLE_TRAILER_SIZE, NeedleHeader};

/// One append-only volume file plus its in-memory needle index.
///
/// The held [`File`] is a read-only handle used for positional reads; the
/// engine appends through a separate write handle so readers and the
/// appender never contend on a file cursor.
pub struct Volume {
    id: u64,
    data_path: PathBuf,
    file: File,
    byte_size: AtomicU64,
    sealed: AtomicBool,
    flagged: AtomicBool,
    index: RwLock<NeedleIndex>,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("id", &self.id)
            .field("byte_size", &self.byte_size.load(Ordering::Relaxed))
            .field("sealed", &self.sealed.load(Ordering::Relaxed))
            .field("flagged", &self.flagged.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Volume {
    /// Create a brand-new empty volume file.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Internal`] if the file cannot be created.
    pub fn create(id: u64, data_path: PathBuf) -> EndpointResult<Self> {
        File::create(&data_path).map_err(|e| {
            EndpointError::Internal(anyhow::anyhow!(
                "failed to create volume {}: {e}",
                data_path.display()
            ))
        })?;
        let file = open_read_handle(&data_path)?;
        debug!(volume_id = id, path = %data_path.display(), "created volume");
        Ok(Self {
            id,
            data_path,
            file,
            byte_size: AtomicU64::new(0),
            sealed: AtomicBool::new(false),
            flagged: AtomicBool::new(false),
            index: RwLock::new(NeedleIndex::default()),
        })
    }

    /// Open an existing volume, recovering its needle index.
    ///
    /// If the sidecar index covers the whole data file it is trusted;
    /// otherwise the volume is forward-scanned and, if a torn final needle
    /// is found, truncated back to the last intact needle boundary.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Internal`] on unrecoverable I/O failure.
    pub fn open(id: u64, data_path: PathBuf, idx_path: &Path, sealed: bool) -> EndpointResult<Self> {
        let data_len = std::fs::metadata(&data_path)
            .map_err(|e| {
                EndpointError::Internal(anyhow::anyhow!(
                    "failed to stat volume {}: {e}",
                    data_path.display()
                ))
            })?
            .len();

        let entries = match try_sidecar(idx_path, data_len) {
            Some(entries) => {
                debug!(volume_id = id, count = entries.len(), "loaded sidecar index");
                entries
            }
            None => {
                let (entries, valid_len) = scan_volume(&data_path)?;
                if valid_len < data_len {
                    warn!(
                        volume_id = id,
                        valid_len,
                        data_len,
                        "truncating torn needle tail"
                    );
                    truncate_volume(&data_path, valid_len)?;
                }
                entries
            }
        };

        let byte_size = std::fs::metadata(&data_path)
            .map_err(|e| {
                EndpointError::Internal(anyhow::anyhow!(
                    "failed to stat volume {}: {e}",
                    data_path.display()
                ))
            })?
            .len();
        let file = open_read_handle(&data_path)?;

        Ok(Self {
            id,
            data_path,
            file,
            byte_size: AtomicU64::new(byte_size),
            sealed: AtomicBool::new(sealed),
            flagged: AtomicBool::new(false),
            index: RwLock::new(NeedleIndex::from_entries(entries)),
        })
    }

    /// The volume ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path of the backing data file.
    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Current size of the volume in bytes.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        self.byte_size.load(Ordering::Acquire)
    }

    /// Whether the volume has been sealed (read-only forever).
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Whether the volume has been flagged for offline repair.
    #[must_use]
    pub fn is_flagged(&self) -> bool {
        self.flagged.load(Ordering::Acquire)
    }

    /// Mark the volume sealed.
    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Record an appended needle: advance the size and index it.
    pub(crate) fn record_append(&self, entry: IndexEntry) {
        let total = crate::needle::needle_len(entry.size);
        self.index.write().insert(entry);
        self.byte_size.fetch_add(total, Ordering::AcqRel);
    }

    /// Logically delete the needle at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotFound`] if no live needle starts there.
    pub fn delete_needle(&self, offset: u64) -> EndpointResult<()> {
        if self.index.write().tombstone(offset) {
            debug!(volume_id = self.id, offset, "tombstoned needle");
            Ok(())
        } else {
            Err(EndpointError::not_found(Resource::Blob {
                volume_id: self.id,
                offset,
            }))
        }
    }

    /// Number of live needles in the index.
    #[must_use]
    pub fn live_needles(&self) -> usize {
        self.index.read().live_len()
    }

    /// Number of tombstoned needles in the index.
    #[must_use]
    pub fn tombstoned_needles(&self) -> usize {
        let index = self.index.read();
        index.len() - index.live_len()
    }

    /// Read the payload of the needle at `offset`.
    ///
    /// Validates the header against the index entry, the stated size against
    /// the volume bounds, and the payload CRC trailer.
    ///
    /// # Errors
    ///
    /// - [`EndpointError::NotFound`] if no live needle starts at `offset`.
    /// - [`EndpointError::Corruption`] on header mismatch, short read, or
    ///   CRC failure; the volume is flagged for offline repair.
    pub fn read_needle(&self, offset: u64) -> EndpointResult<Bytes> {
        let entry = self
            .index
            .read()
            .get(offset)
            .copied()
            .ok_or_else(|| {
                EndpointError::not_found(Resource::Blob {
                    volume_id: self.id,
                    offset,
                })
            })?;

        let byte_size = self.byte_size();
        if offset.saturating_add(NEEDLE_HEADER_SIZE as u64) > byte_size {
            return Err(EndpointError::not_found(Resource::Blob {
                volume_id: self.id,
                offset,
            }));
        }

        let mut header_buf = [0u8; NEEDLE_HEADER_SIZE];
        self.file
            .read_exact_at(&mut header_buf, offset)
            .map_err(|e| self.corrupt(offset, format!("short header read: {e}")))?;
        let header = NeedleHeader::decode(&header_buf)
            .map_err(|e| self.corrupt(offset, e.to_string()))?;

        if header.cookie != entry.cookie || header.size != entry.size {
            return Err(self.corrupt(
                offset,
                format!(
                    "header disagrees with index (cookie {:#x} vs {:#x}, size {} vs {})",
                    header.cookie, entry.cookie, header.size, entry.size
                ),
            ));
        }

        // The payload plus trailer must fit inside the volume.
        let remaining = byte_size - offset - NEEDLE_HEADER_SIZE as u64;
        if header.size + NEEDLE_TRAILER_SIZE as u64 > remaining {
            return Err(self.corrupt(
                offset,
                format!("needle size {} exceeds volume bounds", header.size),
            ));
        }

        let payload_len = usize::try_from(header.size)
            .map_err(|_| EndpointError::invalid_argument("needle size exceeds address space"))?;
        let mut buf = vec![0u8; payload_len + NEEDLE_TRAILER_SIZE];
        self.file
            .read_exact_at(&mut buf, offset + NEEDLE_HEADER_SIZE as u64)
            .map_err(|e| self.corrupt(offset, format!("short payload read: {e}")))?;

        let stored_crc = u32::from_le_bytes(
            buf[payload_len..payload_len + NEEDLE_TRAILER_SIZE]
                .try_into()
                .unwrap_or_default(),
        );
        buf.truncate(payload_len);
        let actual_crc = crc32fast::hash(&buf);
        if stored_crc != actual_crc {
            return Err(self.corrupt(
                offset,
                format!("payload CRC mismatch: stored {stored_crc:#x}, actual {actual_crc:#x}"),
            ));
        }

        Ok(Bytes::from(buf))
    }

    /// Flag the volume for offline repair and build the corruption error.
    fn corrupt(&self, offset: u64, detail: String) -> EndpointError {
        self.flagged.store(true, Ordering::Release);
        error!(
            volume_id = self.id,
            offset,
            detail = %detail,
            "volume corruption detected, flagged for offline repair"
        );
        EndpointError::Corruption {
            detail: format!("volume {} offset {offset}: {detail}", self.id),
        }
    }
}

// ---------------------------------------------------------------------------
// Recovery helpers
// ---------------------------------------------------------------------------

/// Open a read-only handle for positional reads.
fn open_read_handle(path: &Path) -> EndpointResult<File> {
    File::open(path).map_err(|e| {
        EndpointError::Internal(anyhow::anyhow!(
            "failed to open volume {}: {e}",
            path.display()
        ))
    })
}

/// Load the sidecar if present and consistent with the data file length.
///
/// A sidecar whose covered bytes differ from the data length is stale
/// (crash between data append and index append) and is discarded.
fn try_sidecar(idx_path: &Path, data_len: u64) -> Option<Vec<IndexEntry>> {
    let entries = read_sidecar(idx_path).ok()?;
    let covered: u64 = entries
        .iter()
        .map(|e| crate::needle::needle_len(e.size))
        .sum();
    if covered == data_len {
        Some(entries)
    } else {
        debug!(
            path = %idx_path.display(),
            covered,
            data_len,
            "sidecar stale, rebuilding from volume scan"
        );
        None
    }
}

/// Forward-scan a volume file, returning the intact entries and the byte
/// length of the intact prefix.
///
/// A torn final needle (incomplete header, or payload/trailer running past
/// end-of-file) terminates the scan; everything before it is kept.
fn scan_volume(path: &Path) -> EndpointResult<(Vec<IndexEntry>, u64)> {
    let file = File::open(path).map_err(|e| {
        EndpointError::Internal(anyhow::anyhow!(
            "failed to open volume {} for scan: {e}",
            path.display()
        ))
    })?;
    let data_len = file
        .metadata()
        .map_err(|e| EndpointError::Internal(anyhow::anyhow!("failed to stat volume: {e}")))?
        .len();
    let mut reader = BufReader::new(file);

    let mut entries = Vec::new();
    let mut offset = 0u64;
    loop {
        if offset + NEEDLE_HEADER_SIZE as u64 > data_len {
            break;
        }
        let mut header_buf = [0u8; NEEDLE_HEADER_SIZE];
        if reader.read_exact(&mut header_buf).is_err() {
            break;
        }
        let Ok(header) = NeedleHeader::decode(&header_buf) else {
            warn!(path = %path.display(), offset, "unparseable needle header, truncating");
            break;
        };
        let total = header.total_len();
        if offset + total > data_len {
            // Torn needle: the header promises more bytes than exist.
            break;
        }
        // Skip payload and trailer without reading them.
        let skip = i64::try_from(header.size + NEEDLE_TRAILER_SIZE as u64)
            .map_err(|_| EndpointError::invalid_argument("needle size exceeds address space"))?;
        reader
            .seek(SeekFrom::Current(skip))
            .map_err(|e| EndpointError::Internal(anyhow::anyhow!("scan seek failed: {e}")))?;

        entries.push(IndexEntry {
            cookie: header.cookie,
            offset,
            size: header.size,
            timestamp: header.timestamp,
        });
        offset += total;
    }

    Ok((entries, offset))
}

/// Truncate a volume file to the given intact length.
fn truncate_volume(path: &Path, len: u64) -> EndpointResult<()> {
    let file = OpenOptions::new().write(true).open(path).map_err(|e| {
        EndpointError::Internal(anyhow::anyhow!(
            "failed to open volume {} for truncation: {e}",
            path.display()
        ))
    })?;
    file.set_len(len)
        .map_err(|e| EndpointError::Internal(anyhow::anyhow!("failed to truncate volume: {e}")))?;
    file.sync_all()
        .map_err(|e| EndpointError::Internal(anyhow::anyhow!("failed to sync truncation: {e}")))?;
    Ok(())
}
