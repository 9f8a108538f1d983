//! The volume engine: writable-volume selection, appends, reads, deletes.
//!
//! One exclusive mutex guards the appender (writable-volume selection plus
//! the buffered write handle); reads go through per-volume read handles and
//! run in parallel with each other and with the appender. A needle is never
//! split across volumes: an append that would push the head volume past the
//! configured maximum seals it and rolls to a fresh one.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use openep_core::{EndpointError, EndpointResult, Resource};

use crate::index::{IndexEntry, append_sidecar};
use crate::needle::{NeedleHeader, needle_len};
use crate::volume::Volume;

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct VolumeEngineOptions {
    /// A volume is sealed once its size reaches this many bytes.
    pub max_volume_size: u64,
    /// Fsync the head volume after this many appended bytes (0 = every write).
    pub fsync_batch_bytes: u64,
}

impl Default for VolumeEngineOptions {
    fn default() -> Self {
        Self {
            max_volume_size: 1 << 30,
            fsync_batch_bytes: 8 << 20,
        }
    }
}

/// Where a blob landed: the needle's volume, header offset, and total
/// on-disk footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLocation {
    /// The volume ID.
    pub volume_id: u64,
    /// Byte offset of the needle header within the volume.
    pub offset: u64,
    /// Total needle footprint (header + payload + trailer) in bytes.
    pub needle_size: u64,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of volumes on disk.
    pub volume_count: usize,
    /// Number of sealed (read-only) volumes.
    pub sealed_count: usize,
    /// Live (readable) needles across all volumes.
    pub live_needles: usize,
    /// Tombstoned needles awaiting offline compaction.
    pub tombstoned_needles: usize,
    /// Volumes flagged for offline repair after a corruption hit.
    pub flagged_volumes: usize,
    /// Total payload bytes appended since the engine opened.
    pub bytes_written: u64,
}

/// The open write handles for the head volume.
struct Appender {
    volume: Arc<Volume>,
    data: BufWriter<File>,
    idx: BufWriter<File>,
    bytes_since_fsync: u64,
}

impl std::fmt::Debug for Appender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appender")
            .field("volume_id", &self.volume.id())
            .field("bytes_since_fsync", &self.bytes_since_fsync)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// VolumeEngine
// ---------------------------------------------------------------------------

/// The packed-volume storage engine.
#[derive(Debug)]
pub struct VolumeEngine {
    dir: PathBuf,
    opts: VolumeEngineOptions,
    volumes: RwLock<BTreeMap<u64, Arc<Volume>>>,
    appender: Mutex<Option<Appender>>,
    bytes_written: AtomicU64,
}

impl VolumeEngine {
    /// Open the engine over a data directory, recovering every `NNNN.dat`
    /// volume found there.
    ///
    /// All volumes at or past `max_volume_size` are sealed; the
    /// highest-numbered unsealed volume becomes the append target on the
    /// next write.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Internal`] if the directory cannot be
    /// created or a volume cannot be recovered.
    pub fn open(dir: impl Into<PathBuf>, opts: VolumeEngineOptions) -> EndpointResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            EndpointError::Internal(anyhow::anyhow!(
                "failed to create data dir {}: {e}",
                dir.display()
            ))
        })?;

        let mut volumes = BTreeMap::new();
        for id in list_volume_ids(&dir)? {
            let data_path = volume_path(&dir, id, "dat");
            let idx_path = volume_path(&dir, id, "idx");
            let volume = Volume::open(id, data_path, &idx_path, false)?;
            if volume.byte_size() >= opts.max_volume_size {
                volume.seal();
            }
            volumes.insert(id, Arc::new(volume));
        }

        // Only the newest volume may keep accepting writes; older unsealed
        // volumes are sealed so the head is unambiguous after restart.
        let head_id = volumes.keys().next_back().copied();
        for (id, volume) in &volumes {
            if Some(*id) != head_id && !volume.is_sealed() {
                volume.seal();
            }
        }

        info!(
            dir = %dir.display(),
            volumes = volumes.len(),
            "volume engine opened"
        );

        Ok(Self {
            dir,
            opts,
            volumes: RwLock::new(volumes),
            appender: Mutex::new(None),
            bytes_written: AtomicU64::new(0),
        })
    }

    /// Append a blob and return its location.
    ///
    /// `cookie` is the CRC32 of the blob's content fingerprint (see
    /// [`crate::needle::cookie_from_fingerprint`]). Appends are serialized
    /// by the engine's write lock; writes within a volume are totally
    /// ordered by offset.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Internal`] on I/O failure.
    pub fn write(&self, payload: &[u8], cookie: u64) -> EndpointResult<BlobLocation> {
        let total = needle_len(payload.len() as u64);
        let mut guard = self.appender.lock();

        if guard.is_none() {
            self.roll_volume(&mut guard)?;
        }

        // Roll to a fresh volume if appending would overflow the head.
        // A payload larger than max_volume_size still gets a volume of its
        // own (needles never split), hence the non-empty check.
        let would_overflow = guard.as_ref().is_some_and(|appender| {
            let size = appender.volume.byte_size();
            size > 0 && size + total > self.opts.max_volume_size
        });
        if would_overflow {
            self.roll_volume(&mut guard)?;
        }

        let appender = guard
            .as_mut()
            .ok_or_else(|| EndpointError::Internal(anyhow::anyhow!("appender missing after roll")))?;

        let offset = appender.volume.byte_size();
        let header = NeedleHeader::new(cookie, payload.len() as u64);

        appender
            .data
            .write_all(&header.encode())
            .and_then(|()| appender.data.write_all(payload))
            .and_then(|()| {
                appender
                    .data
                    .write_all(&crc32fast::hash(payload).to_le_bytes())
            })
            .and_then(|()| appender.data.flush())
            .map_err(|e| EndpointError::Internal(anyhow::anyhow!("volume append failed: {e}")))?;

        let entry = IndexEntry {
            cookie,
            offset,
            size: header.size,
            timestamp: header.timestamp,
        };
        append_sidecar(&mut appender.idx, &entry)
            .and_then(|()| appender.idx.flush())
            .map_err(|e| EndpointError::Internal(anyhow::anyhow!("sidecar append failed: {e}")))?;

        appender.volume.record_append(entry);
        self.bytes_written
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        appender.bytes_since_fsync += total;
        if appender.bytes_since_fsync >= self.opts.fsync_batch_bytes {
            sync_appender(appender)?;
        }

        let location = BlobLocation {
            volume_id: appender.volume.id(),
            offset,
            needle_size: total,
        };

        // Seal immediately once the head reaches the limit.
        if appender.volume.byte_size() >= self.opts.max_volume_size {
            self.seal_head(&mut guard)?;
        }

        Ok(location)
    }

    /// Read the blob at the given location.
    ///
    /// # Errors
    ///
    /// - [`EndpointError::NotFound`] for an unknown volume or offset.
    /// - [`EndpointError::Corruption`] on integrity failure.
    pub fn read(&self, volume_id: u64, offset: u64) -> EndpointResult<Bytes> {
        let volume = self.volume(volume_id)?;
        volume.read_needle(offset)
    }

    /// Logically delete the blob at the given location.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotFound`] for an unknown volume or offset.
    pub fn delete(&self, volume_id: u64, offset: u64) -> EndpointResult<()> {
        let volume = self.volume(volume_id)?;
        volume.delete_needle(offset)
    }

    /// Snapshot the engine counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let volumes = self.volumes.read();
        let mut stats = EngineStats {
            volume_count: volumes.len(),
            sealed_count: 0,
            live_needles: 0,
            tombstoned_needles: 0,
            flagged_volumes: 0,
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        };
        for volume in volumes.values() {
            if volume.is_sealed() {
                stats.sealed_count += 1;
            }
            if volume.is_flagged() {
                stats.flagged_volumes += 1;
            }
            stats.live_needles += volume.live_needles();
            stats.tombstoned_needles += volume.tombstoned_needles();
        }
        stats
    }

    /// Flush and fsync the head volume (used at shutdown and by callers that
    /// need a durability point).
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Internal`] on I/O failure.
    pub fn sync(&self) -> EndpointResult<()> {
        let mut guard = self.appender.lock();
        if let Some(appender) = guard.as_mut() {
            sync_appender(appender)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn volume(&self, volume_id: u64) -> EndpointResult<Arc<Volume>> {
        self.volumes
            .read()
            .get(&volume_id)
            .cloned()
            .ok_or_else(|| {
                EndpointError::not_found(Resource::Blob {
                    volume_id,
                    offset: 0,
                })
            })
    }

    /// Seal the current head volume: flush, fsync, mark sealed, drop handles.
    fn seal_head(&self, guard: &mut Option<Appender>) -> EndpointResult<()> {
        if let Some(mut appender) = guard.take() {
            sync_appender(&mut appender)?;
            appender.volume.seal();
            info!(
                volume_id = appender.volume.id(),
                byte_size = appender.volume.byte_size(),
                "sealed volume"
            );
        }
        Ok(())
    }

    /// Seal the current head (if any) and open a fresh writable volume.
    fn roll_volume(&self, guard: &mut Option<Appender>) -> EndpointResult<()> {
        self.seal_head(guard)?;

        let mut volumes = self.volumes.write();

        // Reuse the newest on-disk volume if it can still accept writes
        // (first write after open); otherwise allocate the next ID.
        let head = volumes
            .values()
            .next_back()
            .filter(|v| !v.is_sealed())
            .cloned();
        let volume = match head {
            Some(volume) => volume,
            None => {
                let id = volumes.keys().next_back().map_or(1, |max| max + 1);
                let volume = Arc::new(Volume::create(id, volume_path(&self.dir, id, "dat"))?);
                volumes.insert(id, Arc::clone(&volume));
                volume
            }
        };

        let data = OpenOptions::new()
            .append(true)
            .open(volume.data_path())
            .map_err(|e| {
                EndpointError::Internal(anyhow::anyhow!("failed to open append handle: {e}"))
            })?;
        let idx = OpenOptions::new()
            .append(true)
            .create(true)
            .open(volume_path(&self.dir, volume.id(), "idx"))
            .map_err(|e| {
                EndpointError::Internal(anyhow::anyhow!("failed to open sidecar handle: {e}"))
            })?;

        debug!(volume_id = volume.id(), "head volume ready");
        *guard = Some(Appender {
            volume,
            data: BufWriter::new(data),
            idx: BufWriter::new(idx),
            bytes_since_fsync: 0,
        });
        Ok(())
    }
}

/// Flush both buffered writers and fsync the data file.
fn sync_appender(appender: &mut Appender) -> EndpointResult<()> {
    appender
        .data
        .flush()
        .and_then(|()| appender.data.get_ref().sync_all())
        .and_then(|()| appender.idx.flush())
        .map_err(|e| EndpointError::Internal(anyhow::anyhow!("volume fsync failed: {e}")))?;
    appender.bytes_since_fsync = 0;
    Ok(())
}

/// Build `dir/NNNN.ext` for a volume ID.
fn volume_path(dir: &Path, id: u64, ext: &str) -> PathBuf {
    dir.join(format!("{id:04}.{ext}"))
}

/// Enumerate volume IDs present in the data directory, ascending.
fn list_volume_ids(dir: &Path) -> EndpointResult<Vec<u64>> {
    let mut ids = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| {
        EndpointError::Internal(anyhow::anyhow!(
            "failed to read data dir {}: {e}",
            dir.display()
        ))
    })?;
    for entry in entries {
        let entry =
            entry.map_err(|e| EndpointError::Internal(anyhow::anyhow!("readdir failed: {e}")))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(stem) = name.strip_suffix(".dat") {
            if let Ok(id) = stem.parse::<u64>() {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}
