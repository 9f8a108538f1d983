//! The deduplication store.
//!
//! A striped map from fingerprint to `{volume_id, offset, size, refcount}`.
//! Each stripe is a `parking_lot::Mutex`; the stripe lock is held across the
//! volume append on a first write, which serializes racing identical writers
//! (one physical copy, the loser just increments the refcount).
//!
//! Entries that reach refcount zero are tombstoned: readers get `NotFound`,
//! the underlying needle is logically deleted, and a future offline
//! compaction reclaims the bytes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};

use openep_core::{EndpointError, EndpointResult, Resource};
use openep_volume::{VolumeEngine, cookie_from_fingerprint};

use crate::fingerprint::Fingerprint;

/// Number of lock stripes. Fingerprints are spread by their first byte.
const STRIPES: usize = 256;

/// One dedup record: where the single physical copy lives and how many
/// object versions reference it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupEntry {
    /// The content fingerprint.
    pub fingerprint: Fingerprint,
    /// Volume holding the blob.
    pub volume_id: u64,
    /// Needle header offset within the volume.
    pub offset: u64,
    /// Payload size in bytes.
    pub size: u64,
    /// Number of referring object versions. Zero means tombstoned.
    pub refcount: u64,
}

/// Point-in-time dedup counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupStats {
    /// Live entries (refcount > 0).
    pub entries: usize,
    /// Tombstoned entries awaiting compaction.
    pub tombstones: usize,
    /// Writes answered from an existing blob since open.
    pub dedup_hits: u64,
}

// ---------------------------------------------------------------------------
// DedupStore
// ---------------------------------------------------------------------------

/// The deduplication store over a [`VolumeEngine`].
pub struct DedupStore {
    engine: Arc<VolumeEngine>,
    stripes: Vec<Mutex<HashMap<Fingerprint, DedupEntry>>>,
    dedup_hits: AtomicU64,
}

impl std::fmt::Debug for DedupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupStore")
            .field("stripes", &self.stripes.len())
            .field("dedup_hits", &self.dedup_hits.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl DedupStore {
    /// Create a dedup store over the given engine.
    #[must_use]
    pub fn new(engine: Arc<VolumeEngine>) -> Self {
        Self {
            engine,
            stripes: (0..STRIPES).map(|_| Mutex::new(HashMap::new())).collect(),
            dedup_hits: AtomicU64::new(0),
        }
    }

    /// Store a payload, deduplicating against existing content.
    ///
    /// Returns the fingerprint and whether the payload was already present
    /// (`true` = no physical write happened, the refcount was bumped).
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Internal`] if the volume append fails.
    pub fn process_write(&self, payload: &[u8]) -> EndpointResult<(Fingerprint, bool)> {
        let fingerprint = Fingerprint::of(payload);
        let mut stripe = self.stripes[fingerprint.stripe(STRIPES)].lock();

        if let Some(entry) = stripe.get_mut(&fingerprint) {
            if entry.refcount > 0 {
                entry.refcount += 1;
                self.dedup_hits.fetch_add(1, Ordering::Relaxed);
                trace!(%fingerprint, refcount = entry.refcount, "deduplicated write");
                return Ok((fingerprint, true));
            }
            // Tombstoned: the old needle is already deleted, fall through and
            // write a fresh copy.
        }

        // First write for this fingerprint. The stripe lock is held across
        // the append, so a racing identical writer waits and then takes the
        // refcount path above.
        let location = self
            .engine
            .write(payload, cookie_from_fingerprint(fingerprint.as_bytes()))?;
        stripe.insert(
            fingerprint,
            DedupEntry {
                fingerprint,
                volume_id: location.volume_id,
                offset: location.offset,
                size: payload.len() as u64,
                refcount: 1,
            },
        );
        debug!(
            %fingerprint,
            volume_id = location.volume_id,
            offset = location.offset,
            "stored new blob"
        );
        Ok((fingerprint, false))
    }

    /// Look up a live entry by fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotFound`] for unknown or tombstoned
    /// fingerprints.
    pub fn get(&self, fingerprint: &Fingerprint) -> EndpointResult<DedupEntry> {
        let stripe = self.stripes[fingerprint.stripe(STRIPES)].lock();
        match stripe.get(fingerprint) {
            Some(entry) if entry.refcount > 0 => Ok(*entry),
            _ => Err(not_found(fingerprint)),
        }
    }

    /// Read the blob bytes for a live fingerprint.
    ///
    /// # Errors
    ///
    /// - [`EndpointError::NotFound`] for unknown or tombstoned fingerprints.
    /// - [`EndpointError::Corruption`] if the blob fails its integrity check.
    pub fn read(&self, fingerprint: &Fingerprint) -> EndpointResult<Bytes> {
        let entry = self.get(fingerprint)?;
        self.engine.read(entry.volume_id, entry.offset)
    }

    /// Add one reference to an existing live entry (object copy, replicated
    /// version).
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotFound`] for unknown or tombstoned
    /// fingerprints.
    pub fn add_reference(&self, fingerprint: &Fingerprint) -> EndpointResult<u64> {
        let mut stripe = self.stripes[fingerprint.stripe(STRIPES)].lock();
        match stripe.get_mut(fingerprint) {
            Some(entry) if entry.refcount > 0 => {
                entry.refcount += 1;
                Ok(entry.refcount)
            }
            _ => Err(not_found(fingerprint)),
        }
    }

    /// Drop one reference. At zero the entry is tombstoned and the needle is
    /// logically deleted from its volume.
    ///
    /// Returns the remaining refcount.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotFound`] for unknown or tombstoned
    /// fingerprints.
    pub fn remove_reference(&self, fingerprint: &Fingerprint) -> EndpointResult<u64> {
        let mut stripe = self.stripes[fingerprint.stripe(STRIPES)].lock();
        let entry = match stripe.get_mut(fingerprint) {
            Some(entry) if entry.refcount > 0 => entry,
            _ => return Err(not_found(fingerprint)),
        };

        entry.refcount -= 1;
        let remaining = entry.refcount;
        if remaining == 0 {
            debug!(%fingerprint, "tombstoning unreferenced blob");
            self.engine.delete(entry.volume_id, entry.offset)?;
        }
        Ok(remaining)
    }

    /// Snapshot the dedup counters.
    #[must_use]
    pub fn stats(&self) -> DedupStats {
        let mut entries = 0;
        let mut tombstones = 0;
        for stripe in &self.stripes {
            for entry in stripe.lock().values() {
                if entry.refcount > 0 {
                    entries += 1;
                } else {
                    tombstones += 1;
                }
            }
        }
        DedupStats {
            entries,
            tombstones,
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
        }
    }
}

fn not_found(fingerprint: &Fingerprint) -> EndpointError {
    EndpointError::not_found(Resource::Fingerprint(fingerprint.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openep_volume::VolumeEngineOptions;

    fn make_store(dir: &std::path::Path) -> DedupStore {
        let engine = VolumeEngine::open(dir, VolumeEngineOptions::default()).expect("open engine");
        DedupStore::new(Arc::new(engine))
    }

    #[test]
    fn test_should_deduplicate_identical_payloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = make_store(dir.path());

        let (fp1, dup1) = store.process_write(&[1, 2, 3]).expect("first write");
        assert!(!dup1);
        let (fp2, dup2) = store.process_write(&[1, 2, 3]).expect("second write");
        assert!(dup2);
        assert_eq!(fp1, fp2);

        let entry = store.get(&fp1).expect("get");
        assert_eq!(entry.refcount, 2);
        assert_eq!(entry.size, 3);
        assert_eq!(store.stats().dedup_hits, 1);
    }

    #[test]
    fn test_should_store_distinct_payloads_separately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = make_store(dir.path());

        let (fp_a, _) = store.process_write(b"aaa").expect("write a");
        let (fp_b, _) = store.process_write(b"bbb").expect("write b");
        assert_ne!(fp_a, fp_b);

        assert_eq!(store.read(&fp_a).expect("read a").as_ref(), b"aaa");
        assert_eq!(store.read(&fp_b).expect("read b").as_ref(), b"bbb");
    }

    #[test]
    fn test_should_reclaim_after_last_reference_drops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = make_store(dir.path());

        let (fp, _) = store.process_write(b"shared").expect("write");
        store.process_write(b"shared").expect("write again");

        assert_eq!(store.remove_reference(&fp).expect("remove 1"), 1);
        assert_eq!(store.remove_reference(&fp).expect("remove 2"), 0);

        // Tombstoned: invisible to readers.
        assert!(matches!(store.get(&fp), Err(EndpointError::NotFound { .. })));
        assert!(matches!(
            store.read(&fp),
            Err(EndpointError::NotFound { .. })
        ));
        assert!(matches!(
            store.remove_reference(&fp),
            Err(EndpointError::NotFound { .. })
        ));
        assert_eq!(store.stats().tombstones, 1);
    }

    #[test]
    fn test_should_rewrite_after_tombstone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = make_store(dir.path());

        let (fp, _) = store.process_write(b"phoenix").expect("write");
        store.remove_reference(&fp).expect("remove");
        assert!(store.get(&fp).is_err());

        // Writing the same content again produces a fresh physical copy.
        let (fp2, dup) = store.process_write(b"phoenix").expect("rewrite");
        assert_eq!(fp, fp2);
        assert!(!dup);
        assert_eq!(store.read(&fp2).expect("read").as_ref(), b"phoenix");
        assert_eq!(store.get(&fp2).expect("get").refcount, 1);
    }

    #[test]
    fn test_should_add_reference_to_live_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = make_store(dir.path());

        let (fp, _) = store.process_write(b"copied").expect("write");
        assert_eq!(store.add_reference(&fp).expect("add ref"), 2);
        assert_eq!(store.get(&fp).expect("get").refcount, 2);

        let unknown = Fingerprint::of(b"never stored");
        assert!(matches!(
            store.add_reference(&unknown),
            Err(EndpointError::NotFound { .. })
        ));
    }

    #[test]
    fn test_should_roundtrip_empty_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = make_store(dir.path());

        let (fp, dup) = store.process_write(b"").expect("write empty");
        assert!(!dup);
        assert!(store.read(&fp).expect("read empty").is_empty());
    }
}
