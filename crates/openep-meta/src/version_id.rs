//! Version-id generation.
//!
//! A version ID is the fixed-width hex encoding of
//! `(unix_nanos: u64 big-endian || 8 CSPRNG bytes)` — 32 lowercase hex
//! characters, byte-lexicographically sortable with newest ids greatest.
//! The nanosecond component is clamped to be strictly increasing within the
//! process, so ordering holds even if the wall clock steps backwards.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// The version ID used outside versioning-enabled buckets.
pub const NULL_VERSION_ID: &str = "null";

/// Monotonic version-id generator.
#[derive(Debug, Default)]
pub struct VersionIdGen {
    last_nanos: AtomicU64,
}

impl VersionIdGen {
    /// Create a generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next version ID.
    #[must_use]
    pub fn next_id(&self) -> String {
        let nanos = self.next_nanos();
        let random: [u8; 8] = rand::random();
        let mut raw = [0u8; 16];
        raw[..8].copy_from_slice(&nanos.to_be_bytes());
        raw[8..].copy_from_slice(&random);
        hex::encode(raw)
    }

    /// The current wall clock in nanoseconds, clamped so consecutive calls
    /// are strictly increasing even under clock skew.
    fn next_nanos(&self) -> u64 {
        let now = Utc::now()
            .timestamp_nanos_opt()
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0);
        let mut last = self.last_nanos.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.last_nanos.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => last = observed,
            }
        }
    }
}
