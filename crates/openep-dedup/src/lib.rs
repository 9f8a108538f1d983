//! Content-addressed deduplication store for OpenEndpoint.
//!
//! Maps a blob's SHA-256 fingerprint to its packed-volume location and a
//! reference count, guaranteeing at most one physical copy per fingerprint.
//! First writes are serialized per fingerprint stripe, so two writers racing
//! with identical payloads produce exactly one blob and no orphans.

mod fingerprint;
mod store;

pub use fingerprint::Fingerprint;
pub use store::{DedupEntry, DedupStats, DedupStore};
