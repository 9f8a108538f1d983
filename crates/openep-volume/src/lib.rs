//! Packed append-only volume engine for OpenEndpoint.
//!
//! Blobs are stored as *needles* (a fixed 24-byte header, the payload, and a
//! 4-byte CRC trailer) appended to monotonically-numbered *volume* files.
//! A volume is writable until it reaches the configured maximum size, then
//! sealed forever; an offline compaction tool is the only thing that ever
//! destroys one.
//!
//! # Architecture
//!
//! ```text
//! VolumeEngine (writable-volume selection, append lock)
//!        |
//!        v
//!   Volume (read handle, byte_size, sealed flag)
//!        |
//!        v
//!   NeedleIndex (offset -> entry, tombstones)  <->  NNNN.idx sidecar
//! ```

mod engine;
mod index;
mod needle;
mod volume;

pub use engine::{BlobLocation, EngineStats, VolumeEngine, VolumeEngineOptions};
pub use index::{IndexEntry, NeedleIndex};
pub use needle::{NEEDLE_HEADER_SIZE, NEEDLE_TRAILER_SIZE, NeedleHeader, cookie_from_fingerprint};
pub use volume::Volume;
