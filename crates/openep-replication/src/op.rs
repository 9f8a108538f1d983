//! Replication operations and their lifecycle states.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use openep_core::RegionId;

use crate::clock::VectorClock;

/// What a replication operation does at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationOpKind {
    /// Replicate a written object version.
    Write,
    /// Replicate a deletion (or delete marker).
    Delete,
}

/// Delivery state of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    /// Queued, waiting for a worker.
    Pending,
    /// Handed to the transport.
    InProgress,
    /// Delivered successfully.
    Completed,
    /// Gave up after the retry budget; never retried again.
    Failed,
}

/// One queued replication operation.
#[derive(Debug, Clone)]
pub struct ReplicationOp {
    /// Unique operation ID.
    pub id: String,
    /// The source (local) region.
    pub source: RegionId,
    /// The destination region.
    pub target: RegionId,
    /// Write or delete.
    pub kind: ReplicationOpKind,
    /// Source bucket.
    pub bucket: String,
    /// Destination bucket.
    pub target_bucket: String,
    /// Object key.
    pub key: String,
    /// The replicated version ID.
    pub version_id: String,
    /// Payload bytes for writes (`None` for deletes).
    pub payload: Option<Bytes>,
    /// Vector clock stamped at enqueue time.
    pub clock: VectorClock,
    /// Source wall-clock time, used by the Last-Write-Wins resolver.
    pub wall_clock: DateTime<Utc>,
    /// Delivery state.
    pub status: OpStatus,
    /// Delivery attempts that failed so far.
    pub retries: u32,
    /// The last delivery error, once failed.
    pub error: Option<String>,
    /// When the op was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Earliest next delivery attempt (backoff).
    pub next_attempt_at: DateTime<Utc>,
}
