//! Asynchronous cross-region replication for OpenEndpoint.
//!
//! Each destination region gets a FIFO queue and a worker task. Workers
//! wake on a timer, deliver the head operation through a pluggable
//! [`ReplicationTransport`], retry transient failures up to three times
//! with exponential backoff, and park permanently-failed operations in a
//! queryable `failed` state.
//!
//! Cross-source ordering uses per-`(bucket, key)` vector clocks; the
//! receiving side merges clocks and resolves concurrent writes through a
//! [`ConflictResolver`] (Last-Write-Wins by wall clock by default).

mod clock;
mod op;
mod receiver;
mod resolver;
mod worker;

pub use clock::{ClockOrdering, VectorClock};
pub use op::{OpStatus, ReplicationOp, ReplicationOpKind};
pub use receiver::{ApplyOutcome, ReplicaReceiver};
pub use resolver::{ConflictResolver, LastWriteWins, ReplicaMeta, Winner};
pub use worker::{Replicator, ReplicationTransport, ReplicatorOptions};
