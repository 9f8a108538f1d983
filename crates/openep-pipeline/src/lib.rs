//! The object lifecycle pipeline: the composition root of the OpenEndpoint
//! storage plane.
//!
//! A PUT flows authenticator → policy evaluator → versioning store → dedup
//! store → volume engine → event notifier → replication queues; a GET runs
//! the read side of the same chain. [`ObjectService`] owns that wiring,
//! implements the lifecycle processor's backend, and exposes the bucket
//! configuration surface.

mod auth;
mod config_ops;
mod etag;
mod plane;
mod service;

pub use auth::{Authenticator, CredentialProvider, StaticCredentials};
pub use etag::{compute_etag, compute_multipart_etag};
pub use plane::{LoopbackTransport, StoragePlane};
pub use service::{
    CompleteOutcome, DeleteOutcome, GetOutcome, ObjectService, PutObjectOptions, PutOutcome,
};
