//! The OpenEndpoint error taxonomy.
//!
//! Defines [`EndpointError`], the single error enum shared by every storage
//! subsystem. Each variant carries enough context to render a useful message
//! and to pick the correct S3 error code via [`EndpointError::s3_code`]:
//! a `NotFound` for a bucket becomes `NoSuchBucket`, for a key `NoSuchKey`,
//! and so on.
//!
//! # Usage
//!
//! ```
//! use openep_core::{EndpointError, Resource};
//!
//! let err = EndpointError::not_found(Resource::Bucket("my-bucket".to_owned()));
//! assert_eq!(err.s3_code(), "NoSuchBucket");
//! assert!(!err.is_retryable());
//! ```

use std::fmt;

/// The resource a `NotFound` / `AlreadyExists` error refers to.
///
/// The S3 wire protocol distinguishes missing buckets from missing keys from
/// missing versions; carrying the resource kind lets one taxonomy variant map
/// to the right wire code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// A bucket, by name.
    Bucket(String),
    /// An object, by bucket and key.
    Object {
        /// The bucket name.
        bucket: String,
        /// The object key.
        key: String,
    },
    /// A specific object version.
    Version {
        /// The bucket name.
        bucket: String,
        /// The object key.
        key: String,
        /// The version ID.
        version_id: String,
    },
    /// A blob inside a packed volume.
    Blob {
        /// The volume ID.
        volume_id: u64,
        /// The byte offset of the needle header.
        offset: u64,
    },
    /// A deduplicated blob, by content fingerprint (hex).
    Fingerprint(String),
    /// A multipart upload, by upload ID.
    Upload(String),
    /// A per-bucket configuration document of the named kind.
    Config {
        /// The bucket name.
        bucket: String,
        /// The configuration kind (e.g. `lifecycle`, `policy`).
        kind: String,
    },
    /// A replication operation, by operation ID.
    ReplicationOp(String),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bucket(name) => write!(f, "bucket {name}"),
            Self::Object { bucket, key } => write!(f, "object {bucket}/{key}"),
            Self::Version {
                bucket,
                key,
                version_id,
            } => write!(f, "version {bucket}/{key}@{version_id}"),
            Self::Blob { volume_id, offset } => write!(f, "blob {volume_id}:{offset}"),
            Self::Fingerprint(fp) => write!(f, "fingerprint {fp}"),
            Self::Upload(id) => write!(f, "upload {id}"),
            Self::Config { bucket, kind } => write!(f, "{kind} configuration of bucket {bucket}"),
            Self::ReplicationOp(id) => write!(f, "replication op {id}"),
        }
    }
}

/// Service-wide error type for the OpenEndpoint storage plane.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// The referenced resource does not exist (or is tombstoned).
    #[error("{resource} does not exist")]
    NotFound {
        /// What was not found.
        resource: Resource,
    },

    /// The resource already exists and cannot be created again.
    #[error("{resource} already exists")]
    AlreadyExists {
        /// What already exists.
        resource: Resource,
    },

    /// A request argument is malformed or out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the offending argument.
        message: String,
    },

    /// The principal is authenticated but not authorized for the action.
    #[error("access denied: {action} on {resource}")]
    PermissionDenied {
        /// The attempted action (e.g. `s3:GetObject`).
        action: String,
        /// The resource ARN the action targeted.
        resource: String,
    },

    /// The request could not be authenticated.
    #[error("authentication failed: {reason}")]
    Unauthenticated {
        /// Why authentication failed.
        reason: String,
    },

    /// A stated precondition (ETag match, retention window, state machine
    /// transition) did not hold.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Which precondition failed.
        message: String,
    },

    /// A configured quota or hard limit was exceeded.
    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        /// Which quota was exceeded.
        message: String,
    },

    /// Stored data failed an integrity check. Never masked; the affected
    /// volume is flagged for offline repair.
    #[error("data corruption: {detail}")]
    Corruption {
        /// What failed the integrity check.
        detail: String,
    },

    /// A transient infrastructure failure; the only retryable variant.
    #[error("temporarily unavailable: {detail}")]
    Unavailable {
        /// What is unavailable.
        detail: String,
    },

    /// The operation was canceled by a shutdown or caller signal.
    #[error("operation canceled")]
    Canceled,

    /// The request's outer deadline elapsed before completion.
    #[error("request deadline exceeded")]
    RequestTimeout,

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EndpointError {
    /// Shorthand for a [`EndpointError::NotFound`] of the given resource.
    #[must_use]
    pub fn not_found(resource: Resource) -> Self {
        Self::NotFound { resource }
    }

    /// Shorthand for an [`EndpointError::AlreadyExists`] of the given resource.
    #[must_use]
    pub fn already_exists(resource: Resource) -> Self {
        Self::AlreadyExists { resource }
    }

    /// Shorthand for an [`EndpointError::InvalidArgument`].
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// The S3 error code for this error, per the wire mapping table.
    ///
    /// `NotFound` maps by resource context: buckets to `NoSuchBucket`, keys
    /// and blobs to `NoSuchKey`, versions to `NoSuchVersion`, uploads to
    /// `NoSuchUpload`.
    #[must_use]
    pub fn s3_code(&self) -> &'static str {
        match self {
            Self::NotFound { resource } => match resource {
                Resource::Bucket(_) => "NoSuchBucket",
                Resource::Object { .. } | Resource::Blob { .. } | Resource::Fingerprint(_) => {
                    "NoSuchKey"
                }
                Resource::Version { .. } => "NoSuchVersion",
                Resource::Upload(_) | Resource::ReplicationOp(_) => "NoSuchUpload",
                Resource::Config { .. } => "NoSuchConfiguration",
            },
            Self::AlreadyExists { .. } => "BucketAlreadyExists",
            Self::InvalidArgument { .. } => "InvalidRequest",
            Self::PermissionDenied { .. } => "AccessDenied",
            Self::Unauthenticated { .. } => "SignatureDoesNotMatch",
            Self::PreconditionFailed { .. } => "PreconditionFailed",
            Self::QuotaExceeded { .. } => "QuotaExceeded",
            Self::Corruption { .. } | Self::Internal(_) => "InternalError",
            Self::Unavailable { .. } => "ServiceUnavailable",
            Self::Canceled => "RequestCanceled",
            Self::RequestTimeout => "RequestTimeout",
        }
    }

    /// Whether a caller may retry the failed operation.
    ///
    /// Only `Unavailable` is retryable; authentication and authorization
    /// failures are never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Convenience result type for OpenEndpoint operations.
pub type EndpointResult<T> = Result<T, EndpointError>;
