//! Metadata, versioning, and bucket configuration stores for OpenEndpoint.
//!
//! This crate owns everything keyed by `(bucket, key)`: the per-bucket
//! versioned key space (ordered version lists, delete markers, the
//! current-version pointer), version-id generation, bucket configuration
//! documents (CORS, policy, lifecycle, replication, object lock, tags,
//! website, notifications), multipart upload tracking, and the bucket table
//! itself.
//!
//! Object payloads never live here; a version references its blob through a
//! content fingerprint resolved by the dedup store.

mod bucket;
mod config;
mod keyspace;
mod multipart;
mod object;
mod store;
mod validation;
mod version_id;

pub use bucket::{Bucket, DeleteResult, LockOverride, PutVersionParams, VersioningStatus};
pub use config::{
    BucketConfig, Configured, CorsRule, LifecycleAction, LifecycleConfig, LifecycleFilter,
    LifecycleRule, NotificationConfig, NotificationTarget, ObjectLockConfig, ReplicationConfig,
    ReplicationDestination, ReplicationFilter, ReplicationRule, RuleStatus, WebsiteConfig,
    validate_bucket_policy, validate_cors, validate_lifecycle, validate_replication,
};
pub use keyspace::{KeySpace, ListPage, VersionListEntry, VersionListPage};
pub use multipart::{MultipartUpload, PartInfo};
pub use object::{DeleteMarker, ObjectRecord, Retention, RetentionMode, VersionEntry};
pub use store::{BucketSummary, MetadataStore};
pub use validation::{validate_bucket_name, validate_object_key, validate_tags};
pub use version_id::{NULL_VERSION_ID, VersionIdGen};
