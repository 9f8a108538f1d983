//! The per-bucket state: versioning, key space, object lock, multipart
//! uploads, and configuration.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use openep_core::{EndpointError, EndpointResult, Owner, RegionId, Resource};
use openep_dedup::Fingerprint;

use crate::config::BucketConfig;
use crate::keyspace::{KeySpace, ListPage, VersionListPage};
use crate::multipart::MultipartUpload;
use crate::object::{DeleteMarker, ObjectRecord, Retention, RetentionMode, VersionEntry};
use crate::version_id::{NULL_VERSION_ID, VersionIdGen};

// ---------------------------------------------------------------------------
// Versioning state machine
// ---------------------------------------------------------------------------

/// Bucket versioning status.
///
/// Transitions: `Unversioned -> Enabled`, `Enabled <-> Suspended`. A bucket
/// that has ever been versioned can never return to `Unversioned`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersioningStatus {
    /// Versioning has never been enabled.
    #[default]
    Unversioned,
    /// Versioning is in force; every PUT creates a new version.
    Enabled,
    /// Versioning is suspended; PUTs overwrite the `"null"` version.
    Suspended,
}

/// Governance-mode override for object-lock enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOverride {
    /// No override; all retention is enforced.
    None,
    /// The caller holds the bypass-governance permission.
    Governance,
}

/// Inputs for storing one object version.
#[derive(Debug, Clone)]
pub struct PutVersionParams {
    /// Content fingerprint of the (already stored) blob.
    pub fingerprint: Fingerprint,
    /// Payload size in bytes.
    pub size: u64,
    /// Quoted ETag.
    pub etag: String,
    /// Storage class.
    pub storage_class: String,
    /// User-defined metadata.
    pub user_metadata: HashMap<String, String>,
    /// Object tags.
    pub tags: Vec<(String, String)>,
    /// The writing principal's owner identity.
    pub owner: Owner,
    /// Explicit retention for this version.
    pub retention: Option<Retention>,
    /// Whether the version starts under legal hold.
    pub legal_hold: bool,
}

/// Outcome of a bucket-level delete.
#[derive(Debug, Clone)]
pub enum DeleteResult {
    /// Versioning enabled: a delete marker was appended and is now current.
    Marker(DeleteMarker),
    /// The version was physically removed (unversioned bucket, or the
    /// `"null"` version under suspension). The caller must release its blob
    /// reference.
    Removed(Box<ObjectRecord>),
    /// Nothing existed to delete; S3 semantics treat this as success.
    NoOp,
}

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

/// One bucket and all of its state.
pub struct Bucket {
    /// Bucket name.
    pub name: String,
    /// The region the bucket was created in.
    pub region: RegionId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// The bucket owner.
    pub owner: Owner,
    /// Whether object lock was enabled at creation (immutable afterwards).
    pub object_lock_enabled: bool,
    /// Per-bucket configuration documents.
    pub config: BucketConfig,

    versioning: RwLock<VersioningStatus>,
    keyspace: RwLock<KeySpace>,
    uploads: DashMap<String, Arc<MultipartUpload>>,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("region", &self.region)
            .field("versioning", &*self.versioning.read())
            .field("object_lock_enabled", &self.object_lock_enabled)
            .finish_non_exhaustive()
    }
}

impl Bucket {
    /// Create a bucket with default (unversioned) state.
    #[must_use]
    pub fn new(name: String, region: RegionId, owner: Owner, object_lock_enabled: bool) -> Self {
        Self {
            name,
            region,
            created_at: Utc::now(),
            owner,
            object_lock_enabled,
            config: BucketConfig::default(),
            versioning: RwLock::new(VersioningStatus::default()),
            keyspace: RwLock::new(KeySpace::default()),
            uploads: DashMap::new(),
        }
    }

    /// Current versioning status.
    #[must_use]
    pub fn versioning(&self) -> VersioningStatus {
        *self.versioning.read()
    }

    /// Apply a versioning transition.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::InvalidArgument`] for a transition back to
    /// `Unversioned`.
    pub fn set_versioning(&self, target: VersioningStatus) -> EndpointResult<()> {
        let mut status = self.versioning.write();
        match (
            *status,
            target,
        ) {
            (_, VersioningStatus::Unversioned) if *status != VersioningStatus::Unversioned => {
                Err(EndpointError::invalid_argument(
                    "versioning cannot be reverted to unversioned",
                ))
            }
            _ => {
                if *status != target {
                    debug!(bucket = %self.name, from = ?*status, to = ?target, "versioning transition");
                    *status = target;
                }
                Ok(())
            }
        }
    }

    /// Whether the bucket holds no versions and no in-progress uploads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keyspace.read().version_count() == 0 && self.uploads.is_empty()
    }

    // -----------------------------------------------------------------------
    // Object versions
    // -----------------------------------------------------------------------

    /// Commit a version entry for `key`. Returns the version ID and the
    /// displaced entry whose blob reference the caller must release.
    pub fn put_version(
        &self,
        key: &str,
        mut params: PutVersionParams,
        idgen: &VersionIdGen,
    ) -> (String, Option<VersionEntry>) {
        // Bucket-level default retention applies only when the version
        // carries none of its own.
        if self.object_lock_enabled && params.retention.is_none() {
            params.retention = self.default_retention();
        }

        let status = self.versioning();
        let version_id = match status {
            VersioningStatus::Enabled => idgen.next_id(),
            VersioningStatus::Unversioned | VersioningStatus::Suspended => {
                NULL_VERSION_ID.to_owned()
            }
        };
        let record = ObjectRecord {
            key: key.to_owned(),
            version_id: version_id.clone(),
            fingerprint: params.fingerprint,
            size: params.size,
            etag: params.etag,
            created_at: Utc::now(),
            storage_class: params.storage_class,
            user_metadata: params.user_metadata,
            tags: params.tags,
            owner: params.owner,
            retention: params.retention,
            legal_hold: params.legal_hold,
        };

        let mut keyspace = self.keyspace.write();
        let displaced = match status {
            VersioningStatus::Unversioned => keyspace.put_sole(record),
            VersioningStatus::Enabled => {
                keyspace.put_versioned(record);
                None
            }
            VersioningStatus::Suspended => keyspace.put_null(record),
        };
        (version_id, displaced)
    }

    /// The current version of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotFound`] if the key is absent or its
    /// current version is a delete marker.
    pub fn current(&self, key: &str) -> EndpointResult<ObjectRecord> {
        self.keyspace
            .read()
            .current(key)
            .cloned()
            .ok_or_else(|| {
                EndpointError::not_found(Resource::Object {
                    bucket: self.name.clone(),
                    key: key.to_owned(),
                })
            })
    }

    /// A specific version (or the current one when `version_id` is `None`).
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotFound`] if the key or version is absent.
    pub fn get_version(&self, key: &str, version_id: Option<&str>) -> EndpointResult<VersionEntry> {
        match version_id {
            None => self
                .current(key)
                .map(|record| VersionEntry::Object(Box::new(record))),
            Some(vid) => self.keyspace.read().get(key, vid).cloned().ok_or_else(|| {
                EndpointError::not_found(Resource::Version {
                    bucket: self.name.clone(),
                    key: key.to_owned(),
                    version_id: vid.to_owned(),
                })
            }),
        }
    }

    /// Delete `key` per the bucket's versioning semantics: append a delete
    /// marker when enabled, physically drop the `"null"` version when
    /// suspended, remove outright when unversioned.
    pub fn delete_object(&self, key: &str, owner: &Owner, idgen: &VersionIdGen) -> DeleteResult {
        let status = self.versioning();
        let mut keyspace = self.keyspace.write();
        match status {
            VersioningStatus::Enabled => {
                let (marker, _had) = keyspace.insert_marker(key, idgen.next_id(), owner);
                DeleteResult::Marker(marker)
            }
            VersioningStatus::Suspended => match keyspace.remove_version(key, NULL_VERSION_ID) {
                Some(VersionEntry::Object(record)) => DeleteResult::Removed(record),
                _ => DeleteResult::NoOp,
            },
            VersioningStatus::Unversioned => {
                let removed = keyspace
                    .remove_key(key)
                    .and_then(|mut versions| (!versions.is_empty()).then(|| versions.remove(0)));
                match removed {
                    Some(VersionEntry::Object(record)) => DeleteResult::Removed(record),
                    _ => DeleteResult::NoOp,
                }
            }
        }
    }

    /// Physically remove a specific version, honoring object lock.
    ///
    /// # Errors
    ///
    /// - [`EndpointError::NotFound`] if the version is absent.
    /// - [`EndpointError::PermissionDenied`] while a legal hold or an active
    ///   retention window forbids removal.
    pub fn delete_version(
        &self,
        key: &str,
        version_id: &str,
        lock_override: LockOverride,
    ) -> EndpointResult<VersionEntry> {
        let mut keyspace = self.keyspace.write();
        let entry = keyspace.get(key, version_id).ok_or_else(|| {
            EndpointError::not_found(Resource::Version {
                bucket: self.name.clone(),
                key: key.to_owned(),
                version_id: version_id.to_owned(),
            })
        })?;

        if let Some(record) = entry.as_object() {
            self.check_removable(record, lock_override)?;
        }

        keyspace
            .remove_version(key, version_id)
            .ok_or_else(|| {
                EndpointError::not_found(Resource::Version {
                    bucket: self.name.clone(),
                    key: key.to_owned(),
                    version_id: version_id.to_owned(),
                })
            })
    }

    /// Set or extend retention on a version.
    ///
    /// Compliance-mode retention can never be shortened; governance-mode
    /// retention can, with the override.
    ///
    /// # Errors
    ///
    /// - [`EndpointError::NotFound`] if the version is absent or a marker.
    /// - [`EndpointError::PermissionDenied`] on a forbidden shortening.
    pub fn set_retention(
        &self,
        key: &str,
        version_id: &str,
        retention: Retention,
        lock_override: LockOverride,
    ) -> EndpointResult<()> {
        let mut keyspace = self.keyspace.write();
        let record = keyspace
            .get_mut(key, version_id)
            .and_then(VersionEntry::as_object_mut)
            .ok_or_else(|| {
                EndpointError::not_found(Resource::Version {
                    bucket: self.name.clone(),
                    key: key.to_owned(),
                    version_id: version_id.to_owned(),
                })
            })?;

        if let Some(existing) = record.retention {
            let shortening = retention.retain_until < existing.retain_until;
            if shortening && existing.retain_until > Utc::now() {
                let overridable = existing.mode == RetentionMode::Governance
                    && lock_override == LockOverride::Governance;
                if !overridable {
                    return Err(EndpointError::PermissionDenied {
                        action: "s3:PutObjectRetention".to_owned(),
                        resource: format!("arn:aws:s3:::{}/{key}", self.name),
                    });
                }
            }
        }
        record.retention = Some(retention);
        Ok(())
    }

    /// Toggle the legal hold on a version.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotFound`] if the version is absent or a
    /// marker.
    pub fn set_legal_hold(&self, key: &str, version_id: &str, on: bool) -> EndpointResult<()> {
        let mut keyspace = self.keyspace.write();
        let record = keyspace
            .get_mut(key, version_id)
            .and_then(VersionEntry::as_object_mut)
            .ok_or_else(|| {
                EndpointError::not_found(Resource::Version {
                    bucket: self.name.clone(),
                    key: key.to_owned(),
                    version_id: version_id.to_owned(),
                })
            })?;
        record.legal_hold = on;
        Ok(())
    }

    /// Update the storage class of a version in place (lifecycle
    /// transition; data movement is a tiering concern).
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotFound`] if the version is absent or a
    /// marker.
    pub fn set_storage_class(
        &self,
        key: &str,
        version_id: &str,
        storage_class: &str,
    ) -> EndpointResult<()> {
        let mut keyspace = self.keyspace.write();
        let record = keyspace
            .get_mut(key, version_id)
            .and_then(VersionEntry::as_object_mut)
            .ok_or_else(|| {
                EndpointError::not_found(Resource::Version {
                    bucket: self.name.clone(),
                    key: key.to_owned(),
                    version_id: version_id.to_owned(),
                })
            })?;
        record.storage_class = storage_class.to_owned();
        Ok(())
    }

    /// List current objects. See [`KeySpace::list_objects`].
    #[must_use]
    pub fn list_objects(
        &self,
        prefix: &str,
        delimiter: &str,
        marker: &str,
        max_keys: usize,
    ) -> ListPage {
        self.keyspace
            .read()
            .list_objects(prefix, delimiter, marker, max_keys)
    }

    /// List all versions. See [`KeySpace::list_versions`].
    #[must_use]
    pub fn list_versions(
        &self,
        prefix: &str,
        delimiter: &str,
        key_marker: &str,
        version_id_marker: &str,
        max_keys: usize,
    ) -> VersionListPage {
        self.keyspace.read().list_versions(
            prefix,
            delimiter,
            key_marker,
            version_id_marker,
            max_keys,
        )
    }

    // -----------------------------------------------------------------------
    // Multipart uploads
    // -----------------------------------------------------------------------

    /// Start a multipart upload for `key`.
    pub fn create_upload(
        &self,
        key: &str,
        owner: Owner,
        user_metadata: HashMap<String, String>,
        tags: Vec<(String, String)>,
        storage_class: String,
    ) -> Arc<MultipartUpload> {
        let upload_id = Uuid::new_v4().to_string();
        let upload = Arc::new(MultipartUpload::new(
            upload_id.clone(),
            key.to_owned(),
            owner,
            user_metadata,
            tags,
            storage_class,
        ));
        info!(bucket = %self.name, key, upload_id = %upload_id, "multipart upload created");
        self.uploads.insert(upload_id, Arc::clone(&upload));
        upload
    }

    /// Look up an in-progress upload.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotFound`] for an unknown upload ID.
    pub fn upload(&self, upload_id: &str) -> EndpointResult<Arc<MultipartUpload>> {
        self.uploads
            .get(upload_id)
            .map(|u| Arc::clone(&u))
            .ok_or_else(|| EndpointError::not_found(Resource::Upload(upload_id.to_owned())))
    }

    /// Remove an upload (after completion or abort).
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotFound`] for an unknown upload ID.
    pub fn remove_upload(&self, upload_id: &str) -> EndpointResult<Arc<MultipartUpload>> {
        self.uploads
            .remove(upload_id)
            .map(|(_, u)| u)
            .ok_or_else(|| EndpointError::not_found(Resource::Upload(upload_id.to_owned())))
    }

    /// Upload IDs initiated before `cutoff` (lifecycle abort candidates).
    #[must_use]
    pub fn uploads_older_than(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.uploads
            .iter()
            .filter(|entry| entry.value().initiated_at < cutoff)
            .map(|entry| entry.key().clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Deny removal while a legal hold or active retention window applies.
    fn check_removable(
        &self,
        record: &ObjectRecord,
        lock_override: LockOverride,
    ) -> EndpointResult<()> {
        let denied = EndpointError::PermissionDenied {
            action: "s3:DeleteObjectVersion".to_owned(),
            resource: format!("arn:aws:s3:::{}/{}", self.name, record.key),
        };
        if record.legal_hold {
            return Err(denied);
        }
        if let Some(retention) = record.retention {
            if retention.retain_until > Utc::now() {
                match retention.mode {
                    RetentionMode::Compliance => return Err(denied),
                    RetentionMode::Governance => {
                        if lock_override != LockOverride::Governance {
                            return Err(denied);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// The bucket's default retention for new versions, if configured.
    fn default_retention(&self) -> Option<Retention> {
        let configured = self.config.object_lock()?;
        let mode = configured.value.default_mode?;
        let days = configured.value.default_days?;
        Some(Retention {
            mode,
            retain_until: Utc::now() + Duration::days(i64::from(days)),
        })
    }
}
