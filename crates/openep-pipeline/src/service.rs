//! [`ObjectService`]: the authorized object operation surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use openep_core::{EndpointError, EndpointResult, Owner, Principal, RegionId};
use openep_dedup::DedupStore;
use openep_events::{EventNotifier, StorageEvent};
use openep_lifecycle::{LifecycleBackend, LifecycleCandidate};
use openep_meta::{
    Bucket, DeleteResult, LifecycleConfig, ListPage, LockOverride, MetadataStore, ObjectRecord,
    PutVersionParams, ReplicationRule, Retention, RuleStatus, VersionEntry, VersionListPage,
    validate_object_key, validate_tags,
};
use openep_policy::{AccessRequest, EvalOutcome, IamStore, PolicyDocument, evaluate_detailed};
use openep_replication::Replicator;
use openep_volume::{EngineStats, VolumeEngine};

use crate::etag::{compute_etag, compute_multipart_etag};

/// Hard bound on a single listing page.
const MAX_LISTING_KEYS: usize = 1000;

/// Hard bound on one object payload (5 GiB, the single-PUT limit).
const MAX_OBJECT_SIZE: u64 = 5 << 30;

/// Options accompanying a PUT.
#[derive(Debug, Clone, Default)]
pub struct PutObjectOptions {
    /// User-defined metadata.
    pub user_metadata: HashMap<String, String>,
    /// Object tags.
    pub tags: Vec<(String, String)>,
    /// Storage class (defaults to `STANDARD`).
    pub storage_class: Option<String>,
    /// Explicit object-lock retention.
    pub retention: Option<Retention>,
    /// Start the version under legal hold.
    pub legal_hold: bool,
}

/// Result of a PUT.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// The committed version ID.
    pub version_id: String,
    /// The version's ETag.
    pub etag: String,
    /// Whether the payload was already stored (no physical write).
    pub deduplicated: bool,
}

/// Result of a GET.
#[derive(Debug, Clone)]
pub struct GetOutcome {
    /// The resolved version's metadata.
    pub record: ObjectRecord,
    /// The payload bytes.
    pub data: Bytes,
}

/// Result of a DELETE.
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    /// The delete marker's version ID, when one was created, or the removed
    /// version's ID.
    pub version_id: Option<String>,
    /// Whether a delete marker was created.
    pub delete_marker: bool,
}

/// Result of completing a multipart upload.
#[derive(Debug, Clone)]
pub struct CompleteOutcome {
    /// The committed version ID.
    pub version_id: String,
    /// The composite ETag.
    pub etag: String,
    /// Total assembled size in bytes.
    pub size: u64,
}

// ---------------------------------------------------------------------------
// ObjectService
// ---------------------------------------------------------------------------

/// The authorized surface over the storage plane.
pub struct ObjectService {
    region: RegionId,
    engine: Arc<VolumeEngine>,
    dedup: Arc<DedupStore>,
    meta: Arc<MetadataStore>,
    iam: Arc<IamStore>,
    notifier: Arc<EventNotifier>,
    replicator: Arc<Replicator>,
    request_timeout: Duration,
}

impl std::fmt::Debug for ObjectService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectService")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl ObjectService {
    /// Wire the service over its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        region: RegionId,
        engine: Arc<VolumeEngine>,
        dedup: Arc<DedupStore>,
        meta: Arc<MetadataStore>,
        iam: Arc<IamStore>,
        notifier: Arc<EventNotifier>,
        replicator: Arc<Replicator>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            region,
            engine,
            dedup,
            meta,
            iam,
            notifier,
            replicator,
            request_timeout,
        }
    }

    /// The metadata store (bucket table) behind this service.
    #[must_use]
    pub fn meta(&self) -> &Arc<MetadataStore> {
        &self.meta
    }

    /// The IAM policy store behind this service.
    #[must_use]
    pub fn iam(&self) -> &Arc<IamStore> {
        &self.iam
    }

    /// The event notifier behind this service.
    #[must_use]
    pub fn notifier(&self) -> &Arc<EventNotifier> {
        &self.notifier
    }

    /// The dedup store behind this service.
    #[must_use]
    pub fn dedup(&self) -> &Arc<DedupStore> {
        &self.dedup
    }

    /// The replicator behind this service.
    #[must_use]
    pub fn replicator(&self) -> &Arc<Replicator> {
        &self.replicator
    }

    /// Engine statistics for the status log.
    #[must_use]
    pub fn engine_stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Dedup statistics for the status log.
    #[must_use]
    pub fn dedup_stats(&self) -> openep_dedup::DedupStats {
        self.dedup.stats()
    }

    /// Flush and fsync the head volume (shutdown durability point).
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Internal`] on I/O failure.
    pub fn sync(&self) -> EndpointResult<()> {
        self.engine.sync()
    }

    /// Run a blocking storage operation under the configured request
    /// deadline.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::RequestTimeout`] when the deadline elapses
    /// before the operation finishes; the unfinished write is never
    /// acknowledged.
    pub async fn with_request_deadline<T, F>(self: &Arc<Self>, op: F) -> EndpointResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Self>) -> EndpointResult<T> + Send + 'static,
    {
        let service = Arc::clone(self);
        let handle = tokio::task::spawn_blocking(move || op(service));
        match tokio::time::timeout(self.request_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(EndpointError::Internal(anyhow::anyhow!(
                "request task failed: {join_error}"
            ))),
            Err(_) => Err(EndpointError::RequestTimeout),
        }
    }

    // -----------------------------------------------------------------------
    // Buckets
    // -----------------------------------------------------------------------

    /// Create a bucket owned by the calling principal.
    ///
    /// # Errors
    ///
    /// Propagates authorization, validation, and `AlreadyExists` failures.
    pub fn create_bucket(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        object_lock_enabled: bool,
    ) -> EndpointResult<()> {
        self.authorize(principal, context, "s3:CreateBucket", bucket, None)?;
        let owner = Owner {
            id: principal.id.clone(),
            display_name: principal.id.clone(),
        };
        self.meta
            .create_bucket(bucket, self.region.clone(), owner, object_lock_enabled)?;
        Ok(())
    }

    /// Whether a bucket exists and is accessible to the principal.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures and `NotFound`.
    pub fn head_bucket(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<()> {
        self.authorize(principal, context, "s3:ListBucket", bucket, None)?;
        self.meta.bucket(bucket).map(|_| ())
    }

    /// Delete an empty bucket.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures, `NotFound`, and the
    /// `PreconditionFailed` raised for non-empty buckets.
    pub fn delete_bucket(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<()> {
        self.authorize(principal, context, "s3:DeleteBucket", bucket, None)?;
        self.meta.delete_bucket(bucket)
    }

    /// Buckets visible to the principal.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures.
    pub fn list_buckets(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
    ) -> EndpointResult<Vec<openep_meta::BucketSummary>> {
        self.authorize(principal, context, "s3:ListAllMyBuckets", "*", None)?;
        Ok(self.meta.list_buckets())
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    /// Store an object: the full PUT pipeline.
    ///
    /// # Errors
    ///
    /// Propagates authorization, validation, quota, and storage failures.
    pub fn put_object(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        key: &str,
        data: Bytes,
        opts: PutObjectOptions,
    ) -> EndpointResult<PutOutcome> {
        self.authorize(principal, context, "s3:PutObject", bucket, Some(key))?;
        validate_object_key(key)?;
        validate_tags(&opts.tags)?;
        if data.len() as u64 > MAX_OBJECT_SIZE {
            return Err(EndpointError::QuotaExceeded {
                message: format!("object exceeds {MAX_OBJECT_SIZE} byte single-PUT limit"),
            });
        }

        let bucket_ref = self.meta.bucket(bucket)?;
        let (fingerprint, deduplicated) = self.dedup.process_write(&data)?;
        let etag = compute_etag(&data);
        let tags = opts.tags.clone();

        let params = PutVersionParams {
            fingerprint,
            size: data.len() as u64,
            etag: etag.clone(),
            storage_class: opts
                .storage_class
                .unwrap_or_else(|| "STANDARD".to_owned()),
            user_metadata: opts.user_metadata,
            tags: opts.tags,
            owner: Owner {
                id: principal.id.clone(),
                display_name: principal.id.clone(),
            },
            retention: opts.retention,
            legal_hold: opts.legal_hold,
        };
        let (version_id, displaced) = bucket_ref.put_version(key, params, self.meta.idgen());
        if let Some(entry) = displaced {
            self.release_entry(&entry);
        }

        info!(
            bucket,
            key,
            version_id = %version_id,
            size = data.len(),
            deduplicated,
            "object stored"
        );
        self.notifier.publish(&StorageEvent::object(
            "s3:ObjectCreated:Put",
            bucket,
            key,
            Some(version_id.clone()),
            Some(data.len() as u64),
        ));
        self.replicate_write(&bucket_ref, key, &version_id, &data, &tags);

        Ok(PutOutcome {
            version_id,
            etag,
            deduplicated,
        })
    }

    /// Read an object (or a specific version of it).
    ///
    /// # Errors
    ///
    /// - [`EndpointError::NotFound`] for missing keys/versions (or a key
    ///   whose current version is a delete marker).
    /// - [`EndpointError::InvalidArgument`] when `version_id` names a
    ///   delete marker.
    /// - [`EndpointError::Corruption`] if the blob fails integrity checks.
    pub fn get_object(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> EndpointResult<GetOutcome> {
        self.authorize(principal, context, "s3:GetObject", bucket, Some(key))?;
        let record = self.resolve_object(bucket, key, version_id)?;
        let data = self.dedup.read(&record.fingerprint)?;
        Ok(GetOutcome { record, data })
    }

    /// Read an object's metadata without its payload.
    ///
    /// # Errors
    ///
    /// As [`ObjectService::get_object`], minus blob integrity failures.
    pub fn head_object(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> EndpointResult<ObjectRecord> {
        self.authorize(principal, context, "s3:GetObject", bucket, Some(key))?;
        self.resolve_object(bucket, key, version_id)
    }

    /// Delete an object (or a specific version).
    ///
    /// # Errors
    ///
    /// Propagates authorization failures and object-lock denials.
    pub fn delete_object(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        bypass_governance: bool,
    ) -> EndpointResult<DeleteOutcome> {
        self.authorize(principal, context, "s3:DeleteObject", bucket, Some(key))?;
        let lock_override = if bypass_governance {
            self.authorize(
                principal,
                context,
                "s3:BypassGovernanceRetention",
                bucket,
                Some(key),
            )?;
            LockOverride::Governance
        } else {
            LockOverride::None
        };

        let bucket_ref = self.meta.bucket(bucket)?;
        match version_id {
            Some(vid) => {
                let entry = bucket_ref.delete_version(key, vid, lock_override)?;
                let was_marker = entry.is_delete_marker();
                self.release_entry(&entry);
                self.notifier.publish(&StorageEvent::object(
                    "s3:ObjectRemoved:Delete",
                    bucket,
                    key,
                    Some(vid.to_owned()),
                    None,
                ));
                Ok(DeleteOutcome {
                    version_id: Some(vid.to_owned()),
                    delete_marker: was_marker,
                })
            }
            None => {
                let owner = Owner {
                    id: principal.id.clone(),
                    display_name: principal.id.clone(),
                };
                self.delete_current(&bucket_ref, key, &owner)
            }
        }
    }

    /// List current objects in a bucket.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures and `NotFound`.
    pub fn list_objects(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        marker: &str,
        max_keys: usize,
    ) -> EndpointResult<ListPage> {
        self.authorize(principal, context, "s3:ListBucket", bucket, None)?;
        let bucket_ref = self.meta.bucket(bucket)?;
        Ok(bucket_ref.list_objects(prefix, delimiter, marker, max_keys.min(MAX_LISTING_KEYS)))
    }

    /// List all versions in a bucket.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures and `NotFound`.
    #[allow(clippy::too_many_arguments)]
    pub fn list_versions(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        key_marker: &str,
        version_id_marker: &str,
        max_keys: usize,
    ) -> EndpointResult<VersionListPage> {
        self.authorize(principal, context, "s3:ListBucketVersions", bucket, None)?;
        let bucket_ref = self.meta.bucket(bucket)?;
        Ok(bucket_ref.list_versions(
            prefix,
            delimiter,
            key_marker,
            version_id_marker,
            max_keys.min(MAX_LISTING_KEYS),
        ))
    }

    /// Set retention on a version.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures and object-lock denials.
    #[allow(clippy::too_many_arguments)]
    pub fn put_object_retention(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        key: &str,
        version_id: &str,
        retention: Retention,
        bypass_governance: bool,
    ) -> EndpointResult<()> {
        self.authorize(principal, context, "s3:PutObjectRetention", bucket, Some(key))?;
        let lock_override = if bypass_governance {
            LockOverride::Governance
        } else {
            LockOverride::None
        };
        let bucket_ref = self.meta.bucket(bucket)?;
        bucket_ref.set_retention(key, version_id, retention, lock_override)
    }

    /// Toggle the legal hold on a version.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures and `NotFound`.
    pub fn put_object_legal_hold(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        key: &str,
        version_id: &str,
        on: bool,
    ) -> EndpointResult<()> {
        self.authorize(principal, context, "s3:PutObjectLegalHold", bucket, Some(key))?;
        let bucket_ref = self.meta.bucket(bucket)?;
        bucket_ref.set_legal_hold(key, version_id, on)
    }

    // -----------------------------------------------------------------------
    // Multipart
    // -----------------------------------------------------------------------

    /// Start a multipart upload. Returns the upload ID.
    ///
    /// # Errors
    ///
    /// Propagates authorization and validation failures.
    pub fn create_multipart_upload(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        key: &str,
        opts: PutObjectOptions,
    ) -> EndpointResult<String> {
        self.authorize(principal, context, "s3:PutObject", bucket, Some(key))?;
        validate_object_key(key)?;
        validate_tags(&opts.tags)?;
        let bucket_ref = self.meta.bucket(bucket)?;
        let upload = bucket_ref.create_upload(
            key,
            Owner {
                id: principal.id.clone(),
                display_name: principal.id.clone(),
            },
            opts.user_metadata,
            opts.tags,
            opts.storage_class.unwrap_or_else(|| "STANDARD".to_owned()),
        );
        Ok(upload.upload_id.clone())
    }

    /// Upload one part. Returns the part's ETag.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures and unknown-upload errors.
    pub fn upload_part(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> EndpointResult<String> {
        let bucket_ref = self.meta.bucket(bucket)?;
        let upload = bucket_ref.upload(upload_id)?;
        self.authorize(principal, context, "s3:PutObject", bucket, Some(&upload.key))?;

        let etag = compute_etag(&data);
        upload.put_part(part_number, etag.clone(), data);
        Ok(etag)
    }

    /// Complete a multipart upload: assemble, store, commit, notify,
    /// replicate.
    ///
    /// # Errors
    ///
    /// Propagates manifest validation and storage failures.
    pub fn complete_multipart_upload(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        upload_id: &str,
        manifest: &[(u32, String)],
    ) -> EndpointResult<CompleteOutcome> {
        let bucket_ref = self.meta.bucket(bucket)?;
        let upload = bucket_ref.upload(upload_id)?;
        let key = upload.key.clone();
        self.authorize(principal, context, "s3:PutObject", bucket, Some(&key))?;

        let (data, infos) = upload.assemble(manifest)?;
        let part_etags: Vec<String> = infos.iter().map(|p| p.etag.clone()).collect();
        let etag = compute_multipart_etag(&part_etags);

        let (fingerprint, deduplicated) = self.dedup.process_write(&data)?;
        let params = PutVersionParams {
            fingerprint,
            size: data.len() as u64,
            etag: etag.clone(),
            storage_class: upload.storage_class.clone(),
            user_metadata: upload.user_metadata.clone(),
            tags: upload.tags.clone(),
            owner: upload.owner.clone(),
            retention: None,
            legal_hold: false,
        };
        let (version_id, displaced) = bucket_ref.put_version(&key, params, self.meta.idgen());
        if let Some(entry) = displaced {
            self.release_entry(&entry);
        }
        bucket_ref.remove_upload(upload_id)?;

        info!(
            bucket,
            key = %key,
            upload_id,
            version_id = %version_id,
            parts = manifest.len(),
            size = data.len(),
            deduplicated,
            "multipart upload completed"
        );
        self.notifier.publish(&StorageEvent::object(
            "s3:ObjectCreated:CompleteMultipartUpload",
            bucket,
            &key,
            Some(version_id.clone()),
            Some(data.len() as u64),
        ));
        self.replicate_write(&bucket_ref, &key, &version_id, &data, &upload.tags);

        Ok(CompleteOutcome {
            version_id,
            etag,
            size: data.len() as u64,
        })
    }

    /// Abort a multipart upload, dropping its buffered parts.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures and unknown-upload errors.
    pub fn abort_multipart_upload(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        upload_id: &str,
    ) -> EndpointResult<()> {
        self.authorize(principal, context, "s3:AbortMultipartUpload", bucket, None)?;
        let bucket_ref = self.meta.bucket(bucket)?;
        bucket_ref.remove_upload(upload_id)?;
        debug!(bucket, upload_id, "multipart upload aborted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals (shared with the lifecycle backend)
    // -----------------------------------------------------------------------

    /// Authorize `action` for `principal` on a bucket or object resource.
    ///
    /// The pool is the principal's attached IAM policies plus the target
    /// bucket's policy. The bucket owner (root principal) passes on an
    /// implicit deny; an explicit deny binds everyone.
    pub(crate) fn authorize(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        action: &str,
        bucket: &str,
        key: Option<&str>,
    ) -> EndpointResult<()> {
        let resource = match key {
            Some(key) => format!("arn:aws:s3:::{bucket}/{key}"),
            None => format!("arn:aws:s3:::{bucket}"),
        };

        let attached = self.iam.policies_for(&principal.id);
        let bucket_policy: Option<PolicyDocument> = self
            .meta
            .bucket(bucket)
            .ok()
            .and_then(|b| b.config.policy())
            .map(|configured| configured.value);

        let pool: Vec<&PolicyDocument> = attached
            .iter()
            .chain(bucket_policy.as_ref())
            .collect();
        let request = AccessRequest {
            principal,
            action,
            resource: &resource,
            context,
        };

        match evaluate_detailed(&pool, &request) {
            EvalOutcome::Allow => Ok(()),
            EvalOutcome::ImplicitDeny if principal.is_root => Ok(()),
            EvalOutcome::ExplicitDeny | EvalOutcome::ImplicitDeny => {
                debug!(principal = %principal, action, resource = %resource, "access denied");
                Err(EndpointError::PermissionDenied {
                    action: action.to_owned(),
                    resource,
                })
            }
        }
    }

    /// Resolve a readable object record, rejecting delete markers.
    fn resolve_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> EndpointResult<ObjectRecord> {
        let bucket_ref = self.meta.bucket(bucket)?;
        match bucket_ref.get_version(key, version_id)? {
            VersionEntry::Object(record) => Ok(*record),
            VersionEntry::DeleteMarker(_) => Err(EndpointError::invalid_argument(format!(
                "version {} of {bucket}/{key} is a delete marker",
                version_id.unwrap_or("current")
            ))),
        }
    }

    /// The shared "delete the current version" path (user DELETE and
    /// lifecycle expiration).
    fn delete_current(
        &self,
        bucket_ref: &Arc<Bucket>,
        key: &str,
        owner: &Owner,
    ) -> EndpointResult<DeleteOutcome> {
        match bucket_ref.delete_object(key, owner, self.meta.idgen()) {
            DeleteResult::Marker(marker) => {
                self.notifier.publish(&StorageEvent::object(
                    "s3:ObjectRemoved:DeleteMarkerCreated",
                    &bucket_ref.name,
                    key,
                    Some(marker.version_id.clone()),
                    None,
                ));
                self.replicate_delete(bucket_ref, key, &marker.version_id, true);
                Ok(DeleteOutcome {
                    version_id: Some(marker.version_id),
                    delete_marker: true,
                })
            }
            DeleteResult::Removed(record) => {
                self.release_record(&record);
                self.notifier.publish(&StorageEvent::object(
                    "s3:ObjectRemoved:Delete",
                    &bucket_ref.name,
                    key,
                    Some(record.version_id.clone()),
                    None,
                ));
                self.replicate_delete(bucket_ref, key, &record.version_id, false);
                Ok(DeleteOutcome {
                    version_id: Some(record.version_id.clone()),
                    delete_marker: false,
                })
            }
            DeleteResult::NoOp => Ok(DeleteOutcome {
                version_id: None,
                delete_marker: false,
            }),
        }
    }

    /// Drop the blob reference held by a displaced or removed entry.
    fn release_entry(&self, entry: &VersionEntry) {
        if let Some(record) = entry.as_object() {
            self.release_record(record);
        }
    }

    fn release_record(&self, record: &ObjectRecord) {
        if let Err(e) = self.dedup.remove_reference(&record.fingerprint) {
            // A missing entry here means the refcount already hit zero
            // through another path; log and continue.
            warn!(
                fingerprint = %record.fingerprint,
                error = %e,
                "failed to release blob reference"
            );
        }
    }

    /// Replication rules of a bucket matching `(key, tags)`, enabled only,
    /// ascending priority.
    fn matching_replication_rules(
        bucket_ref: &Bucket,
        key: &str,
        tags: &[(String, String)],
    ) -> Vec<ReplicationRule> {
        let Some(configured) = bucket_ref.config.replication() else {
            return Vec::new();
        };
        let mut rules: Vec<ReplicationRule> = configured
            .value
            .rules
            .into_iter()
            .filter(|rule| rule.status == RuleStatus::Enabled)
            .filter(|rule| {
                rule.filter
                    .prefix
                    .as_deref()
                    .is_none_or(|prefix| key.starts_with(prefix))
                    && rule.filter.tags.iter().all(|t| tags.contains(t))
            })
            .collect();
        rules.sort_by_key(|rule| rule.priority);
        rules
    }

    /// Enqueue a write replication for every matching rule.
    fn replicate_write(
        &self,
        bucket_ref: &Arc<Bucket>,
        key: &str,
        version_id: &str,
        data: &Bytes,
        tags: &[(String, String)],
    ) {
        for rule in Self::matching_replication_rules(bucket_ref, key, tags) {
            let op_id = self.replicator.enqueue_write(
                &rule.destination.region,
                &bucket_ref.name,
                &rule.destination.bucket,
                key,
                version_id,
                data.clone(),
            );
            debug!(
                bucket = %bucket_ref.name,
                key,
                version_id,
                rule = %rule.id,
                target = %rule.destination.region,
                op_id = %op_id,
                "write replication enqueued"
            );
        }
    }

    /// Enqueue a delete replication for every matching rule; delete markers
    /// replicate only where the rule opts in.
    fn replicate_delete(
        &self,
        bucket_ref: &Arc<Bucket>,
        key: &str,
        version_id: &str,
        is_marker: bool,
    ) {
        let tags: Vec<(String, String)> = Vec::new();
        for rule in Self::matching_replication_rules(bucket_ref, key, &tags) {
            if is_marker && !rule.delete_marker_replication {
                continue;
            }
            self.replicator.enqueue_delete(
                &rule.destination.region,
                &bucket_ref.name,
                &rule.destination.bucket,
                key,
                version_id,
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle backend
// ---------------------------------------------------------------------------

impl LifecycleBackend for ObjectService {
    fn buckets_with_lifecycle(&self) -> Vec<(String, LifecycleConfig)> {
        self.meta
            .all_buckets()
            .into_iter()
            .filter_map(|bucket| {
                bucket
                    .config
                    .lifecycle()
                    .map(|configured| (bucket.name.clone(), configured.value))
            })
            .collect()
    }

    fn list_current(&self, bucket: &str, prefix: &str) -> Vec<LifecycleCandidate> {
        let Ok(bucket_ref) = self.meta.bucket(bucket) else {
            return Vec::new();
        };
        bucket_ref
            .list_objects(prefix, "", "", usize::MAX)
            .objects
            .into_iter()
            .map(|record| LifecycleCandidate {
                key: record.key,
                version_id: record.version_id,
                size: record.size,
                created_at: record.created_at,
                tags: record.tags,
                storage_class: record.storage_class,
            })
            .collect()
    }

    fn expire(&self, bucket: &str, key: &str) -> EndpointResult<()> {
        let bucket_ref = self.meta.bucket(bucket)?;
        let owner = bucket_ref.owner.clone();
        self.delete_current(&bucket_ref, key, &owner)?;
        Ok(())
    }

    fn transition(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        storage_class: &str,
    ) -> EndpointResult<()> {
        let bucket_ref = self.meta.bucket(bucket)?;
        bucket_ref.set_storage_class(key, version_id, storage_class)
    }

    fn abort_uploads_before(&self, bucket: &str, cutoff: DateTime<Utc>) -> EndpointResult<usize> {
        let bucket_ref = self.meta.bucket(bucket)?;
        let stale = bucket_ref.uploads_older_than(cutoff);
        let mut aborted = 0;
        for upload_id in stale {
            if bucket_ref.remove_upload(&upload_id).is_ok() {
                debug!(bucket, upload_id = %upload_id, "aborted stale multipart upload");
                aborted += 1;
            }
        }
        Ok(aborted)
    }
}
