//! The bucket configuration surface: authorized `set`/`get`/`delete` per
//! configuration kind, with validation on every write.

use std::collections::HashMap;

use tracing::info;

use openep_core::{EndpointError, EndpointResult, Principal, Resource};
use openep_meta::{
    Configured, CorsRule, LifecycleConfig, NotificationConfig, ObjectLockConfig, ReplicationConfig,
    VersioningStatus, WebsiteConfig, validate_cors, validate_lifecycle, validate_replication,
    validate_tags,
};
use openep_policy::{PolicyDocument, validate_policy};

use crate::service::ObjectService;

/// Map "no such configuration" onto the taxonomy.
fn config_not_found(bucket: &str, kind: &str) -> EndpointError {
    EndpointError::not_found(Resource::Config {
        bucket: bucket.to_owned(),
        kind: kind.to_owned(),
    })
}

impl ObjectService {
    // -----------------------------------------------------------------------
    // Versioning
    // -----------------------------------------------------------------------

    /// Apply a versioning transition to a bucket.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures and invalid transitions.
    pub fn put_bucket_versioning(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        status: VersioningStatus,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutBucketVersioning", bucket)?;
        let bucket_ref = self.meta().bucket(bucket)?;
        bucket_ref.set_versioning(status)?;
        info!(bucket, status = ?status, "bucket versioning updated");
        Ok(())
    }

    /// The bucket's versioning status.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures and `NotFound`.
    pub fn get_bucket_versioning(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<VersioningStatus> {
        self.authorize_config(principal, context, "s3:GetBucketVersioning", bucket)?;
        Ok(self.meta().bucket(bucket)?.versioning())
    }

    // -----------------------------------------------------------------------
    // Policy
    // -----------------------------------------------------------------------

    /// Attach a bucket policy.
    ///
    /// # Errors
    ///
    /// Propagates authorization and policy-validation failures.
    pub fn put_bucket_policy(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        policy: PolicyDocument,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutBucketPolicy", bucket)?;
        validate_policy(&policy)?;
        self.meta().bucket(bucket)?.config.set_policy(policy);
        info!(bucket, "bucket policy updated");
        Ok(())
    }

    /// The bucket policy.
    ///
    /// # Errors
    ///
    /// `NotFound` when no policy is attached.
    pub fn get_bucket_policy(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<Configured<PolicyDocument>> {
        self.authorize_config(principal, context, "s3:GetBucketPolicy", bucket)?;
        self.meta()
            .bucket(bucket)?
            .config
            .policy()
            .ok_or_else(|| config_not_found(bucket, "policy"))
    }

    /// Remove the bucket policy.
    ///
    /// # Errors
    ///
    /// `NotFound` when no policy is attached.
    pub fn delete_bucket_policy(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:DeleteBucketPolicy", bucket)?;
        if self.meta().bucket(bucket)?.config.delete_policy() {
            Ok(())
        } else {
            Err(config_not_found(bucket, "policy"))
        }
    }

    // -----------------------------------------------------------------------
    // CORS
    // -----------------------------------------------------------------------

    /// Set the CORS rules.
    ///
    /// # Errors
    ///
    /// Propagates authorization and CORS-validation failures.
    pub fn put_bucket_cors(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        rules: Vec<CorsRule>,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutBucketCORS", bucket)?;
        validate_cors(&rules)?;
        self.meta().bucket(bucket)?.config.set_cors(rules);
        Ok(())
    }

    /// The CORS rules.
    ///
    /// # Errors
    ///
    /// `NotFound` when no CORS configuration exists.
    pub fn get_bucket_cors(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<Configured<Vec<CorsRule>>> {
        self.authorize_config(principal, context, "s3:GetBucketCORS", bucket)?;
        self.meta()
            .bucket(bucket)?
            .config
            .cors()
            .ok_or_else(|| config_not_found(bucket, "cors"))
    }

    /// Remove the CORS rules.
    ///
    /// # Errors
    ///
    /// `NotFound` when no CORS configuration exists.
    pub fn delete_bucket_cors(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutBucketCORS", bucket)?;
        if self.meta().bucket(bucket)?.config.delete_cors() {
            Ok(())
        } else {
            Err(config_not_found(bucket, "cors"))
        }
    }

    // -----------------------------------------------------------------------
    // Tags
    // -----------------------------------------------------------------------

    /// Set the bucket tag set.
    ///
    /// # Errors
    ///
    /// Propagates authorization and tag-validation failures.
    pub fn put_bucket_tagging(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        tags: Vec<(String, String)>,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutBucketTagging", bucket)?;
        validate_tags(&tags)?;
        self.meta().bucket(bucket)?.config.set_tags(tags);
        Ok(())
    }

    /// The bucket tag set.
    ///
    /// # Errors
    ///
    /// `NotFound` when no tags are set.
    pub fn get_bucket_tagging(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<Configured<Vec<(String, String)>>> {
        self.authorize_config(principal, context, "s3:GetBucketTagging", bucket)?;
        self.meta()
            .bucket(bucket)?
            .config
            .tags()
            .ok_or_else(|| config_not_found(bucket, "tagging"))
    }

    /// Remove the bucket tag set.
    ///
    /// # Errors
    ///
    /// `NotFound` when no tags are set.
    pub fn delete_bucket_tagging(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutBucketTagging", bucket)?;
        if self.meta().bucket(bucket)?.config.delete_tags() {
            Ok(())
        } else {
            Err(config_not_found(bucket, "tagging"))
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Set the lifecycle configuration.
    ///
    /// # Errors
    ///
    /// Propagates authorization and lifecycle-validation failures.
    pub fn put_bucket_lifecycle(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        config: LifecycleConfig,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutLifecycleConfiguration", bucket)?;
        validate_lifecycle(&config)?;
        self.meta().bucket(bucket)?.config.set_lifecycle(config);
        info!(bucket, "lifecycle configuration updated");
        Ok(())
    }

    /// The lifecycle configuration.
    ///
    /// # Errors
    ///
    /// `NotFound` when none exists.
    pub fn get_bucket_lifecycle(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<Configured<LifecycleConfig>> {
        self.authorize_config(principal, context, "s3:GetLifecycleConfiguration", bucket)?;
        self.meta()
            .bucket(bucket)?
            .config
            .lifecycle()
            .ok_or_else(|| config_not_found(bucket, "lifecycle"))
    }

    /// Remove the lifecycle configuration.
    ///
    /// # Errors
    ///
    /// `NotFound` when none exists.
    pub fn delete_bucket_lifecycle(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutLifecycleConfiguration", bucket)?;
        if self.meta().bucket(bucket)?.config.delete_lifecycle() {
            Ok(())
        } else {
            Err(config_not_found(bucket, "lifecycle"))
        }
    }

    // -----------------------------------------------------------------------
    // Replication
    // -----------------------------------------------------------------------

    /// Set the replication configuration.
    ///
    /// # Errors
    ///
    /// Propagates authorization and replication-validation failures.
    pub fn put_bucket_replication(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        config: ReplicationConfig,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutReplicationConfiguration", bucket)?;
        validate_replication(&config)?;
        // Make sure every referenced destination has a queue.
        for rule in &config.rules {
            self.replicator()
                .add_target(rule.destination.region.clone(), true);
        }
        self.meta().bucket(bucket)?.config.set_replication(config);
        info!(bucket, "replication configuration updated");
        Ok(())
    }

    /// The replication configuration.
    ///
    /// # Errors
    ///
    /// `NotFound` when none exists.
    pub fn get_bucket_replication(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<Configured<ReplicationConfig>> {
        self.authorize_config(principal, context, "s3:GetReplicationConfiguration", bucket)?;
        self.meta()
            .bucket(bucket)?
            .config
            .replication()
            .ok_or_else(|| config_not_found(bucket, "replication"))
    }

    /// Remove the replication configuration.
    ///
    /// # Errors
    ///
    /// `NotFound` when none exists.
    pub fn delete_bucket_replication(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutReplicationConfiguration", bucket)?;
        if self.meta().bucket(bucket)?.config.delete_replication() {
            Ok(())
        } else {
            Err(config_not_found(bucket, "replication"))
        }
    }

    // -----------------------------------------------------------------------
    // Object lock, website, notifications
    // -----------------------------------------------------------------------

    /// Set the object-lock defaults. Requires the bucket to have been
    /// created with object lock enabled.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures; `PreconditionFailed` when object
    /// lock was not enabled at bucket creation.
    pub fn put_object_lock_config(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        config: ObjectLockConfig,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutBucketObjectLockConfiguration", bucket)?;
        let bucket_ref = self.meta().bucket(bucket)?;
        if !bucket_ref.object_lock_enabled {
            return Err(EndpointError::PreconditionFailed {
                message: format!("bucket {bucket} was not created with object lock enabled"),
            });
        }
        bucket_ref.config.set_object_lock(config);
        Ok(())
    }

    /// The object-lock configuration.
    ///
    /// # Errors
    ///
    /// `NotFound` when none exists.
    pub fn get_object_lock_config(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<Configured<ObjectLockConfig>> {
        self.authorize_config(principal, context, "s3:GetBucketObjectLockConfiguration", bucket)?;
        self.meta()
            .bucket(bucket)?
            .config
            .object_lock()
            .ok_or_else(|| config_not_found(bucket, "object-lock"))
    }

    /// Set the website configuration.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures.
    pub fn put_bucket_website(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        config: WebsiteConfig,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutBucketWebsite", bucket)?;
        if config.index_document.is_empty() {
            return Err(EndpointError::invalid_argument(
                "website configuration requires an index document",
            ));
        }
        self.meta().bucket(bucket)?.config.set_website(config);
        Ok(())
    }

    /// The website configuration.
    ///
    /// # Errors
    ///
    /// `NotFound` when none exists.
    pub fn get_bucket_website(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<Configured<WebsiteConfig>> {
        self.authorize_config(principal, context, "s3:GetBucketWebsite", bucket)?;
        self.meta()
            .bucket(bucket)?
            .config
            .website()
            .ok_or_else(|| config_not_found(bucket, "website"))
    }

    /// Remove the website configuration.
    ///
    /// # Errors
    ///
    /// `NotFound` when none exists.
    pub fn delete_bucket_website(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:DeleteBucketWebsite", bucket)?;
        if self.meta().bucket(bucket)?.config.delete_website() {
            Ok(())
        } else {
            Err(config_not_found(bucket, "website"))
        }
    }

    /// Set the notification configuration.
    ///
    /// # Errors
    ///
    /// Propagates authorization failures.
    pub fn put_bucket_notification(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
        config: NotificationConfig,
    ) -> EndpointResult<()> {
        self.authorize_config(principal, context, "s3:PutBucketNotification", bucket)?;
        self.meta().bucket(bucket)?.config.set_notifications(config);
        Ok(())
    }

    /// The notification configuration.
    ///
    /// # Errors
    ///
    /// `NotFound` when none exists.
    pub fn get_bucket_notification(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        bucket: &str,
    ) -> EndpointResult<Configured<NotificationConfig>> {
        self.authorize_config(principal, context, "s3:GetBucketNotification", bucket)?;
        self.meta()
            .bucket(bucket)?
            .config
            .notifications()
            .ok_or_else(|| config_not_found(bucket, "notification"))
    }

    // -----------------------------------------------------------------------
    // Shared
    // -----------------------------------------------------------------------

    /// Authorization for bucket-level configuration actions.
    fn authorize_config(
        &self,
        principal: &Principal,
        context: &HashMap<String, String>,
        action: &str,
        bucket: &str,
    ) -> EndpointResult<()> {
        // Configuration actions target the bucket resource itself.
        self.authorize(principal, context, action, bucket, None)
    }
}
