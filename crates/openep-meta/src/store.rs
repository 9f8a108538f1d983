//! The bucket table.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

use openep_core::{EndpointError, EndpointResult, Owner, RegionId, Resource};

use crate::bucket::Bucket;
use crate::validation::validate_bucket_name;
use crate::version_id::VersionIdGen;

/// A row in a bucket listing.
#[derive(Debug, Clone)]
pub struct BucketSummary {
    /// Bucket name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// The bucket owner.
    pub owner: Owner,
}

/// The top-level metadata store: all buckets, plus the shared version-id
/// generator.
#[derive(Debug, Default)]
pub struct MetadataStore {
    buckets: DashMap<String, Arc<Bucket>>,
    idgen: VersionIdGen,
}

impl MetadataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared version-id generator.
    #[must_use]
    pub fn idgen(&self) -> &VersionIdGen {
        &self.idgen
    }

    /// Create a bucket.
    ///
    /// # Errors
    ///
    /// - [`EndpointError::InvalidArgument`] for an invalid name.
    /// - [`EndpointError::AlreadyExists`] if the name is taken.
    pub fn create_bucket(
        &self,
        name: &str,
        region: RegionId,
        owner: Owner,
        object_lock_enabled: bool,
    ) -> EndpointResult<Arc<Bucket>> {
        validate_bucket_name(name)?;

        let entry = self.buckets.entry(name.to_owned());
        match entry {
            dashmap::Entry::Occupied(_) => Err(EndpointError::already_exists(Resource::Bucket(
                name.to_owned(),
            ))),
            dashmap::Entry::Vacant(vacant) => {
                let bucket = Arc::new(Bucket::new(
                    name.to_owned(),
                    region,
                    owner,
                    object_lock_enabled,
                ));
                vacant.insert(Arc::clone(&bucket));
                info!(bucket = name, "bucket created");
                Ok(bucket)
            }
        }
    }

    /// Look up a bucket.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotFound`] for an unknown name.
    pub fn bucket(&self, name: &str) -> EndpointResult<Arc<Bucket>> {
        self.buckets
            .get(name)
            .map(|b| Arc::clone(&b))
            .ok_or_else(|| EndpointError::not_found(Resource::Bucket(name.to_owned())))
    }

    /// Delete a bucket.
    ///
    /// # Errors
    ///
    /// - [`EndpointError::NotFound`] for an unknown name.
    /// - [`EndpointError::PreconditionFailed`] if the bucket still holds
    ///   versions or in-progress uploads.
    pub fn delete_bucket(&self, name: &str) -> EndpointResult<()> {
        let bucket = self.bucket(name)?;
        if !bucket.is_empty() {
            return Err(EndpointError::PreconditionFailed {
                message: format!("bucket {name} is not empty"),
            });
        }
        self.buckets.remove(name);
        info!(bucket = name, "bucket deleted");
        Ok(())
    }

    /// Summaries of all buckets, sorted by name.
    #[must_use]
    pub fn list_buckets(&self) -> Vec<BucketSummary> {
        let mut summaries: Vec<BucketSummary> = self
            .buckets
            .iter()
            .map(|entry| BucketSummary {
                name: entry.value().name.clone(),
                created_at: entry.value().created_at,
                owner: entry.value().owner.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Iterate all buckets (for background scans).
    #[must_use]
    pub fn all_buckets(&self) -> Vec<Arc<Bucket>> {
        self.buckets
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
