//! Multipart upload tracking.
//!
//! Parts are buffered here until the upload completes; completion hands the
//! assembled bytes back to the caller, which writes them through the dedup
//! store like any single-shot PUT.

use std::collections::{BTreeMap, HashMap};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use openep_core::{EndpointError, EndpointResult, Owner, Resource};

/// Metadata about one uploaded part.
#[derive(Debug, Clone)]
pub struct PartInfo {
    /// The part number (1-based).
    pub part_number: u32,
    /// Quoted MD5 ETag of the part.
    pub etag: String,
    /// Part size in bytes.
    pub size: u64,
}

/// One in-progress multipart upload.
#[derive(Debug)]
pub struct MultipartUpload {
    /// The upload ID.
    pub upload_id: String,
    /// The destination object key.
    pub key: String,
    /// When the upload was initiated.
    pub initiated_at: DateTime<Utc>,
    /// Who initiated the upload.
    pub owner: Owner,
    /// User-defined metadata carried onto the final object.
    pub user_metadata: HashMap<String, String>,
    /// Tags carried onto the final object.
    pub tags: Vec<(String, String)>,
    /// Storage class of the final object.
    pub storage_class: String,
    /// Uploaded parts by part number, with their buffered bytes.
    parts: Mutex<BTreeMap<u32, (PartInfo, Bytes)>>,
}

impl MultipartUpload {
    /// Start a new upload.
    #[must_use]
    pub fn new(
        upload_id: String,
        key: String,
        owner: Owner,
        user_metadata: HashMap<String, String>,
        tags: Vec<(String, String)>,
        storage_class: String,
    ) -> Self {
        Self {
            upload_id,
            key,
            initiated_at: Utc::now(),
            owner,
            user_metadata,
            tags,
            storage_class,
            parts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Buffer one part, replacing any previous upload of the same number.
    pub fn put_part(&self, part_number: u32, etag: String, data: Bytes) {
        debug!(
            upload_id = %self.upload_id,
            part_number,
            size = data.len(),
            "buffered part"
        );
        let info = PartInfo {
            part_number,
            etag,
            size: data.len() as u64,
        };
        self.parts.lock().insert(part_number, (info, data));
    }

    /// Uploaded parts in part-number order.
    #[must_use]
    pub fn list_parts(&self) -> Vec<PartInfo> {
        self.parts
            .lock()
            .values()
            .map(|(info, _)| info.clone())
            .collect()
    }

    /// Assemble the listed part numbers into the final payload.
    ///
    /// Part numbers must be ascending and every part must exist; its ETag
    /// must match the caller's manifest.
    ///
    /// # Errors
    ///
    /// - [`EndpointError::InvalidArgument`] if the manifest is empty or not
    ///   ascending.
    /// - [`EndpointError::PreconditionFailed`] on an ETag mismatch.
    /// - [`EndpointError::NotFound`] for a missing part.
    pub fn assemble(&self, manifest: &[(u32, String)]) -> EndpointResult<(Bytes, Vec<PartInfo>)> {
        if manifest.is_empty() {
            return Err(EndpointError::invalid_argument(
                "multipart completion requires at least one part",
            ));
        }
        if manifest.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(EndpointError::invalid_argument(
                "part numbers must be in ascending order",
            ));
        }

        let parts = self.parts.lock();
        let mut combined = BytesMut::new();
        let mut infos = Vec::with_capacity(manifest.len());
        for (part_number, expected_etag) in manifest {
            let (info, data) = parts.get(part_number).ok_or_else(|| {
                EndpointError::not_found(Resource::Upload(format!(
                    "{}#{part_number}",
                    self.upload_id
                )))
            })?;
            if &info.etag != expected_etag {
                return Err(EndpointError::PreconditionFailed {
                    message: format!("part {part_number} etag mismatch"),
                });
            }
            combined.extend_from_slice(data);
            infos.push(info.clone());
        }
        Ok((combined.freeze(), infos))
    }
}
