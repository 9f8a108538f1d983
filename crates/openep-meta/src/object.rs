//! Object version types: records, delete markers, retention.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use openep_core::Owner;
use openep_dedup::Fingerprint;

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Object-lock retention mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionMode {
    /// Deletable before the retention date only with the override permission.
    Governance,
    /// Not deletable before the retention date, even by the bucket owner.
    Compliance,
}

/// A retention window on one object version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retention {
    /// The retention mode.
    pub mode: RetentionMode,
    /// The version may not be deleted before this instant.
    pub retain_until: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ObjectRecord
// ---------------------------------------------------------------------------

/// A stored object version (non-delete-marker).
///
/// The payload itself lives in a packed volume; `fingerprint` is the handle
/// the dedup store resolves to bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    /// The object key.
    pub key: String,
    /// The version ID (`"null"` outside versioning-enabled buckets).
    pub version_id: String,
    /// Content fingerprint referencing the deduplicated blob.
    pub fingerprint: Fingerprint,
    /// Payload size in bytes.
    pub size: u64,
    /// The entity tag (quoted MD5 hex, composite for multipart).
    pub etag: String,
    /// When this version was created.
    pub created_at: DateTime<Utc>,
    /// The storage class (default `STANDARD`).
    pub storage_class: String,
    /// User-defined metadata (`x-amz-meta-*`).
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
    /// Object tags.
    #[serde(default)]
    pub tags: Vec<(String, String)>,
    /// The owner of this version.
    pub owner: Owner,
    /// Object-lock retention, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<Retention>,
    /// Whether a legal hold is in effect.
    #[serde(default)]
    pub legal_hold: bool,
}

// ---------------------------------------------------------------------------
// DeleteMarker
// ---------------------------------------------------------------------------

/// A delete marker: a version with no payload signifying deletion under
/// versioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMarker {
    /// The object key.
    pub key: String,
    /// The version ID of this marker.
    pub version_id: String,
    /// When the marker was created.
    pub created_at: DateTime<Utc>,
    /// Who deleted the object.
    pub owner: Owner,
}

// ---------------------------------------------------------------------------
// VersionEntry
// ---------------------------------------------------------------------------

/// One entry in a key's version list: a real object or a delete marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum VersionEntry {
    /// A real object version (boxed to keep the enum small).
    Object(Box<ObjectRecord>),
    /// A delete-marker version.
    DeleteMarker(DeleteMarker),
}

impl VersionEntry {
    /// The object key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Object(record) => &record.key,
            Self::DeleteMarker(marker) => &marker.key,
        }
    }

    /// The version ID.
    #[must_use]
    pub fn version_id(&self) -> &str {
        match self {
            Self::Object(record) => &record.version_id,
            Self::DeleteMarker(marker) => &marker.version_id,
        }
    }

    /// When the version was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Object(record) => record.created_at,
            Self::DeleteMarker(marker) => marker.created_at,
        }
    }

    /// Whether this entry is a delete marker.
    #[must_use]
    pub fn is_delete_marker(&self) -> bool {
        matches!(self, Self::DeleteMarker(_))
    }

    /// The inner object record, if this is not a delete marker.
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRecord> {
        match self {
            Self::Object(record) => Some(record),
            Self::DeleteMarker(_) => None,
        }
    }

    /// Mutable access to the inner object record.
    pub fn as_object_mut(&mut self) -> Option<&mut ObjectRecord> {
        match self {
            Self::Object(record) => Some(record),
            Self::DeleteMarker(_) => None,
        }
    }
}
