//! Per-bucket configuration documents.
//!
//! Each kind (CORS, policy, object lock, tags, lifecycle, replication,
//! website, notifications) is a typed document behind its own
//! `parking_lot::RwLock`, stamped with `modified_at` on every set.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use openep_core::{EndpointError, EndpointResult, RegionId};
use openep_policy::{PolicyDocument, validate_policy};

use crate::object::RetentionMode;

/// HTTP methods a CORS rule may allow.
const CORS_METHODS: [&str; 6] = ["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH"];

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

/// Whether a lifecycle or replication rule is in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleStatus {
    /// The rule is applied.
    Enabled,
    /// The rule is kept but ignored.
    Disabled,
}

/// One CORS rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsRule {
    /// Optional rule identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Origins allowed to make cross-domain requests.
    pub allowed_origins: Vec<String>,
    /// HTTP methods the origin may execute.
    pub allowed_methods: Vec<String>,
    /// Headers allowed in a preflight request.
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    /// Response headers exposed to the browser.
    #[serde(default)]
    pub expose_headers: Vec<String>,
    /// Preflight cache lifetime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<i32>,
}

/// A lifecycle rule filter. All present fields must match; `tags` are ANDed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleFilter {
    /// Key prefix the rule applies to.
    pub prefix: Option<String>,
    /// Tags a version must carry.
    pub tags: Vec<(String, String)>,
    /// Minimum object size in bytes (exclusive).
    pub size_greater: Option<u64>,
    /// Maximum object size in bytes (exclusive).
    pub size_lesser: Option<u64>,
}

/// A lifecycle action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum LifecycleAction {
    /// Delete versions older than `days`, or after a fixed `date`.
    Expiration {
        /// Age threshold in days.
        #[serde(skip_serializing_if = "Option::is_none")]
        days: Option<u32>,
        /// Absolute expiry instant.
        #[serde(skip_serializing_if = "Option::is_none")]
        date: Option<DateTime<Utc>>,
    },
    /// Re-class versions older than `days`.
    Transition {
        /// Age threshold in days.
        days: u32,
        /// The storage class to transition into.
        storage_class: String,
    },
    /// Abort multipart uploads older than `days`.
    AbortIncompleteMultipart {
        /// Age threshold in days.
        days: u32,
    },
}

/// One lifecycle rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRule {
    /// Unique rule identifier within the bucket.
    pub id: String,
    /// Whether the rule is applied.
    pub status: RuleStatus,
    /// Conflict-resolution priority; lower values are applied first.
    pub priority: i32,
    /// Which versions the rule applies to.
    #[serde(default)]
    pub filter: LifecycleFilter,
    /// The actions to apply.
    pub actions: Vec<LifecycleAction>,
}

/// The lifecycle configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleConfig {
    /// The rules, in stored order.
    pub rules: Vec<LifecycleRule>,
}

/// A replication rule filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicationFilter {
    /// Key prefix the rule applies to.
    pub prefix: Option<String>,
    /// Tags a version must carry.
    pub tags: Vec<(String, String)>,
}

/// A replication destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationDestination {
    /// The destination region (selects the replication queue).
    pub region: RegionId,
    /// The destination bucket name.
    pub bucket: String,
    /// Storage class applied at the destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    /// Encryption applied at the destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,
}

/// One replication rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationRule {
    /// Unique rule identifier within the bucket.
    pub id: String,
    /// Whether the rule is applied.
    pub status: RuleStatus,
    /// Conflict-resolution priority; lower values win.
    pub priority: i32,
    /// Which objects the rule applies to.
    #[serde(default)]
    pub filter: ReplicationFilter,
    /// Where matching objects are replicated.
    pub destination: ReplicationDestination,
    /// Whether delete markers are replicated too.
    #[serde(default)]
    pub delete_marker_replication: bool,
}

/// The replication configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationConfig {
    /// The rules, in stored order.
    pub rules: Vec<ReplicationRule>,
}

/// Object-lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectLockConfig {
    /// Default retention mode for new versions, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<RetentionMode>,
    /// Default retention period in days for new versions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_days: Option<u32>,
}

/// Static-website configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteConfig {
    /// The index document key suffix.
    pub index_document: String,
    /// The error document key, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_document: Option<String>,
}

/// One notification target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTarget {
    /// Target identifier.
    pub id: String,
    /// Event-name patterns (`s3:ObjectCreated:*` style).
    pub events: Vec<String>,
    /// Optional key prefix filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// The notification configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    /// The configured targets.
    pub targets: Vec<NotificationTarget>,
}

// ---------------------------------------------------------------------------
// Configured<T>
// ---------------------------------------------------------------------------

/// A stored configuration value with its last-modification stamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configured<T> {
    /// The configuration document.
    pub value: T,
    /// When the document was last set.
    pub modified_at: DateTime<Utc>,
}

impl<T> Configured<T> {
    fn now(value: T) -> Self {
        Self {
            value,
            modified_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// BucketConfig
// ---------------------------------------------------------------------------

/// All configuration kinds for one bucket.
///
/// Mutations take the kind's exclusive lock; reads take a shared lock.
#[derive(Debug, Default)]
pub struct BucketConfig {
    cors: RwLock<Option<Configured<Vec<CorsRule>>>>,
    policy: RwLock<Option<Configured<PolicyDocument>>>,
    tags: RwLock<Option<Configured<Vec<(String, String)>>>>,
    lifecycle: RwLock<Option<Configured<LifecycleConfig>>>,
    replication: RwLock<Option<Configured<ReplicationConfig>>>,
    object_lock: RwLock<Option<Configured<ObjectLockConfig>>>,
    website: RwLock<Option<Configured<WebsiteConfig>>>,
    notifications: RwLock<Option<Configured<NotificationConfig>>>,
}

/// Generate `set_* / get_* / delete_*` accessors for a configuration kind.
macro_rules! config_kind {
    ($field:ident, $ty:ty, $setter:ident, $getter:ident, $deleter:ident) => {
        /// Store the document, stamping `modified_at`.
        pub fn $setter(&self, value: $ty) {
            *self.$field.write() = Some(Configured::now(value));
        }

        /// The stored document, if any.
        #[must_use]
        pub fn $getter(&self) -> Option<Configured<$ty>> {
            self.$field.read().clone()
        }

        /// Remove the document. Returns whether one existed.
        pub fn $deleter(&self) -> bool {
            self.$field.write().take().is_some()
        }
    };
}

impl BucketConfig {
    config_kind!(cors, Vec<CorsRule>, set_cors, cors, delete_cors);
    config_kind!(policy, PolicyDocument, set_policy, policy, delete_policy);
    config_kind!(tags, Vec<(String, String)>, set_tags, tags, delete_tags);
    config_kind!(
        lifecycle,
        LifecycleConfig,
        set_lifecycle,
        lifecycle,
        delete_lifecycle
    );
    config_kind!(
        replication,
        ReplicationConfig,
        set_replication,
        replication,
        delete_replication
    );
    config_kind!(
        object_lock,
        ObjectLockConfig,
        set_object_lock,
        object_lock,
        delete_object_lock
    );
    config_kind!(website, WebsiteConfig, set_website, website, delete_website);
    config_kind!(
        notifications,
        NotificationConfig,
        set_notifications,
        notifications,
        delete_notifications
    );
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a CORS rule set: every rule needs at least one recognized
/// method and at least one origin.
///
/// # Errors
///
/// Returns [`EndpointError::InvalidArgument`] naming the first violation.
pub fn validate_cors(rules: &[CorsRule]) -> EndpointResult<()> {
    if rules.is_empty() {
        return Err(EndpointError::invalid_argument(
            "CORS configuration must contain at least one rule",
        ));
    }
    for (i, rule) in rules.iter().enumerate() {
        if rule.allowed_origins.is_empty() {
            return Err(EndpointError::invalid_argument(format!(
                "CORS rule {i}: at least one origin is required"
            )));
        }
        if rule.allowed_methods.is_empty() {
            return Err(EndpointError::invalid_argument(format!(
                "CORS rule {i}: at least one method is required"
            )));
        }
        for method in &rule.allowed_methods {
            if !CORS_METHODS.contains(&method.as_str()) {
                return Err(EndpointError::invalid_argument(format!(
                    "CORS rule {i}: unsupported method {method}"
                )));
            }
        }
    }
    Ok(())
}

/// Validate a lifecycle configuration: rule IDs unique, every rule carries
/// at least one action.
///
/// # Errors
///
/// Returns [`EndpointError::InvalidArgument`] naming the first violation.
pub fn validate_lifecycle(config: &LifecycleConfig) -> EndpointResult<()> {
    if config.rules.is_empty() {
        return Err(EndpointError::invalid_argument(
            "lifecycle configuration must contain at least one rule",
        ));
    }
    let mut seen = std::collections::HashSet::new();
    for rule in &config.rules {
        if rule.id.is_empty() {
            return Err(EndpointError::invalid_argument(
                "lifecycle rule id must not be empty",
            ));
        }
        if !seen.insert(rule.id.as_str()) {
            return Err(EndpointError::invalid_argument(format!(
                "duplicate lifecycle rule id: {}",
                rule.id
            )));
        }
        if rule.actions.is_empty() {
            return Err(EndpointError::invalid_argument(format!(
                "lifecycle rule {} has no actions",
                rule.id
            )));
        }
    }
    Ok(())
}

/// Validate a replication configuration: rule IDs unique, destinations
/// named.
///
/// # Errors
///
/// Returns [`EndpointError::InvalidArgument`] naming the first violation.
pub fn validate_replication(config: &ReplicationConfig) -> EndpointResult<()> {
    if config.rules.is_empty() {
        return Err(EndpointError::invalid_argument(
            "replication configuration must contain at least one rule",
        ));
    }
    let mut seen = std::collections::HashSet::new();
    for rule in &config.rules {
        if !seen.insert(rule.id.as_str()) {
            return Err(EndpointError::invalid_argument(format!(
                "duplicate replication rule id: {}",
                rule.id
            )));
        }
        if rule.destination.bucket.is_empty() {
            return Err(EndpointError::invalid_argument(format!(
                "replication rule {} has no destination bucket",
                rule.id
            )));
        }
    }
    Ok(())
}

/// Re-export of the policy validator for use by the config surface.
///
/// # Errors
///
/// See [`validate_policy`].
pub fn validate_bucket_policy(policy: &PolicyDocument) -> EndpointResult<()> {
    validate_policy(policy)
}
