//! The per-bucket versioned key space.
//!
//! Keys map to version lists ordered newest-first; the head of a list is
//! the *current* version for its key. A `BTreeMap` keeps keys sorted, which
//! listings rely on for byte-lexicographic order and marker-based
//! pagination.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use tracing::debug;

use openep_core::Owner;

use crate::object::{DeleteMarker, ObjectRecord, VersionEntry};
use crate::version_id::NULL_VERSION_ID;

// ---------------------------------------------------------------------------
// List result types
// ---------------------------------------------------------------------------

/// One page of a `list_objects` result.
#[derive(Debug, Clone)]
pub struct ListPage {
    /// Current (non-delete-marker) versions, in key order.
    pub objects: Vec<ObjectRecord>,
    /// Common prefixes when a delimiter is used.
    pub common_prefixes: Vec<String>,
    /// Whether more keys follow this page.
    pub is_truncated: bool,
    /// Marker for the next page (the last returned key).
    pub next_marker: Option<String>,
}

/// One page of a `list_versions` result.
#[derive(Debug, Clone)]
pub struct VersionListPage {
    /// Version entries in key order, newest-first within each key.
    pub versions: Vec<VersionListEntry>,
    /// Common prefixes when a delimiter is used.
    pub common_prefixes: Vec<String>,
    /// Whether more entries follow this page.
    pub is_truncated: bool,
    /// Key marker for the next page.
    pub next_key_marker: Option<String>,
    /// Version-id marker for the next page.
    pub next_version_id_marker: Option<String>,
}

/// A version listing entry, augmented with `is_latest`.
#[derive(Debug, Clone)]
pub struct VersionListEntry {
    /// The underlying version or delete marker.
    pub version: VersionEntry,
    /// Whether this entry is the newest version of its key.
    pub is_latest: bool,
}

/// Outcome of inserting a version: the entry it displaced, if any, whose
/// blob reference the caller must release.
pub type Displaced = Option<VersionEntry>;

// ---------------------------------------------------------------------------
// KeySpace
// ---------------------------------------------------------------------------

/// Sorted map of object key to its version list (newest first).
#[derive(Debug, Default)]
pub struct KeySpace {
    entries: BTreeMap<String, Vec<VersionEntry>>,
}

impl KeySpace {
    /// Replace the key's whole history with this record (unversioned
    /// semantics). Returns the displaced current entry.
    pub fn put_sole(&mut self, record: ObjectRecord) -> Displaced {
        let versions = self.entries.entry(record.key.clone()).or_default();
        let displaced = if versions.is_empty() {
            None
        } else {
            Some(versions.remove(0))
        };
        versions.clear();
        versions.push(VersionEntry::Object(Box::new(record)));
        displaced
    }

    /// Prepend a new version (versioning-enabled semantics). Prior versions
    /// remain readable; the new entry becomes current.
    pub fn put_versioned(&mut self, record: ObjectRecord) {
        debug!(key = %record.key, version_id = %record.version_id, "storing version");
        let versions = self.entries.entry(record.key.clone()).or_default();
        versions.insert(0, VersionEntry::Object(Box::new(record)));
    }

    /// Overwrite the `"null"` version and make it current (suspended
    /// semantics). Non-null versions remain readable. Returns the displaced
    /// null entry.
    pub fn put_null(&mut self, record: ObjectRecord) -> Displaced {
        let versions = self.entries.entry(record.key.clone()).or_default();
        let displaced = versions
            .iter()
            .position(|v| v.version_id() == NULL_VERSION_ID)
            .map(|idx| versions.remove(idx));
        versions.insert(0, VersionEntry::Object(Box::new(record)));
        displaced
    }

    /// The current version for a key: the head of its list, unless that is
    /// a delete marker (the key then reads as absent).
    #[must_use]
    pub fn current(&self, key: &str) -> Option<&ObjectRecord> {
        self.entries
            .get(key)
            .and_then(|versions| versions.first()?.as_object())
    }

    /// A specific version (object or delete marker) by ID.
    #[must_use]
    pub fn get(&self, key: &str, version_id: &str) -> Option<&VersionEntry> {
        self.entries
            .get(key)?
            .iter()
            .find(|v| v.version_id() == version_id)
    }

    /// Mutable access to a specific version.
    pub fn get_mut(&mut self, key: &str, version_id: &str) -> Option<&mut VersionEntry> {
        self.entries
            .get_mut(key)?
            .iter_mut()
            .find(|v| v.version_id() == version_id)
    }

    /// Insert a delete marker with the given version ID at the head.
    /// Returns the marker and whether a real object was current before.
    pub fn insert_marker(&mut self, key: &str, version_id: String, owner: &Owner) -> (DeleteMarker, bool) {
        let marker = DeleteMarker {
            key: key.to_owned(),
            version_id,
            created_at: Utc::now(),
            owner: owner.clone(),
        };
        let versions = self.entries.entry(key.to_owned()).or_default();
        let had_object = versions.first().is_some_and(|v| !v.is_delete_marker());
        versions.insert(0, VersionEntry::DeleteMarker(marker.clone()));
        debug!(key, version_id = %marker.version_id, "inserted delete marker");
        (marker, had_object)
    }

    /// Physically remove one version. Empty lists are dropped.
    pub fn remove_version(&mut self, key: &str, version_id: &str) -> Option<VersionEntry> {
        let versions = self.entries.get_mut(key)?;
        let idx = versions.iter().position(|v| v.version_id() == version_id)?;
        let removed = versions.remove(idx);
        if versions.is_empty() {
            self.entries.remove(key);
        }
        Some(removed)
    }

    /// Physically remove a whole key. Returns its version list.
    pub fn remove_key(&mut self, key: &str) -> Option<Vec<VersionEntry>> {
        self.entries.remove(key)
    }

    /// Number of keys whose current version is a real object.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|versions| versions.first().is_some_and(|v| !v.is_delete_marker()))
            .count()
    }

    /// Whether no key has a real current version.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of version entries (objects and markers) across keys.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Iterate all `(key, versions)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<VersionEntry>)> {
        self.entries.iter()
    }

    // -----------------------------------------------------------------------
    // Listings
    // -----------------------------------------------------------------------

    /// List current versions matching `prefix`, grouping by `delimiter`,
    /// starting strictly after `marker`, with a hard `max_keys` bound.
    #[must_use]
    pub fn list_objects(
        &self,
        prefix: &str,
        delimiter: &str,
        marker: &str,
        max_keys: usize,
    ) -> ListPage {
        // A zero-sized page is empty and, by definition, not truncated.
        if max_keys == 0 {
            return ListPage {
                objects: Vec::new(),
                common_prefixes: Vec::new(),
                is_truncated: false,
                next_marker: None,
            };
        }

        let use_delim = !delimiter.is_empty();
        let mut objects: Vec<ObjectRecord> = Vec::new();
        let mut common_prefixes: Vec<String> = Vec::new();
        let mut seen_prefixes = HashSet::new();
        let mut is_truncated = false;

        for (key, versions) in &self.entries {
            if !marker.is_empty() && key.as_str() <= marker {
                continue;
            }
            if !prefix.is_empty() && !key.starts_with(prefix) {
                continue;
            }
            let Some(record) = versions.first().and_then(VersionEntry::as_object) else {
                continue;
            };

            if use_delim {
                let after_prefix = &key[prefix.len()..];
                if let Some(pos) = after_prefix.find(delimiter) {
                    let cp = format!("{}{}{}", prefix, &after_prefix[..pos], delimiter);
                    if seen_prefixes.insert(cp.clone()) {
                        if objects.len() + common_prefixes.len() >= max_keys {
                            is_truncated = true;
                            break;
                        }
                        common_prefixes.push(cp);
                    }
                    continue;
                }
            }

            if objects.len() + common_prefixes.len() >= max_keys {
                is_truncated = true;
                break;
            }
            objects.push(record.clone());
        }

        let next_marker = if is_truncated {
            objects
                .last()
                .map(|o| o.key.clone())
                .or_else(|| common_prefixes.last().cloned())
        } else {
            None
        };

        ListPage {
            objects,
            common_prefixes,
            is_truncated,
            next_marker,
        }
    }

    /// List all versions (objects and delete markers) matching `prefix`.
    ///
    /// `key_marker`/`version_id_marker` resume a prior page; entries of the
    /// marker key up to and including the marked version are skipped.
    #[must_use]
    pub fn list_versions(
        &self,
        prefix: &str,
        delimiter: &str,
        key_marker: &str,
        version_id_marker: &str,
        max_keys: usize,
    ) -> VersionListPage {
        if max_keys == 0 {
            return VersionListPage {
                versions: Vec::new(),
                common_prefixes: Vec::new(),
                is_truncated: false,
                next_key_marker: None,
                next_version_id_marker: None,
            };
        }

        let use_delim = !delimiter.is_empty();
        let mut result: Vec<VersionListEntry> = Vec::new();
        let mut common_prefixes: Vec<String> = Vec::new();
        let mut seen_prefixes = HashSet::new();
        let mut is_truncated = false;
        let mut last_key: Option<String> = None;
        let mut last_version_id: Option<String> = None;

        'outer: for (key, versions) in &self.entries {
            // Keys strictly before the marker are done; the marker key itself
            // may still have versions to emit.
            if !key_marker.is_empty() && key.as_str() < key_marker {
                continue;
            }
            if !key_marker.is_empty() && key.as_str() == key_marker && version_id_marker.is_empty()
            {
                continue;
            }
            if !prefix.is_empty() && !key.starts_with(prefix) {
                continue;
            }

            if use_delim {
                let after_prefix = &key[prefix.len()..];
                if let Some(pos) = after_prefix.find(delimiter) {
                    let cp = format!("{}{}{}", prefix, &after_prefix[..pos], delimiter);
                    if seen_prefixes.insert(cp.clone()) {
                        common_prefixes.push(cp);
                    }
                    continue;
                }
            }

            let mut skipping = key.as_str() == key_marker && !version_id_marker.is_empty();
            for (idx, version) in versions.iter().enumerate() {
                if skipping {
                    if version.version_id() == version_id_marker {
                        skipping = false;
                    }
                    continue;
                }

                if result.len() >= max_keys {
                    is_truncated = true;
                    break 'outer;
                }

                last_key = Some(key.clone());
                last_version_id = Some(version.version_id().to_owned());
                result.push(VersionListEntry {
                    version: version.clone(),
                    is_latest: idx == 0,
                });
            }
        }

        VersionListPage {
            versions: result,
            common_prefixes,
            is_truncated,
            next_key_marker: if is_truncated { last_key } else { None },
            next_version_id_marker: if is_truncated { last_version_id } else { None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRecord;
    use openep_dedup::Fingerprint;

    fn record(key: &str, version_id: &str) -> ObjectRecord {
        ObjectRecord {
            key: key.to_owned(),
            version_id: version_id.to_owned(),
            fingerprint: Fingerprint::of(key.as_bytes()),
            size: 1,
            etag: "\"00\"".to_owned(),
            created_at: Utc::now(),
            storage_class: "STANDARD".to_owned(),
            user_metadata: std::collections::HashMap::new(),
            tags: Vec::new(),
            owner: Owner::default(),
            retention: None,
            legal_hold: false,
        }
    }

    #[test]
    fn test_should_replace_history_on_sole_put() {
        let mut ks = KeySpace::default();
        assert!(ks.put_sole(record("k", NULL_VERSION_ID)).is_none());
        let displaced = ks.put_sole(record("k", NULL_VERSION_ID));
        assert!(displaced.is_some());
        assert_eq!(ks.version_count(), 1);
    }

    #[test]
    fn test_should_stack_versions_newest_first() {
        let mut ks = KeySpace::default();
        ks.put_versioned(record("k", "v1"));
        ks.put_versioned(record("k", "v2"));

        assert_eq!(ks.current("k").map(|r| r.version_id.as_str()), Some("v2"));
        assert!(ks.get("k", "v1").is_some());
        assert_eq!(ks.version_count(), 2);
    }

    #[test]
    fn test_should_overwrite_null_version_when_suspended() {
        let mut ks = KeySpace::default();
        ks.put_versioned(record("k", "v1"));
        // Suspended writes overwrite the null slot, leaving v1 readable.
        assert!(ks.put_null(record("k", NULL_VERSION_ID)).is_none());
        let displaced = ks.put_null(record("k", NULL_VERSION_ID));
        assert!(displaced.is_some());

        assert_eq!(ks.version_count(), 2);
        assert!(ks.get("k", "v1").is_some());
        assert_eq!(
            ks.current("k").map(|r| r.version_id.as_str()),
            Some(NULL_VERSION_ID)
        );
    }

    #[test]
    fn test_should_hide_key_behind_delete_marker() {
        let mut ks = KeySpace::default();
        ks.put_versioned(record("k", "v1"));
        let (marker, had) = ks.insert_marker("k", "v2".to_owned(), &Owner::default());
        assert!(had);
        assert_eq!(marker.version_id, "v2");

        assert!(ks.current("k").is_none());
        assert_eq!(ks.len(), 0);
        // The marker and the old version are both listed.
        assert_eq!(ks.version_count(), 2);
    }

    #[test]
    fn test_should_remove_specific_version() {
        let mut ks = KeySpace::default();
        ks.put_versioned(record("k", "v1"));
        ks.put_versioned(record("k", "v2"));

        let removed = ks.remove_version("k", "v2");
        assert!(removed.is_some());
        // The older version becomes current again.
        assert_eq!(ks.current("k").map(|r| r.version_id.as_str()), Some("v1"));

        ks.remove_version("k", "v1");
        assert!(ks.iter().next().is_none());
    }

    #[test]
    fn test_should_list_objects_with_pagination() {
        let mut ks = KeySpace::default();
        for key in ["a", "b", "c", "d", "e"] {
            ks.put_sole(record(key, NULL_VERSION_ID));
        }

        let page = ks.list_objects("", "", "", 3);
        assert_eq!(page.objects.len(), 3);
        assert!(page.is_truncated);
        assert_eq!(page.next_marker.as_deref(), Some("c"));

        let page = ks.list_objects("", "", "c", 10);
        assert_eq!(page.objects.len(), 2);
        assert!(!page.is_truncated);
        assert!(page.next_marker.is_none());
    }

    #[test]
    fn test_should_group_common_prefixes() {
        let mut ks = KeySpace::default();
        for key in [
            "photos/2023/jan.jpg",
            "photos/2023/feb.jpg",
            "photos/2024/mar.jpg",
            "docs/readme.txt",
        ] {
            ks.put_sole(record(key, NULL_VERSION_ID));
        }

        let page = ks.list_objects("photos/", "/", "", 100);
        assert!(page.objects.is_empty());
        assert_eq!(
            page.common_prefixes,
            vec!["photos/2023/".to_owned(), "photos/2024/".to_owned()]
        );

        let page = ks.list_objects("photos/2023/", "/", "", 100);
        assert_eq!(page.objects.len(), 2);
        assert!(page.common_prefixes.is_empty());
    }

    #[test]
    fn test_should_return_empty_page_for_zero_max_keys() {
        let mut ks = KeySpace::default();
        ks.put_sole(record("a", NULL_VERSION_ID));

        let page = ks.list_objects("", "", "", 0);
        assert!(page.objects.is_empty());
        assert!(!page.is_truncated);

        let versions = ks.list_versions("", "", "", "", 0);
        assert!(versions.versions.is_empty());
        assert!(!versions.is_truncated);
    }

    #[test]
    fn test_should_exclude_delete_markered_keys_from_listing() {
        let mut ks = KeySpace::default();
        ks.put_versioned(record("visible", "v1"));
        ks.put_versioned(record("hidden", "v1"));
        ks.insert_marker("hidden", "v2".to_owned(), &Owner::default());

        let page = ks.list_objects("", "", "", 100);
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "visible");
    }

    #[test]
    fn test_should_list_versions_newest_first_per_key() {
        let mut ks = KeySpace::default();
        ks.put_versioned(record("k", "v1"));
        ks.put_versioned(record("k", "v2"));
        ks.insert_marker("k", "v3".to_owned(), &Owner::default());
        ks.put_versioned(record("k", "v4"));

        let page = ks.list_versions("", "", "", "", 100);
        let ids: Vec<&str> = page.versions.iter().map(|e| e.version.version_id()).collect();
        assert_eq!(ids, vec!["v4", "v3", "v2", "v1"]);
        assert!(page.versions[0].is_latest);
        assert!(page.versions[1].version.is_delete_marker());
        assert!(!page.versions[1].is_latest);
    }

    #[test]
    fn test_should_paginate_versions_with_markers() {
        let mut ks = KeySpace::default();
        ks.put_versioned(record("k", "v1"));
        ks.put_versioned(record("k", "v2"));
        ks.put_versioned(record("z", "v1"));

        let first = ks.list_versions("", "", "", "", 2);
        assert_eq!(first.versions.len(), 2);
        assert!(first.is_truncated);
        let key_marker = first.next_key_marker.clone().unwrap_or_default();
        let vid_marker = first.next_version_id_marker.clone().unwrap_or_default();

        let second = ks.list_versions("", "", &key_marker, &vid_marker, 2);
        assert_eq!(second.versions.len(), 1);
        assert!(!second.is_truncated);
        assert_eq!(second.versions[0].version.key(), "z");
    }
}
