//! Lifecycle filter matching.

use chrono::{DateTime, Duration, Utc};

use openep_meta::LifecycleFilter;

/// Whether a version matches a lifecycle filter.
///
/// All present fields must hold: the key carries the prefix, the version
/// carries every filter tag, and the size falls inside the configured
/// bounds (both exclusive).
#[must_use]
pub fn filter_matches(
    filter: &LifecycleFilter,
    key: &str,
    size: u64,
    tags: &[(String, String)],
) -> bool {
    if let Some(prefix) = &filter.prefix {
        if !key.starts_with(prefix.as_str()) {
            return false;
        }
    }
    for wanted in &filter.tags {
        if !tags.contains(wanted) {
            return false;
        }
    }
    if let Some(greater) = filter.size_greater {
        if size <= greater {
            return false;
        }
    }
    if let Some(lesser) = filter.size_lesser {
        if size >= lesser {
            return false;
        }
    }
    true
}

/// Whether a days-based threshold has elapsed for a version created at
/// `created_at`.
#[must_use]
pub fn rule_due_days(created_at: DateTime<Utc>, days: u32, now: DateTime<Utc>) -> bool {
    now - created_at >= Duration::days(i64::from(days))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(k: &str, v: &str) -> (String, String) {
        (k.to_owned(), v.to_owned())
    }

    #[test]
    fn test_should_match_empty_filter() {
        let filter = LifecycleFilter::default();
        assert!(filter_matches(&filter, "any/key", 0, &[]));
    }

    #[test]
    fn test_should_match_prefix() {
        let filter = LifecycleFilter {
            prefix: Some("tmp/".to_owned()),
            ..LifecycleFilter::default()
        };
        assert!(filter_matches(&filter, "tmp/a", 1, &[]));
        assert!(!filter_matches(&filter, "other/b", 1, &[]));
    }

    #[test]
    fn test_should_require_all_tags() {
        let filter = LifecycleFilter {
            tags: vec![tag("env", "dev"), tag("team", "infra")],
            ..LifecycleFilter::default()
        };
        assert!(filter_matches(
            &filter,
            "k",
            1,
            &[tag("env", "dev"), tag("team", "infra"), tag("extra", "x")]
        ));
        assert!(!filter_matches(&filter, "k", 1, &[tag("env", "dev")]));
    }

    #[test]
    fn test_should_bound_size_exclusively() {
        let filter = LifecycleFilter {
            size_greater: Some(100),
            size_lesser: Some(1000),
            ..LifecycleFilter::default()
        };
        assert!(filter_matches(&filter, "k", 500, &[]));
        assert!(!filter_matches(&filter, "k", 100, &[]));
        assert!(!filter_matches(&filter, "k", 1000, &[]));
    }

    #[test]
    fn test_should_compute_days_threshold() {
        let now = Utc::now();
        assert!(rule_due_days(now - Duration::days(8), 7, now));
        assert!(rule_due_days(now - Duration::days(7), 7, now));
        assert!(!rule_due_days(now - Duration::days(6), 7, now));
    }
}
