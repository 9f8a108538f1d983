//! Input validation: bucket names, object keys, tags.

use std::net::Ipv4Addr;

use openep_core::{EndpointError, EndpointResult};

/// Minimum bucket name length.
const MIN_BUCKET_NAME_LEN: usize = 3;

/// Maximum bucket name length.
const MAX_BUCKET_NAME_LEN: usize = 63;

/// Maximum object key length in bytes.
const MAX_KEY_BYTES: usize = 1024;

/// Maximum number of tags per object or bucket.
const MAX_TAGS: usize = 10;

/// Maximum tag key length in characters.
const MAX_TAG_KEY_LEN: usize = 128;

/// Maximum tag value length in characters.
const MAX_TAG_VALUE_LEN: usize = 256;

/// Validate a bucket name.
///
/// Rules:
/// - 3-63 characters long
/// - Only lowercase letters, digits, hyphens, and dots
/// - Must start and end with a letter or digit
/// - No consecutive dots (`..`)
/// - Not formatted as an IPv4 address
///
/// # Errors
///
/// Returns [`EndpointError::InvalidArgument`] naming the violated rule.
///
/// # Examples
///
/// ```
/// use openep_meta::validate_bucket_name;
///
/// assert!(validate_bucket_name("my-valid-bucket").is_ok());
/// assert!(validate_bucket_name("AB").is_err());
/// ```
pub fn validate_bucket_name(name: &str) -> EndpointResult<()> {
    let len = name.len();
    if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&len) {
        return Err(EndpointError::invalid_argument(format!(
            "bucket name must be between {MIN_BUCKET_NAME_LEN} and {MAX_BUCKET_NAME_LEN} characters long"
        )));
    }

    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return Err(EndpointError::invalid_argument(
            "bucket name must only contain lowercase letters, digits, hyphens, and dots",
        ));
    }

    let first = name.as_bytes()[0];
    let last = name.as_bytes()[len - 1];
    if !(first.is_ascii_lowercase() || first.is_ascii_digit())
        || !(last.is_ascii_lowercase() || last.is_ascii_digit())
    {
        return Err(EndpointError::invalid_argument(
            "bucket name must start and end with a letter or digit",
        ));
    }

    if name.contains("..") {
        return Err(EndpointError::invalid_argument(
            "bucket name must not contain consecutive dots",
        ));
    }

    if name.parse::<Ipv4Addr>().is_ok() {
        return Err(EndpointError::invalid_argument(
            "bucket name must not be formatted as an IP address",
        ));
    }

    Ok(())
}

/// Validate an object key: 1-1024 bytes.
///
/// # Errors
///
/// Returns [`EndpointError::InvalidArgument`] for an empty or oversized key.
pub fn validate_object_key(key: &str) -> EndpointResult<()> {
    if key.is_empty() {
        return Err(EndpointError::invalid_argument(
            "object key must not be empty",
        ));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(EndpointError::invalid_argument(format!(
            "object key must not exceed {MAX_KEY_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Validate a tag set: at most 10 tags, keys 1-128 chars, values 0-256
/// chars.
///
/// # Errors
///
/// Returns [`EndpointError::InvalidArgument`] naming the first violation.
pub fn validate_tags(tags: &[(String, String)]) -> EndpointResult<()> {
    if tags.len() > MAX_TAGS {
        return Err(EndpointError::invalid_argument(format!(
            "at most {MAX_TAGS} tags are allowed, got {}",
            tags.len()
        )));
    }
    for (key, value) in tags {
        if key.is_empty() {
            return Err(EndpointError::invalid_argument(
                "tag key must not be empty",
            ));
        }
        if key.chars().count() > MAX_TAG_KEY_LEN {
            return Err(EndpointError::invalid_argument(format!(
                "tag key must not exceed {MAX_TAG_KEY_LEN} characters"
            )));
        }
        if value.chars().count() > MAX_TAG_VALUE_LEN {
            return Err(EndpointError::invalid_argument(format!(
                "tag value must not exceed {MAX_TAG_VALUE_LEN} characters"
            )));
        }
    }
    Ok(())
}
