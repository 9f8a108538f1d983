//! ETag computation.

use md5::{Digest, Md5};

/// The quoted MD5 ETag of a single-shot payload.
#[must_use]
pub fn compute_etag(payload: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Md5::digest(payload)))
}

/// The composite multipart ETag: the MD5 of the concatenated part digests,
/// suffixed with the part count.
#[must_use]
pub fn compute_multipart_etag(part_etags: &[String]) -> String {
    let mut hasher = Md5::new();
    for etag in part_etags {
        let raw = etag.trim_matches('"');
        if let Ok(digest) = hex::decode(raw) {
            hasher.update(&digest);
        }
    }
    format!(
        "\"{}-{}\"",
        hex::encode(hasher.finalize()),
        part_etags.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_compute_known_md5_etag() {
        // MD5("") is the canonical empty digest.
        assert_eq!(compute_etag(b""), "\"d41d8cd98f00b204e9800998ecf8427e\"");
        assert_eq!(
            compute_etag(b"hello world"),
            "\"5eb63bbbe01eeed093cb22bb8f5acdc3\""
        );
    }

    #[test]
    fn test_should_suffix_composite_etag_with_part_count() {
        let parts = vec![compute_etag(b"part one"), compute_etag(b"part two")];
        let composite = compute_multipart_etag(&parts);
        assert!(composite.ends_with("-2\""));
        assert!(composite.starts_with('"'));
        // Deterministic for the same parts.
        assert_eq!(composite, compute_multipart_etag(&parts));
    }
}
