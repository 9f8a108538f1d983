//! Needle framing.
//!
//! A needle is one blob record inside a volume, laid out little-endian:
//!
//! ```text
//! 8B cookie | 8B size | 8B timestamp | size bytes payload | 4B CRC32(payload)
//! ```
//!
//! The cookie field stores the CRC32 of the blob's content fingerprint in
//! its low 4 bytes; the high 4 bytes are always zero and are validated on
//! read. The trailing CRC is validated on every read and a mismatch is a
//! corruption failure, never masked.

use chrono::Utc;

use openep_core::EndpointError;

/// Size in bytes of the fixed needle header.
pub const NEEDLE_HEADER_SIZE: usize = 24;

/// Size in bytes of the CRC32 payload trailer.
pub const NEEDLE_TRAILER_SIZE: usize = 4;

/// Derive the needle cookie from a content fingerprint.
///
/// Low 4 bytes carry `CRC32(fingerprint)`, high 4 bytes are zero.
#[must_use]
pub fn cookie_from_fingerprint(fingerprint: &[u8]) -> u64 {
    u64::from(crc32fast::hash(fingerprint))
}

/// The fixed-size needle header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleHeader {
    /// CRC32 of the content fingerprint, zero-padded to 8 bytes.
    pub cookie: u64,
    /// Payload length in bytes.
    pub size: u64,
    /// Unix-epoch seconds at append time.
    pub timestamp: u64,
}

impl NeedleHeader {
    /// Build a header for a payload of `size` bytes, stamped with the
    /// current wall-clock time.
    #[must_use]
    pub fn new(cookie: u64, size: u64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            cookie,
            size,
            timestamp: u64::try_from(now).unwrap_or(0),
        }
    }

    /// Encode the header into its 24-byte on-disk form.
    #[must_use]
    pub fn encode(&self) -> [u8; NEEDLE_HEADER_SIZE] {
        let mut buf = [0u8; NEEDLE_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.cookie.to_le_bytes());
        buf[8..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    /// Decode a header from its 24-byte on-disk form.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Corruption`] if the cookie's high 4 bytes
    /// are non-zero.
    pub fn decode(buf: &[u8; NEEDLE_HEADER_SIZE]) -> Result<Self, EndpointError> {
        let cookie = u64::from_le_bytes(buf[0..8].try_into().unwrap_or_default());
        if cookie > u64::from(u32::MAX) {
            return Err(EndpointError::Corruption {
                detail: format!("needle cookie high bytes non-zero: {cookie:#018x}"),
            });
        }
        Ok(Self {
            cookie,
            size: u64::from_le_bytes(buf[8..16].try_into().unwrap_or_default()),
            timestamp: u64::from_le_bytes(buf[16..24].try_into().unwrap_or_default()),
        })
    }

    /// Total on-disk footprint of the needle this header describes.
    #[must_use]
    pub fn total_len(&self) -> u64 {
        (NEEDLE_HEADER_SIZE + NEEDLE_TRAILER_SIZE) as u64 + self.size
    }
}

/// Total on-disk footprint of a needle for a payload of the given length.
#[must_use]
pub fn needle_len(payload_len: u64) -> u64 {
    (NEEDLE_HEADER_SIZE + NEEDLE_TRAILER_SIZE) as u64 + payload_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_roundtrip_header_encoding() {
        let header = NeedleHeader {
            cookie: 0xDEAD_BEEF,
            size: 1024,
            timestamp: 1_700_000_000,
        };
        let decoded = NeedleHeader::decode(&header.encode()).expect("decode header");
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_should_reject_cookie_with_high_bytes_set() {
        let mut buf = NeedleHeader::new(1, 0).encode();
        // Corrupt the high half of the cookie.
        buf[7] = 0xFF;
        let result = NeedleHeader::decode(&buf);
        assert!(matches!(result, Err(EndpointError::Corruption { .. })));
    }

    #[test]
    fn test_should_fit_cookie_in_low_four_bytes() {
        let cookie = cookie_from_fingerprint(b"some fingerprint bytes");
        assert!(cookie <= u64::from(u32::MAX));
        // Deterministic for equal input.
        assert_eq!(cookie, cookie_from_fingerprint(b"some fingerprint bytes"));
    }

    #[test]
    fn test_should_compute_total_needle_length() {
        assert_eq!(needle_len(0), 28);
        assert_eq!(needle_len(100), 128);
        let header = NeedleHeader::new(0, 100);
        assert_eq!(header.total_len(), 128);
    }
}
