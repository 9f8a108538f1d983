//! Content fingerprints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 digest of a blob's full contents.
///
/// Equal fingerprints are treated as equal bytes; the collision probability
/// is negligible at this digest width.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Compute the fingerprint of a payload.
    #[must_use]
    pub fn of(payload: &[u8]) -> Self {
        let digest = Sha256::digest(payload);
        Self(digest.into())
    }

    /// The raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The stripe index for a lock table of `stripes` shards.
    #[must_use]
    pub fn stripe(&self, stripes: usize) -> usize {
        usize::from(self.0[0]) % stripes.max(1)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Error returned when parsing a [`Fingerprint`] from hex fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid fingerprint: {0}")]
pub struct ParseFingerprintError(String);

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|_| ParseFingerprintError(s.to_owned()))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| ParseFingerprintError(s.to_owned()))?;
        Ok(Self(bytes))
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_string()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = ParseFingerprintError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
