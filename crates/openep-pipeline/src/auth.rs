//! The opaque authenticator.
//!
//! Signature parsing lives at the HTTP edge; what the pipeline needs is
//! "these credentials resolve to this principal". Secret comparison goes
//! through a SHA-256 digest and [`subtle`]'s constant-time equality so a
//! length or prefix mismatch leaks no timing signal.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use openep_core::{EndpointError, EndpointResult, Principal};

/// Resolves secret keys from access key IDs.
pub trait CredentialProvider: Send + Sync {
    /// The secret key for an access key ID, if the ID is known.
    fn secret_for(&self, access_key: &str) -> Option<String>;
}

/// An in-memory credential table (config/env driven deployments, tests).
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    credentials: HashMap<String, String>,
}

impl StaticCredentials {
    /// Build from `(access_key, secret_key)` pairs.
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            credentials: pairs.into_iter().collect(),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn secret_for(&self, access_key: &str) -> Option<String> {
        self.credentials.get(access_key).cloned()
    }
}

/// The authenticator: credentials in, [`Principal`] out.
pub struct Authenticator {
    provider: Arc<dyn CredentialProvider>,
    root_access_key: String,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("root_access_key", &self.root_access_key)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Create an authenticator. `root_access_key` names the principal that
    /// owns every bucket created through this deployment.
    pub fn new(provider: Arc<dyn CredentialProvider>, root_access_key: impl Into<String>) -> Self {
        Self {
            provider,
            root_access_key: root_access_key.into(),
        }
    }

    /// Validate credentials and produce the principal identity.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Unauthenticated`] for an unknown access key
    /// or a secret mismatch; the two are indistinguishable to the caller.
    pub fn authenticate(&self, access_key: &str, secret_key: &str) -> EndpointResult<Principal> {
        let expected = self.provider.secret_for(access_key).unwrap_or_default();

        // Hash both sides so the comparison is constant-time regardless of
        // secret length.
        let expected_digest = Sha256::digest(expected.as_bytes());
        let provided_digest = Sha256::digest(secret_key.as_bytes());
        let matches: bool = expected_digest[..].ct_eq(&provided_digest[..]).into();

        if expected.is_empty() || !matches {
            return Err(EndpointError::Unauthenticated {
                reason: "credentials do not match".to_owned(),
            });
        }

        debug!(access_key, "principal authenticated");
        if access_key == self.root_access_key {
            Ok(Principal::root(access_key))
        } else {
            Ok(Principal::new(access_key))
        }
    }
}
