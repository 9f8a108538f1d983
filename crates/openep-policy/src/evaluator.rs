//! The access decision algorithm.
//!
//! For a request `(principal, action, resource, context)` against the pool
//! of applicable statements (the bucket policy plus IAM policies attached
//! to the principal):
//!
//! 1. any matching `Deny` statement → **Deny** (explicit deny wins);
//! 2. else any matching `Allow` statement → **Allow**;
//! 3. else → **Deny** (default-deny).

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::debug;

use openep_core::Principal;

use crate::condition::evaluate_conditions;
use crate::model::{Effect, PolicyDocument, Statement};

/// The outcome of an access evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is allowed.
    Allow,
    /// The request is denied (explicitly or by default).
    Deny,
}

impl Decision {
    /// Whether the decision permits the request.
    #[must_use]
    pub fn is_allowed(self) -> bool {
        self == Self::Allow
    }
}

/// An access request under evaluation.
#[derive(Debug, Clone)]
pub struct AccessRequest<'a> {
    /// The authenticated principal.
    pub principal: &'a Principal,
    /// The attempted action (e.g. `s3:GetObject`).
    pub action: &'a str,
    /// The target resource ARN (e.g. `arn:aws:s3:::bucket/key`).
    pub resource: &'a str,
    /// The request context bag for condition evaluation.
    pub context: &'a HashMap<String, String>,
}

/// A decision with the reason for a denial, used where bucket-owner
/// semantics distinguish an explicit deny from the default one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalOutcome {
    /// A matching `Allow` statement and no matching `Deny`.
    Allow,
    /// A matching `Deny` statement; binds even the bucket owner.
    ExplicitDeny,
    /// No statement matched; default-deny.
    ImplicitDeny,
}

/// Evaluate a request against a pool of policy documents.
#[must_use]
pub fn evaluate(policies: &[&PolicyDocument], request: &AccessRequest<'_>) -> Decision {
    match evaluate_detailed(policies, request) {
        EvalOutcome::Allow => Decision::Allow,
        EvalOutcome::ExplicitDeny | EvalOutcome::ImplicitDeny => Decision::Deny,
    }
}

/// Evaluate a request, keeping the denial reason.
#[must_use]
pub fn evaluate_detailed(policies: &[&PolicyDocument], request: &AccessRequest<'_>) -> EvalOutcome {
    let mut allowed = false;
    for statement in policies.iter().flat_map(|p| p.statement.iter()) {
        if !statement_matches(statement, request) {
            continue;
        }
        match statement.effect {
            Effect::Deny => {
                debug!(
                    principal = %request.principal,
                    action = request.action,
                    resource = request.resource,
                    sid = statement.sid.as_deref().unwrap_or(""),
                    "explicit deny"
                );
                return EvalOutcome::ExplicitDeny;
            }
            Effect::Allow => allowed = true,
        }
    }
    if allowed {
        EvalOutcome::Allow
    } else {
        EvalOutcome::ImplicitDeny
    }
}

/// Whether a statement matches the request: principal, action, and resource
/// all match, and every condition holds.
fn statement_matches(statement: &Statement, request: &AccessRequest<'_>) -> bool {
    let principal_matches = statement
        .principal
        .iter()
        .any(|p| matches_pattern(p, &request.principal.id));
    if !principal_matches {
        return false;
    }

    let action_matches = statement
        .action
        .iter()
        .any(|a| matches_pattern(a, request.action));
    if !action_matches {
        return false;
    }

    let resource_matches = statement
        .resource
        .iter()
        .any(|r| matches_pattern(r, request.resource));
    if !resource_matches {
        return false;
    }

    statement
        .condition
        .as_ref()
        .is_none_or(|block| evaluate_conditions(block, request.context))
}

/// Exact match, or trailing-`*` prefix match; bare `*` matches everything.
fn matches_pattern(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

// ---------------------------------------------------------------------------
// IamStore
// ---------------------------------------------------------------------------

/// IAM policies attached to principals.
///
/// The pipeline combines these with the target bucket's policy when
/// evaluating a request.
#[derive(Debug, Default)]
pub struct IamStore {
    attached: DashMap<String, Vec<PolicyDocument>>,
}

impl IamStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a policy to a principal ID.
    pub fn attach(&self, principal_id: impl Into<String>, policy: PolicyDocument) {
        self.attached.entry(principal_id.into()).or_default().push(policy);
    }

    /// Policies attached to the given principal (clones; evaluation pools
    /// them with the bucket policy).
    #[must_use]
    pub fn policies_for(&self, principal_id: &str) -> Vec<PolicyDocument> {
        self.attached
            .get(principal_id)
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}
