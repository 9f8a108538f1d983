//! Policy document model and validation.
//!
//! Mirrors the AWS policy JSON shape: single strings and arrays are
//! interchangeable for `Principal`, `Action`, and `Resource` (see
//! [`ValueSet`]), and serialization round-trips are stable up to statement
//! order.

use serde::{Deserialize, Serialize};

use openep_core::{EndpointError, EndpointResult};

use crate::condition::ConditionBlock;

/// Default policy language version.
const POLICY_VERSION: &str = "2012-10-17";

// ---------------------------------------------------------------------------
// ValueSet
// ---------------------------------------------------------------------------

/// One-or-many strings, matching the policy JSON convention where
/// `"Action": "s3:GetObject"` and `"Action": ["s3:GetObject"]` are
/// equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSet {
    /// A single value.
    One(String),
    /// A list of values.
    Many(Vec<String>),
}

impl ValueSet {
    /// Iterate the contained values.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values = match self {
            Self::One(v) => std::slice::from_ref(v),
            Self::Many(vs) => vs.as_slice(),
        };
        values.iter().map(String::as_str)
    }

    /// Whether the set contains zero values (or only empty strings).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().all(str::is_empty)
    }
}

impl From<&str> for ValueSet {
    fn from(v: &str) -> Self {
        Self::One(v.to_owned())
    }
}

impl From<Vec<String>> for ValueSet {
    fn from(vs: Vec<String>) -> Self {
        Self::Many(vs)
    }
}

// ---------------------------------------------------------------------------
// Effect / Statement / PolicyDocument
// ---------------------------------------------------------------------------

/// Statement effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// The statement grants access when it matches.
    Allow,
    /// The statement forbids access when it matches; explicit denies win.
    Deny,
}

/// One policy statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Optional statement identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Allow or Deny.
    pub effect: Effect,
    /// Principals the statement applies to (`*` matches everyone).
    pub principal: ValueSet,
    /// Actions matched (exact or trailing-`*` prefix, e.g. `s3:Get*`).
    pub action: ValueSet,
    /// Resource ARNs matched (`arn:aws:s3:::bucket/*` covers all objects).
    pub resource: ValueSet,
    /// Optional condition block; every operator must evaluate true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionBlock>,
}

/// A full policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Policy language version.
    #[serde(default = "default_version")]
    pub version: String,
    /// The statements, evaluated as one pool (order does not matter).
    pub statement: Vec<Statement>,
}

fn default_version() -> String {
    POLICY_VERSION.to_owned()
}

impl PolicyDocument {
    /// Build a document from statements with the default version.
    #[must_use]
    pub fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: default_version(),
            statement,
        }
    }

    /// Parse a policy from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::InvalidArgument`] on malformed JSON or a
    /// document that fails [`validate_policy`].
    pub fn from_json(raw: &str) -> EndpointResult<Self> {
        let doc: Self = serde_json::from_str(raw)
            .map_err(|e| EndpointError::invalid_argument(format!("malformed policy: {e}")))?;
        validate_policy(&doc)?;
        Ok(doc)
    }

    /// Render the policy as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Internal`] if serialization fails.
    pub fn to_json(&self) -> EndpointResult<String> {
        serde_json::to_string(self)
            .map_err(|e| EndpointError::Internal(anyhow::anyhow!("policy serialization: {e}")))
    }
}

/// Validate a policy document: at least one statement, and non-empty
/// principal, action, and resource on each.
///
/// # Errors
///
/// Returns [`EndpointError::InvalidArgument`] naming the first violation.
pub fn validate_policy(doc: &PolicyDocument) -> EndpointResult<()> {
    if doc.statement.is_empty() {
        return Err(EndpointError::invalid_argument(
            "policy must contain at least one statement",
        ));
    }
    for (i, statement) in doc.statement.iter().enumerate() {
        if statement.principal.is_empty() {
            return Err(EndpointError::invalid_argument(format!(
                "statement {i}: principal must not be empty"
            )));
        }
        if statement.action.is_empty() {
            return Err(EndpointError::invalid_argument(format!(
                "statement {i}: action must not be empty"
            )));
        }
        if statement.resource.is_empty() {
            return Err(EndpointError::invalid_argument(format!(
                "statement {i}: resource must not be empty"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "Version": "2012-10-17",
            "Statement": [
                {
                    "Effect": "Allow",
                    "Principal": "*",
                    "Action": ["s3:GetObject", "s3:PutObject"],
                    "Resource": "arn:aws:s3:::photos/*"
                },
                {
                    "Effect": "Deny",
                    "Principal": "*",
                    "Action": "s3:*",
                    "Resource": "arn:aws:s3:::photos/private/*"
                }
            ]
        }"#
    }

    #[test]
    fn test_should_parse_aws_shaped_policy() {
        let doc = PolicyDocument::from_json(sample_json()).expect("parse policy");
        assert_eq!(doc.version, "2012-10-17");
        assert_eq!(doc.statement.len(), 2);
        assert_eq!(doc.statement[0].effect, Effect::Allow);
        assert_eq!(doc.statement[1].effect, Effect::Deny);
        assert_eq!(
            doc.statement[0].action.iter().collect::<Vec<_>>(),
            vec!["s3:GetObject", "s3:PutObject"]
        );
    }

    #[test]
    fn test_should_roundtrip_policy_json() {
        let doc = PolicyDocument::from_json(sample_json()).expect("parse policy");
        let json = doc.to_json().expect("serialize");
        let reparsed = PolicyDocument::from_json(&json).expect("reparse");
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn test_should_default_missing_version() {
        let doc = PolicyDocument::from_json(
            r#"{"Statement": [{"Effect": "Allow", "Principal": "*", "Action": "s3:GetObject", "Resource": "*"}]}"#,
        )
        .expect("parse");
        assert_eq!(doc.version, "2012-10-17");
    }

    #[test]
    fn test_should_reject_empty_statement_list() {
        let result = PolicyDocument::from_json(r#"{"Statement": []}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_should_reject_empty_principal() {
        let result = PolicyDocument::from_json(
            r#"{"Statement": [{"Effect": "Allow", "Principal": "", "Action": "s3:GetObject", "Resource": "*"}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_should_reject_empty_action_list() {
        let result = PolicyDocument::from_json(
            r#"{"Statement": [{"Effect": "Allow", "Principal": "*", "Action": [], "Resource": "*"}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_should_reject_unknown_effect() {
        let result = PolicyDocument::from_json(
            r#"{"Statement": [{"Effect": "Maybe", "Principal": "*", "Action": "s3:GetObject", "Resource": "*"}]}"#,
        );
        assert!(result.is_err());
    }
}
