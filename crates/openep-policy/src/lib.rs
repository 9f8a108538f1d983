//! Bucket policy and IAM evaluation for OpenEndpoint.
//!
//! Policies are AWS-shaped JSON documents of statements
//! `{Effect, Principal, Action, Resource, Condition?}`. The evaluator
//! applies the standard three-step decision: any matching explicit Deny
//! wins, then any matching Allow, then default-deny.

mod condition;
mod evaluator;
mod model;

pub use condition::{ConditionBlock, ConditionOperator};
pub use evaluator::{AccessRequest, Decision, EvalOutcome, IamStore, evaluate, evaluate_detailed};
pub use model::{Effect, PolicyDocument, Statement, ValueSet, validate_policy};
