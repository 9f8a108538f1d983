//! Condition operators and their evaluation.
//!
//! A condition block maps operators to `{context key: expected values}`.
//! A statement matches only when every operator entry evaluates true
//! against the request's context bag. A value matches an operator entry if
//! it matches *any* of the expected values.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use ip_network::IpNetwork;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::model::ValueSet;

/// Supported condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionOperator {
    /// Exact, case-sensitive string equality.
    StringEquals,
    /// Shell-glob match (`*` and `?`).
    StringLike,
    /// CIDR containment of an IP address.
    IpAddress,
    /// Numeric equality.
    NumericEquals,
    /// Numeric strictly-less-than.
    NumericLessThan,
    /// Numeric strictly-greater-than.
    NumericGreaterThan,
    /// Boolean equality.
    Bool,
    /// Key-absence check: expected `"true"` means the key must be absent.
    Null,
}

/// The `Condition` block of a statement: operator → context key → values.
pub type ConditionBlock = BTreeMap<ConditionOperator, BTreeMap<String, ValueSet>>;

/// Evaluate a full condition block against a context bag.
///
/// Every operator entry must hold for the block to hold.
#[must_use]
pub fn evaluate_conditions(block: &ConditionBlock, context: &HashMap<String, String>) -> bool {
    block.iter().all(|(op, entries)| {
        entries.iter().all(|(key, expected)| {
            let holds = evaluate_entry(*op, context.get(key.as_str()), expected);
            if !holds {
                trace!(operator = ?op, key, "condition entry did not hold");
            }
            holds
        })
    })
}

/// Evaluate one `(operator, key)` entry.
///
/// `actual` is the context value for the key (`None` when absent). All
/// operators except `Null` fail on an absent key.
fn evaluate_entry(op: ConditionOperator, actual: Option<&String>, expected: &ValueSet) -> bool {
    if op == ConditionOperator::Null {
        // "true" asserts the key is absent, "false" that it is present.
        return expected.iter().any(|want| match want {
            "true" => actual.is_none(),
            "false" => actual.is_some(),
            _ => false,
        });
    }

    let Some(actual) = actual else {
        return false;
    };

    match op {
        ConditionOperator::StringEquals => expected.iter().any(|want| want == actual),
        ConditionOperator::StringLike => expected.iter().any(|want| {
            glob::Pattern::new(want).is_ok_and(|pattern| pattern.matches(actual))
        }),
        ConditionOperator::IpAddress => {
            let Ok(ip) = actual.parse::<IpAddr>() else {
                return false;
            };
            expected.iter().any(|want| {
                want.parse::<IpNetwork>()
                    .is_ok_and(|network| cidr_contains(&network, ip))
            })
        }
        ConditionOperator::NumericEquals
        | ConditionOperator::NumericLessThan
        | ConditionOperator::NumericGreaterThan => {
            let Ok(actual) = actual.parse::<f64>() else {
                return false;
            };
            expected.iter().any(|want| {
                want.parse::<f64>().is_ok_and(|want| match op {
                    ConditionOperator::NumericEquals => (actual - want).abs() < f64::EPSILON,
                    ConditionOperator::NumericLessThan => actual < want,
                    ConditionOperator::NumericGreaterThan => actual > want,
                    _ => false,
                })
            })
        }
        ConditionOperator::Bool => {
            let Ok(actual) = actual.parse::<bool>() else {
                return false;
            };
            expected
                .iter()
                .any(|want| want.parse::<bool>().is_ok_and(|want| want == actual))
        }
        ConditionOperator::Null => false, // handled above
    }
}

/// CIDR containment across address families.
fn cidr_contains(network: &IpNetwork, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpNetwork::V4(net), IpAddr::V4(addr)) => net.contains(addr),
        (IpNetwork::V6(net), IpAddr::V6(addr)) => net.contains(addr),
        _ => false,
    }
}
