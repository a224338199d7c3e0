//! Condition evaluation against a factor map.
//!
//! # Evaluation Semantics
//!
//! - A factor missing from the map reads as `0.0`
//! - Comparisons are plain IEEE-754; `==` is exact and NaN compares false
//! - `AND` short-circuits on the first `false`
//! - The empty condition is `true`

use crate::domain::condition::{Comparison, Condition};
use crate::domain::condition_parser::parse;
use crate::domain::factor::FactorMap;
use tracing::warn;

/// One comparison with the value it was checked against.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonOutcome {
    pub comparison: Comparison,
    pub actual: f64,
    pub present: bool,
    pub passed: bool,
}

fn resolve(comparison: &Comparison, factors: &FactorMap) -> Option<f64> {
    factors.get_canonical(&comparison.factor)
}

pub fn evaluate_condition(condition: &Condition, factors: &FactorMap) -> bool {
    for c in &condition.comparisons {
        let actual = resolve(c, factors).unwrap_or(0.0);
        if !c.op.apply(actual, c.value) {
            return false;
        }
    }
    true
}

impl Condition {
    pub fn evaluate(&self, factors: &FactorMap) -> bool {
        evaluate_condition(self, factors)
    }
}

/// Parse and evaluate in one step.
///
/// Never fails: a malformed expression is logged and evaluates to `false`.
pub fn evaluate(expression: &str, factors: &FactorMap) -> bool {
    match parse(expression) {
        Ok(condition) => evaluate_condition(&condition, factors),
        Err(e) => {
            warn!(expression, error = %e, "malformed condition, evaluating as false");
            false
        }
    }
}

/// Evaluate every comparison without short-circuiting, for diagnostics.
pub fn explain(condition: &Condition, factors: &FactorMap) -> Vec<ComparisonOutcome> {
    condition
        .comparisons
        .iter()
        .map(|c| {
            let value = resolve(c, factors);
            let actual = value.unwrap_or(0.0);
            ComparisonOutcome {
                comparison: c.clone(),
                actual,
                present: value.is_some(),
                passed: c.op.apply(actual, c.value),
            }
        })
        .collect()
}
