//! The rule book: every registered rule, indexed for O(1) trigger lookup.
//!
//! Rules are inserted while the engine is being built and the book is
//! read-only afterwards. A rule is indexed under the operation of *every*
//! one of its when-patterns: a multi-pattern rule only completes when its
//! last missing invocation arrives, and that invocation can match any of
//! its patterns. The at-most-once fired-set makes re-evaluation on each
//! arrival harmless.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::ConcordError;
use crate::invocation::OpRef;
use crate::rule::Rule;

/// Registered rules with a per-operation trigger index.
#[derive(Debug, Default)]
pub struct RuleBook {
    rules: Vec<Arc<Rule>>,
    by_op: HashMap<OpRef, Vec<usize>>,
}

impl RuleBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule. Names must be unique.
    pub fn insert(&mut self, rule: Rule) -> Result<(), ConcordError> {
        if self.rules.iter().any(|r| r.name == rule.name) {
            return Err(ConcordError::DuplicateRule { name: rule.name });
        }
        let index = self.rules.len();
        let mut seen_ops = HashSet::new();
        for pattern in &rule.when {
            if seen_ops.insert(pattern.op.clone()) {
                self.by_op.entry(pattern.op.clone()).or_default().push(index);
            }
        }
        self.rules.push(Arc::new(rule));
        Ok(())
    }

    /// Rules that might fire when an invocation of `op` is logged, in
    /// registration order.
    pub fn triggered_by(&self, op: &OpRef) -> Vec<Arc<Rule>> {
        self.by_op
            .get(op)
            .map(|indices| indices.iter().map(|&i| self.rules[i].clone()).collect())
            .unwrap_or_default()
    }

    /// All rules in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.iter()
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
