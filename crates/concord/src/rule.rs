//! Rules: named `when / where / then` declarations.
//!
//! A rule is built once at startup through [`RuleBuilder`] and validated at
//! `finish()`; a registered rule is immutable. The builder rejects shapes
//! that could only fail later at dispatch time:
//!
//! - a rule with no when-patterns or no then-patterns,
//! - a then-pattern carrying output constraints (then-patterns describe
//!   the *input* of the dispatch; the output is whatever the component
//!   returns),
//! - a wildcard in a then-pattern (there is no value to pass through),
//! - a then-pattern naming a query operation (queries are never logged,
//!   so dispatching one would be invisible to every other rule).

use std::fmt;
use std::sync::Arc;

use crate::component::is_query;
use crate::enrich::{WhereClause, WhereFn};
use crate::error::ConcordError;
use crate::pattern::{Pattern, PatternValue};

/// One registered synchronization rule.
pub struct Rule {
    /// Unique rule name, used in logs and the fired-set.
    pub name: String,
    /// Patterns that must jointly match one causally linked episode.
    pub when: Vec<Pattern>,
    /// Optional async enrichment stage.
    pub where_clause: Option<Arc<dyn WhereClause>>,
    /// Operations to dispatch for each surviving frame.
    pub then: Vec<Pattern>,
}

impl Rule {
    /// Start building a rule.
    pub fn build(name: impl Into<String>) -> RuleBuilder {
        RuleBuilder {
            name: name.into(),
            when: Vec::new(),
            where_clause: None,
            then: Vec::new(),
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("when", &self.when)
            .field("where_clause", &self.where_clause.is_some())
            .field("then", &self.then)
            .finish()
    }
}

/// Builder for [`Rule`]. Validation happens in [`RuleBuilder::finish`].
pub struct RuleBuilder {
    name: String,
    when: Vec<Pattern>,
    where_clause: Option<Arc<dyn WhereClause>>,
    then: Vec<Pattern>,
}

impl RuleBuilder {
    /// Add one when-pattern.
    pub fn when(mut self, pattern: Pattern) -> Self {
        self.when.push(pattern);
        self
    }

    /// Add several when-patterns at once.
    pub fn when_all(mut self, patterns: impl IntoIterator<Item = Pattern>) -> Self {
        self.when.extend(patterns);
        self
    }

    /// Install an enrichment clause.
    pub fn where_clause(mut self, clause: impl WhereClause) -> Self {
        self.where_clause = Some(Arc::new(clause));
        self
    }

    /// Install an async closure as the enrichment clause.
    pub fn where_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(crate::frame::FrameSet, crate::enrich::QueryContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::frame::FrameSet> + Send + 'static,
    {
        self.where_clause(WhereFn(f))
    }

    /// Add one then-pattern.
    pub fn then(mut self, pattern: Pattern) -> Self {
        self.then.push(pattern);
        self
    }

    /// Validate and produce the rule.
    pub fn finish(self) -> Result<Rule, ConcordError> {
        let invalid = |reason: &str| ConcordError::InvalidRule {
            rule: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.when.is_empty() {
            return Err(invalid("a rule needs at least one when-pattern"));
        }
        if self.then.is_empty() {
            return Err(invalid("a rule needs at least one then-pattern"));
        }
        for pattern in &self.then {
            if is_query(&pattern.op.operation) {
                return Err(ConcordError::QueryNotDispatchable {
                    operation: pattern.op.operation.clone(),
                });
            }
            if !pattern.output.is_empty() {
                return Err(invalid(
                    "then-patterns constrain only the dispatched input, not its output",
                ));
            }
            if pattern
                .input
                .values()
                .any(|v| matches!(v, PatternValue::Wildcard))
            {
                return Err(invalid("a wildcard in a then-pattern has no value to pass"));
            }
        }

        Ok(Rule {
            name: self.name,
            when: self.when,
            where_clause: self.where_clause,
            then: self.then,
        })
    }
}
