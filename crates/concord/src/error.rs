//! Structured error types for the engine.
//!
//! # The Error Boundary Rule
//!
//! > Failures never throw across component boundaries.
//!
//! Only conditions the *engine itself* cannot express as data become a
//! [`ConcordError`]:
//!
//! - A pattern that matches nothing is **not** an error - the matcher returns
//!   an empty frame set and the rule silently does not fire.
//! - An enrichment clause denying authorization is **not** an error - it
//!   returns an empty frame set.
//! - A component operation that fails is **not** an error either - the
//!   failure is logged as a normal invocation with an `error` output, and
//!   other rules may match it like any success.
//!
//! What remains: wiring mistakes (unknown components, invalid rules), the
//! query/action discipline, cascade depth exhaustion, and boundary timeouts.

use std::time::Duration;

use thiserror::Error;

use crate::invocation::InvocationId;

/// Structured error type for engine operations.
///
/// Each variant is pattern-matchable and carries the context needed to act
/// on it. Faults raised *inside* a rule's enrichment clause never surface
/// here - they are reported to the tracing sink and scoped to that rule's
/// frames (see `enrich`).
#[derive(Debug, Error)]
pub enum ConcordError {
    /// A cascade branch exceeded the configured depth limit.
    ///
    /// Fatal for that branch only; sibling branches and unrelated cascades
    /// continue. Almost always indicates a rule cycle (a rule whose `then`
    /// re-triggers its own `when`).
    #[error("cascade from trigger {root} exceeded depth limit {limit}")]
    CycleDetected {
        /// The external trigger whose cascade hit the limit.
        root: InvocationId,
        /// The configured maximum depth.
        limit: usize,
    },

    /// No component is registered under the given name.
    #[error("no component registered under name {name:?}")]
    UnknownComponent {
        /// The component name that failed to resolve.
        name: String,
    },

    /// A component with this name is already registered.
    #[error("component {name:?} already registered")]
    DuplicateComponent {
        /// The conflicting component name.
        name: String,
    },

    /// A rule with this name is already registered.
    #[error("rule {name:?} already registered")]
    DuplicateRule {
        /// The conflicting rule name.
        name: String,
    },

    /// A rule failed structural validation at build time.
    #[error("invalid rule {rule:?}: {reason}")]
    InvalidRule {
        /// The rule being built.
        rule: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A then-pattern tried to dispatch a query operation.
    ///
    /// Queries (operations named with a leading underscore) are read-only
    /// and never logged; dispatching one would create an unmatchable
    /// invocation and invite feedback loops.
    #[error("operation {operation:?} is a query and cannot be dispatched by a rule")]
    QueryNotDispatchable {
        /// The offending operation name.
        operation: String,
    },

    /// An enrichment clause tried to call a mutating operation.
    ///
    /// Enrichment is read-only by contract; mutating inside it breaks the
    /// at-most-once firing guarantee.
    #[error("operation {operation:?} is an action; enrichment clauses may only run queries")]
    ActionInEnrichment {
        /// The offending operation name.
        operation: String,
    },

    /// A boundary request was never answered by a `respond` dispatch.
    ///
    /// Mutations already dispatched by the cascade are *not* rolled back;
    /// effects are at-least-once, not transactional.
    #[error("request timed out after {duration:?}")]
    Timeout {
        /// How long the boundary waited.
        duration: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_detected_display() {
        let err = ConcordError::CycleDetected {
            root: InvocationId::from_raw(7),
            limit: 32,
        };
        assert!(err.to_string().contains("depth limit 32"));
        assert!(err.to_string().contains("#7"));
    }

    #[test]
    fn test_unknown_component_display() {
        let err = ConcordError::UnknownComponent {
            name: "mailer".into(),
        };
        assert!(err.to_string().contains("mailer"));
        assert!(err.to_string().contains("no component"));
    }

    #[test]
    fn test_error_is_pattern_matchable() {
        let err = ConcordError::QueryNotDispatchable {
            operation: "_lookup".into(),
        };
        match &err {
            ConcordError::QueryNotDispatchable { operation } => {
                assert_eq!(operation, "_lookup");
            }
            _ => panic!("expected QueryNotDispatchable"),
        }
    }

    #[test]
    fn test_error_can_be_downcast_from_anyhow() {
        let err: anyhow::Error = ConcordError::Timeout {
            duration: Duration::from_secs(30),
        }
        .into();
        assert!(err.downcast_ref::<ConcordError>().is_some());
    }
}
