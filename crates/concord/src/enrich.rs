//! Enrichment: the optional async `where` stage between matching and
//! dispatch.
//!
//! An enrichment clause receives the matcher's frames and may drop frames
//! (authorization denied, precondition not met) or return them augmented
//! with extra bindings. Its only window into the system is a
//! [`QueryContext`], which runs **queries only** - read-only operations
//! that are never logged and never matchable. Returning an empty set is
//! the ordinary way to say "do not fire"; it is not an error.
//!
//! Faults are scoped: a panic or timeout inside one rule's clause drops
//! that rule's frames, reports through `tracing`, and leaves every other
//! rule untouched.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::error;

use crate::component::{is_query, ComponentMap, OpOutcome};
use crate::error::ConcordError;
use crate::frame::FrameSet;
use crate::value::Args;

/// Read-only handle handed to enrichment clauses.
///
/// Cheap to clone; all clones share the same component registry.
#[derive(Clone)]
pub struct QueryContext {
    components: Arc<ComponentMap>,
}

impl QueryContext {
    pub(crate) fn new(components: Arc<ComponentMap>) -> Self {
        Self { components }
    }

    /// Run a query operation on a component.
    ///
    /// Rejects actions: only operations named with a leading underscore
    /// may be called here. The outcome is returned directly and never
    /// logged.
    pub async fn query(
        &self,
        component: &str,
        operation: &str,
        input: Args,
    ) -> Result<OpOutcome, ConcordError> {
        if !is_query(operation) {
            return Err(ConcordError::ActionInEnrichment {
                operation: operation.to_string(),
            });
        }
        let component = self.components.get(component)?;
        Ok(component.call(operation, input).await)
    }
}

/// A rule's `where` stage.
///
/// Implemented directly for involved logic, or via [`WhereFn`] for the
/// common closure case.
#[async_trait]
pub trait WhereClause: Send + Sync + 'static {
    /// Filter or augment the matched frames.
    async fn apply(&self, frames: FrameSet, ctx: QueryContext) -> FrameSet;
}

/// Adapter turning an async closure into a [`WhereClause`].
pub struct WhereFn<F>(pub F);

#[async_trait]
impl<F, Fut> WhereClause for WhereFn<F>
where
    F: Fn(FrameSet, QueryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FrameSet> + Send + 'static,
{
    async fn apply(&self, frames: FrameSet, ctx: QueryContext) -> FrameSet {
        (self.0)(frames, ctx).await
    }
}

/// Run one rule's clause with fault scoping.
///
/// A panic or a blown time budget inside the clause is reported as an
/// engine fault and collapses to an empty frame set for this rule only.
pub(crate) async fn run_clause(
    rule_name: &str,
    clause: &Arc<dyn WhereClause>,
    frames: FrameSet,
    ctx: QueryContext,
    budget: Duration,
) -> FrameSet {
    let fut = clause.apply(frames, ctx);
    match tokio::time::timeout(budget, std::panic::AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(frames)) => frames,
        Ok(Err(panic)) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(rule = rule_name, panic = %detail, "enrichment clause panicked, dropping frames");
            Vec::new()
        }
        Err(_) => {
            error!(rule = rule_name, budget_ms = budget.as_millis() as u64, "enrichment clause timed out, dropping frames");
            Vec::new()
        }
    }
}
