//! The dispatcher: turns a surviving frame into real operation calls.
//!
//! For each then-pattern the dispatcher resolves an input map from the
//! frame, calls the named component, and appends the result to the log
//! with the frame's support set as causal parents. Operation failures are
//! data: an error outcome is logged exactly like a success and other
//! rules may match it. A panicking component is contained the same way.

use std::sync::Arc;

use futures::FutureExt;
use smallvec::SmallVec;
use tracing::debug;

use crate::component::{ComponentMap, OpOutcome};
use crate::error::ConcordError;
use crate::frame::Frame;
use crate::invocation::{Invocation, InvocationLog};
use crate::pattern::{Pattern, PatternValue};
use crate::rule::Rule;
use crate::value::Args;

/// Resolve a then-pattern's input map against a frame.
///
/// Literals pass through; variables substitute their bound value. An
/// unbound variable *omits* its field rather than fabricating a value -
/// the called operation sees the field as absent.
pub(crate) fn resolve_input(pattern: &Pattern, frame: &Frame) -> Args {
    let mut input = Args::new();
    for (field, constraint) in &pattern.input {
        match constraint {
            PatternValue::Literal(value) => {
                input.insert(field.clone(), value.clone());
            }
            PatternValue::Variable(name) => {
                if let Some(value) = frame.get(name) {
                    input.insert(field.clone(), value.clone());
                }
            }
            // Rejected at rule build time.
            PatternValue::Wildcard => debug_assert!(false, "wildcard in then-pattern"),
        }
    }
    input
}

/// Execute every then-pattern of a rule for one frame.
///
/// Returns the newly logged invocations so the scheduler can queue them
/// for further matching. An `Err` here is a wiring fault (the rule names
/// a component that is not registered), not an operation failure.
pub(crate) async fn dispatch_frame(
    components: &ComponentMap,
    log: &InvocationLog,
    rule: &Rule,
    frame: &Frame,
) -> Result<Vec<Arc<Invocation>>, ConcordError> {
    let mut logged = Vec::with_capacity(rule.then.len());

    for pattern in &rule.then {
        let component = components.get(&pattern.op.component)?;
        let input = resolve_input(pattern, frame);

        let call = component.call(&pattern.op.operation, input.clone());
        let output = match std::panic::AssertUnwindSafe(call).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => OpOutcome::error(format!("operation {} panicked", pattern.op)),
        };

        debug!(
            rule = %rule.name,
            op = %pattern.op,
            error = output.is_error(),
            "dispatched"
        );

        let caused_by: SmallVec<[_; 4]> = frame.support().iter().copied().collect();
        logged.push(log.append_caused(pattern.op.clone(), input, output, caused_by));
    }

    Ok(logged)
}
