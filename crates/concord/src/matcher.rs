//! The pattern matcher: a left-to-right join over the invocation log.
//!
//! Given a rule and a freshly logged invocation, the matcher finds every
//! consistent way the rule's when-patterns map onto logged invocations of
//! the same cascade. Each consistent assignment becomes one [`Frame`];
//! several candidates for one pattern fan out into the cross product.
//!
//! Two structural constraints keep the join from pairing coincidental
//! events:
//!
//! 1. Every matched invocation must share the trigger's cascade root.
//! 2. From the second pattern onward, a candidate must be causally related
//!    (ancestor or descendant) to at least one invocation already in the
//!    frame's support set.
//!
//! Frames whose support does not include the triggering invocation are
//! discarded: those combinations were already evaluated when their own
//! last invocation arrived.

use tracing::trace;

use crate::frame::{Frame, FrameSet};
use crate::invocation::{Invocation, InvocationLog};
use crate::rule::Rule;

/// Evaluate one rule against the log, anchored at a trigger invocation.
///
/// Returns every frame that jointly satisfies the rule's when-patterns and
/// includes `trigger` in its support. An empty result means the rule does
/// not fire for this trigger; it is not an error.
pub fn match_rule(log: &InvocationLog, rule: &Rule, trigger: &Invocation) -> FrameSet {
    let mut frames: FrameSet = vec![Frame::empty()];

    for pattern in &rule.when {
        let candidates = log.candidates(&pattern.op);
        let mut extended: FrameSet = Vec::new();

        for frame in &frames {
            for candidate in &candidates {
                if candidate.root != trigger.root {
                    continue;
                }
                let linked = frame.support().is_empty()
                    || frame
                        .support()
                        .iter()
                        .any(|&held| log.causally_related(held, candidate.id));
                if !linked {
                    continue;
                }
                if let Some(next) = pattern.unify(candidate, frame) {
                    extended.push(next);
                }
            }
        }

        if extended.is_empty() {
            trace!(rule = %rule.name, pattern = %pattern, "no candidates, rule does not fire");
            return Vec::new();
        }
        frames = extended;
    }

    // Only combinations that use the new invocation are fresh; the rest
    // fired (or failed to fire) on an earlier trigger.
    frames.retain(|frame| frame.support().contains(&trigger.id));
    frames
}
