//! Frames: consistent variable-binding environments.
//!
//! A frame is one assignment of variables that jointly satisfies a rule's
//! when-patterns, together with the invocations that justify it (the
//! *support* set). Frames are produced by the matcher, transformed by
//! enrichment, and consumed by the dispatcher.
//!
//! Frames are never mutated in place - every refinement returns a new
//! frame. A frame with no bindings is still a valid frame (a rule with no
//! variables); "zero frames" is the distinct state meaning the rule does
//! not fire.

use std::collections::BTreeMap;
use std::fmt;

use smallvec::SmallVec;

use crate::invocation::InvocationId;
use crate::value::Value;

/// One consistent variable assignment plus its supporting invocations.
#[derive(Clone, PartialEq, Default)]
pub struct Frame {
    bindings: BTreeMap<String, Value>,
    support: SmallVec<[InvocationId; 4]>,
}

impl Frame {
    /// The empty frame: no bindings, no support.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a variable's bound value.
    pub fn get(&self, variable: &str) -> Option<&Value> {
        self.bindings.get(variable)
    }

    /// True if the variable is bound in this frame.
    pub fn is_bound(&self, variable: &str) -> bool {
        self.bindings.contains_key(variable)
    }

    /// All bindings, in variable-name order.
    pub fn bindings(&self) -> &BTreeMap<String, Value> {
        &self.bindings
    }

    /// The invocations justifying this frame, in the order patterns
    /// matched them.
    pub fn support(&self) -> &[InvocationId] {
        &self.support
    }

    /// Return a new frame with one additional binding.
    ///
    /// A variable, once bound, keeps its value for the frame's lifetime;
    /// attempting to rebind to a *different* value returns `None` and the
    /// caller discards the candidate. Rebinding to an equal value is a
    /// no-op that succeeds.
    #[must_use]
    pub fn bind(&self, variable: &str, value: Value) -> Option<Self> {
        match self.bindings.get(variable) {
            Some(existing) if *existing != value => None,
            Some(_) => Some(self.clone()),
            None => {
                let mut next = self.clone();
                next.bindings.insert(variable.to_string(), value);
                Some(next)
            }
        }
    }

    /// Return a new frame with an invocation appended to the support set.
    #[must_use]
    pub fn with_support(&self, id: InvocationId) -> Self {
        let mut next = self.clone();
        if !next.support.contains(&id) {
            next.support.push(id);
        }
        next
    }

    /// The support set sorted by id - the canonical key used to guarantee
    /// a (rule, support) pair fires at most once.
    pub fn support_key(&self) -> Vec<u64> {
        let mut key: Vec<u64> = self.support.iter().map(|id| id.raw()).collect();
        key.sort_unstable();
        key
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("bindings", &self.bindings)
            .field("support", &self.support)
            .finish()
    }
}

/// A possibly-empty collection of frames.
///
/// Plain `Vec`, deliberately: "zero frames" (rule does not fire) and "no
/// matching attempted" stay distinguishable at the call sites that care.
pub type FrameSet = Vec<Frame>;
