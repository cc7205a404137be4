//! The invocation log: an append-only record of every completed operation.
//!
//! Every action call in the system - whether issued by the external boundary
//! or by a rule's then-clause - ends up here exactly once, together with its
//! input, its output (success or error), and its causal lineage. Rules never
//! observe components directly; they observe this log.
//!
//! # Guarantees
//!
//! - **Append-only**: invocations are immutable once logged, never deleted.
//! - **Monotonic ids**: `InvocationId`s increase in append order, so causal
//!   parents always have smaller ids than their children.
//! - **Process-lifetime retention**: the log grows for the life of the
//!   process. Bounded retention is a host concern, not a correctness one.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use smallvec::SmallVec;

use crate::component::OpOutcome;
use crate::value::Args;

/// Identifier of one logged invocation.
///
/// Monotonically increasing within a process. The ordering is append order,
/// which by construction is also a topological order of the causal graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvocationId(u64);

impl InvocationId {
    /// Construct from a raw id. Intended for tests and diagnostics.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reference to one operation of one component, e.g. `accounts.register`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpRef {
    /// Component name.
    pub component: String,
    /// Operation name within the component.
    pub operation: String,
}

impl OpRef {
    /// Create an operation reference.
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for OpRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.operation)
    }
}

/// Set of causal parents. Most invocations have very few.
pub type ParentSet = SmallVec<[InvocationId; 4]>;

/// One completed operation call.
///
/// Immutable once logged. `root` caches the id of the external trigger this
/// invocation descends from; two invocations with different roots belong to
/// unrelated cascades and are never joined by the matcher.
#[derive(Debug)]
pub struct Invocation {
    /// Monotonic id assigned at append time.
    pub id: InvocationId,
    /// Which operation completed.
    pub op: OpRef,
    /// The input the operation received.
    pub input: Args,
    /// The result: a named-value map on success, an error string on failure.
    pub output: OpOutcome,
    /// Causal parents - the support set of the frame that dispatched this,
    /// empty for external triggers.
    pub caused_by: ParentSet,
    /// The external trigger at the root of this invocation's cascade.
    /// Equal to `id` for external triggers themselves.
    pub root: InvocationId,
    /// Wall-clock append time.
    pub timestamp: DateTime<Utc>,
}

impl Invocation {
    /// True if this invocation is its own cascade root (an external trigger).
    pub fn is_root(&self) -> bool {
        self.root == self.id
    }
}

/// Process-wide append-only store of invocations.
///
/// Two access paths:
/// - by id, for causal walks;
/// - by `(component, operation)`, the candidate index the matcher uses so a
///   rule evaluation never scans the full log.
#[derive(Default)]
pub struct InvocationLog {
    entries: RwLock<Vec<Arc<Invocation>>>,
    by_op: DashMap<OpRef, Vec<InvocationId>>,
}

impl InvocationLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an external trigger: an invocation with no causal parents,
    /// which becomes the root of its own cascade.
    pub fn append_root(&self, op: OpRef, input: Args, output: OpOutcome) -> Arc<Invocation> {
        self.append_inner(op, input, output, ParentSet::new(), None)
    }

    /// Append an invocation dispatched by a rule, inheriting the cascade
    /// root from its parents.
    ///
    /// # Panics
    ///
    /// Panics if `caused_by` is empty or names an unknown invocation -
    /// dispatch only ever passes a frame's support set, which is non-empty
    /// and was read from this log.
    pub fn append_caused(
        &self,
        op: OpRef,
        input: Args,
        output: OpOutcome,
        caused_by: ParentSet,
    ) -> Arc<Invocation> {
        let first = caused_by
            .first()
            .expect("dispatched invocation must have at least one causal parent");
        let root = self
            .get(*first)
            .expect("causal parent must already be logged")
            .root;
        self.append_inner(op, input, output, caused_by, Some(root))
    }

    fn append_inner(
        &self,
        op: OpRef,
        input: Args,
        output: OpOutcome,
        caused_by: ParentSet,
        root: Option<InvocationId>,
    ) -> Arc<Invocation> {
        // The id is the arena index, so both it and the candidate-index
        // entry are recorded under the same lock that appends; otherwise
        // concurrent appends could interleave id assignment, push order,
        // or the per-op id lists. `candidates` never holds a `by_op` guard
        // while waiting on `entries`, so the nesting cannot deadlock.
        let mut entries = self.entries.write().expect("invocation log poisoned");
        let id = InvocationId(entries.len() as u64);
        let inv = Arc::new(Invocation {
            id,
            op: op.clone(),
            input,
            output,
            caused_by,
            root: root.unwrap_or(id),
            timestamp: Utc::now(),
        });
        entries.push(inv.clone());
        self.by_op.entry(op).or_default().push(id);

        inv
    }

    /// Look up an invocation by id.
    pub fn get(&self, id: InvocationId) -> Option<Arc<Invocation>> {
        let entries = self.entries.read().expect("invocation log poisoned");
        entries.get(id.0 as usize).cloned()
    }

    /// All invocations of one operation, in append order.
    pub fn candidates(&self, op: &OpRef) -> Vec<Arc<Invocation>> {
        // Copy the id list out so the map guard is released before the
        // arena lock is taken; `append_inner` nests them the other way.
        let ids: Vec<InvocationId> = match self.by_op.get(op) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        let entries = self.entries.read().expect("invocation log poisoned");
        ids.iter()
            .filter_map(|id| entries.get(id.0 as usize).cloned())
            .collect()
    }

    /// Number of logged invocations.
    pub fn len(&self) -> usize {
        self.entries.read().expect("invocation log poisoned").len()
    }

    /// True if nothing has been logged yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The transitive causal ancestors of `id` (not including `id` itself).
    ///
    /// Parents always have smaller ids than children, so the walk strictly
    /// descends and terminates.
    pub fn ancestors(&self, id: InvocationId) -> HashSet<InvocationId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<InvocationId> = match self.get(id) {
            Some(inv) => inv.caused_by.to_vec(),
            None => return seen,
        };
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                if let Some(inv) = self.get(next) {
                    stack.extend(inv.caused_by.iter().copied());
                }
            }
        }
        seen
    }

    /// True if `a` and `b` lie on one causal line: equal, or one is an
    /// ancestor of the other.
    ///
    /// This is the join constraint of the matcher - patterns within one rule
    /// describe one causally linked episode, not coincidental events.
    pub fn causally_related(&self, a: InvocationId, b: InvocationId) -> bool {
        if a == b {
            return true;
        }
        // Only the later invocation can descend from the earlier one.
        let (earlier, later) = if a < b { (a, b) } else { (b, a) };
        self.ancestors(later).contains(&earlier)
    }
}

impl fmt::Debug for InvocationLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationLog")
            .field("len", &self.len())
            .finish()
    }
}
