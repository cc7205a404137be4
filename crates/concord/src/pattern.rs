//! Patterns: the declarative shape of one expected invocation.
//!
//! A pattern names a `(component, operation)` pair and constrains the
//! invocation's input and output fields. Each field constraint is a closed
//! tagged variant - literal, wildcard, or variable - and unification logic
//! operates purely over this variant.
//!
//! Patterns are pure data, built once at rule-registration time and never
//! mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;

use crate::frame::Frame;
use crate::invocation::{Invocation, OpRef};
use crate::value::Value;

/// Constraint on a single input or output field.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternValue {
    /// The observed value must equal this value exactly.
    Literal(Value),
    /// Any value matches, including an absent field.
    Wildcard,
    /// Binds the observed value to a named variable, or - if the variable
    /// is already bound in the frame - must equal the existing binding.
    Variable(String),
}

impl PatternValue {
    /// Literal constraint from anything convertible to a [`Value`].
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Variable constraint.
    pub fn var(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }
}

impl fmt::Display for PatternValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v}"),
            Self::Wildcard => write!(f, "_"),
            Self::Variable(name) => write!(f, "?{name}"),
        }
    }
}

/// The expected shape of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// Which operation this pattern observes (or, in a then-clause,
    /// dispatches).
    pub op: OpRef,
    /// Constraints on input fields. Unconstrained fields match anything.
    pub input: BTreeMap<String, PatternValue>,
    /// Constraints on output fields.
    pub output: BTreeMap<String, PatternValue>,
}

impl Pattern {
    /// Start a pattern for the given operation.
    pub fn of(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            op: OpRef::new(component, operation),
            input: BTreeMap::new(),
            output: BTreeMap::new(),
        }
    }

    /// Constrain an input field.
    pub fn with_input(mut self, field: impl Into<String>, constraint: PatternValue) -> Self {
        self.input.insert(field.into(), constraint);
        self
    }

    /// Constrain an output field.
    pub fn with_output(mut self, field: impl Into<String>, constraint: PatternValue) -> Self {
        self.output.insert(field.into(), constraint);
        self
    }

    /// Unify this pattern against one invocation under an existing partial
    /// frame.
    ///
    /// Returns the extended frame (with the invocation added to the
    /// support set) on success, or `None` if any field constraint fails.
    /// The operation reference must already have been checked by the
    /// caller's candidate lookup; it is re-verified here defensively via
    /// `debug_assert`.
    pub fn unify(&self, inv: &Invocation, frame: &Frame) -> Option<Frame> {
        debug_assert_eq!(self.op, inv.op);

        let mut current = frame.clone();
        for (field, constraint) in &self.input {
            current = unify_field(constraint, inv.input.get(field).cloned(), current)?;
        }
        for (field, constraint) in &self.output {
            current = unify_field(constraint, inv.output.get(field), current)?;
        }
        Some(current.with_support(inv.id))
    }
}

fn unify_field(constraint: &PatternValue, observed: Option<Value>, frame: Frame) -> Option<Frame> {
    match (constraint, observed) {
        (PatternValue::Wildcard, _) => Some(frame),
        (PatternValue::Literal(expected), Some(actual)) if *expected == actual => Some(frame),
        (PatternValue::Literal(_), _) => None,
        (PatternValue::Variable(name), Some(actual)) => frame.bind(name, actual),
        // A variable cannot bind to an absent field.
        (PatternValue::Variable(_), None) => None,
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        let fields = |f: &mut fmt::Formatter<'_>, map: &BTreeMap<String, PatternValue>| {
            let mut first = true;
            for (name, constraint) in map {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{name}: {constraint}")?;
                first = false;
            }
            Ok(())
        };
        write!(f, "(")?;
        fields(f, &self.input)?;
        write!(f, ") -> (")?;
        fields(f, &self.output)?;
        write!(f, ")")
    }
}
