//! Components: independent state modules exposing named operations.
//!
//! Components are mutually unaware. They never call each other; all
//! cross-component behavior is produced by rules observing the invocation
//! log. The engine's entire view of a component is this trait: one input
//! map in, one output map (or error value) out.
//!
//! # Actions vs. queries
//!
//! Operations come in two kinds, distinguished by a naming convention:
//!
//! | Kind   | Naming          | Logged? | Matchable? | Callable from enrichment? |
//! |--------|-----------------|---------|------------|---------------------------|
//! | Action | `register`      | yes     | yes        | no                        |
//! | Query  | `_lookup`       | no      | no         | yes                       |
//!
//! Queries are read-only lookups used by enrichment clauses; keeping them
//! out of the log is what prevents enrichment from feeding back into the
//! rule pipeline.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::ConcordError;
use crate::value::{Args, Value};

/// Result of one operation call: a structured value map, or a distinguished
/// error value.
///
/// Both variants are logged the same way; an error outcome is a fact other
/// rules may react to, not an exception.
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome {
    /// The operation completed and returned these named values.
    Completed(Args),
    /// The operation refused or failed, with a reason.
    Error(String),
}

impl OpOutcome {
    /// Success outcome from an argument map.
    pub fn ok(fields: Args) -> Self {
        Self::Completed(fields)
    }

    /// Error outcome from a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// True if this is an error outcome.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Fetch an output field.
    ///
    /// Error outcomes expose exactly one field, `error`, holding the
    /// message - this is what makes error invocations matchable by
    /// patterns like `{ error: ?reason }`.
    pub fn get(&self, field: &str) -> Option<Value> {
        match self {
            Self::Completed(fields) => fields.get(field).cloned(),
            Self::Error(message) if field == "error" => Some(Value::from(message.as_str())),
            Self::Error(_) => None,
        }
    }
}

/// An independent state module exposing named operations.
///
/// Implementations own their state and their own concurrency control; the
/// engine imposes no locking across components and relies on each
/// operation being individually atomic.
///
/// # Example
///
/// ```ignore
/// struct Counter {
///     count: AtomicI64,
/// }
///
/// #[async_trait]
/// impl Component for Counter {
///     fn name(&self) -> &str {
///         "counter"
///     }
///
///     async fn call(&self, operation: &str, input: Args) -> OpOutcome {
///         match operation {
///             "increment" => {
///                 let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
///                 OpOutcome::ok(args! { "count" => n })
///             }
///             "_current" => OpOutcome::ok(args! {
///                 "count" => self.count.load(Ordering::SeqCst)
///             }),
///             other => OpOutcome::error(format!("unknown operation {other}")),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// The name this component registers under.
    fn name(&self) -> &str;

    /// Execute one operation.
    ///
    /// Unknown operations should return an error outcome, not panic - the
    /// engine treats the return value as data either way.
    async fn call(&self, operation: &str, input: Args) -> OpOutcome;
}

/// True if the operation name denotes a read-only query.
pub fn is_query(operation: &str) -> bool {
    operation.starts_with('_')
}

/// Registry of components by name.
///
/// Populated once through the engine builder; read-only afterwards.
#[derive(Default)]
pub struct ComponentMap {
    inner: DashMap<String, Arc<dyn Component>>,
}

impl ComponentMap {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component under its own name.
    pub fn register(&self, component: Arc<dyn Component>) -> Result<(), ConcordError> {
        let name = component.name().to_string();
        if self.inner.contains_key(&name) {
            return Err(ConcordError::DuplicateComponent { name });
        }
        self.inner.insert(name, component);
        Ok(())
    }

    /// Look up a component by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Component>, ConcordError> {
        self.inner
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| ConcordError::UnknownComponent {
                name: name.to_string(),
            })
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if no components are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for ComponentMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentMap")
            .field("len", &self.inner.len())
            .finish()
    }
}
