//! Testing utilities for Concord engines.
//!
//! Engine tests need components that are boring on purpose: they record
//! what they were asked, answer from a script, and expose assertion
//! helpers so tests read as intent rather than bookkeeping.
//!
//! # Quick Start
//!
//! ```ignore
//! use concord_testing::{RecordingComponent, KvComponent};
//!
//! let mailer = Arc::new(RecordingComponent::new("mailer"));
//! let engine = Engine::builder()
//!     .component_arc(mailer.clone())
//!     .component(KvComponent::new("store"))
//!     .rule(welcome_rule())
//!     .build()?;
//!
//! engine.submit(OpRef::new("store", "set"), args! { "key" => "k", "value" => 1 }).await?;
//!
//! mailer.assert_called("welcome");
//! assert_eq!(mailer.call_count(), 1);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use concord_core::{
    args, str_arg, Args, Component, Invocation, InvocationLog, OpOutcome, OpRef, Value,
};

// =============================================================================
// Recording Component
// =============================================================================

/// One recorded call: the operation name and the input it received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// The operation that was invoked.
    pub operation: String,
    /// The input map it received.
    pub input: Args,
}

/// A component that records every call and answers from a script.
///
/// Unscripted operations echo their input back as the success outcome,
/// which keeps most tests free of setup. Scripted outcomes are consumed
/// in FIFO order per operation, so a flaky dependency is three lines:
///
/// ```ignore
/// let mailer = RecordingComponent::new("mailer")
///     .respond_with("send", OpOutcome::error("smtp unavailable"))
///     .respond_with("send", OpOutcome::ok(args! {}));
/// ```
pub struct RecordingComponent {
    name: String,
    calls: Mutex<Vec<RecordedCall>>,
    scripted: Mutex<HashMap<String, VecDeque<OpOutcome>>>,
}

impl RecordingComponent {
    /// Create a recorder registering under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a scripted outcome for one operation.
    pub fn respond_with(self, operation: impl Into<String>, outcome: OpOutcome) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .entry(operation.into())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Queue an error outcome for one operation.
    pub fn fail_on(self, operation: impl Into<String>, message: impl Into<String>) -> Self {
        self.respond_with(operation, OpOutcome::error(message))
    }

    /// Every call recorded so far, in call order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls to one operation, in call order.
    pub fn calls_of(&self, operation: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    /// True if the operation was called at least once.
    pub fn was_called(&self, operation: &str) -> bool {
        !self.calls_of(operation).is_empty()
    }

    /// Total number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The most recent input received by one operation.
    pub fn last_input(&self, operation: &str) -> Option<Args> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.operation == operation)
            .map(|c| c.input.clone())
    }

    /// Forget all recorded calls. Scripted outcomes are untouched.
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Assert the operation was called at least once.
    ///
    /// # Panics
    ///
    /// Panics with the full call list if it was not.
    pub fn assert_called(&self, operation: &str) {
        assert!(
            self.was_called(operation),
            "expected {:?}.{:?} to be called; recorded calls: {:?}",
            self.name,
            operation,
            self.calls()
        );
    }

    /// Assert the operation was never called.
    ///
    /// # Panics
    ///
    /// Panics with the offending calls if it was.
    pub fn assert_not_called(&self, operation: &str) {
        let calls = self.calls_of(operation);
        assert!(
            calls.is_empty(),
            "expected {:?}.{:?} to never be called, but saw {} call(s): {:?}",
            self.name,
            operation,
            calls.len(),
            calls
        );
    }

    /// Assert the operation was called exactly `expected` times.
    ///
    /// # Panics
    ///
    /// Panics on a count mismatch.
    pub fn assert_call_count(&self, operation: &str, expected: usize) {
        let actual = self.calls_of(operation).len();
        assert_eq!(
            actual, expected,
            "expected {expected} call(s) to {:?}.{:?}, found {actual}",
            self.name, operation
        );
    }
}

#[async_trait]
impl Component for RecordingComponent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, operation: &str, input: Args) -> OpOutcome {
        self.calls.lock().unwrap().push(RecordedCall {
            operation: operation.to_string(),
            input: input.clone(),
        });
        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or(OpOutcome::Completed(input))
    }
}

// =============================================================================
// Key-Value Component
// =============================================================================

/// An in-memory key-value component exercising both operation kinds.
///
/// Actions: `set { key, value }`, `del { key }`.
/// Queries: `_get { key }`, `_has { key }`.
pub struct KvComponent {
    name: String,
    data: Mutex<BTreeMap<String, Value>>,
}

impl KvComponent {
    /// Create a store registering under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Mutex::new(BTreeMap::new()),
        }
    }

    /// Direct read access for assertions, bypassing the query path.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().unwrap().get(key).cloned()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    /// True if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl Component for KvComponent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, operation: &str, input: Args) -> OpOutcome {
        let key = match str_arg(&input, "key") {
            Some(key) => key.to_string(),
            None => return OpOutcome::error("missing key field"),
        };
        match operation {
            "set" => {
                let Some(value) = input.get("value").cloned() else {
                    return OpOutcome::error("missing value field");
                };
                self.data.lock().unwrap().insert(key.clone(), value);
                OpOutcome::ok(args! { "key" => key })
            }
            "del" => {
                let removed = self.data.lock().unwrap().remove(&key).is_some();
                OpOutcome::ok(args! { "key" => key, "removed" => removed })
            }
            "_get" => match self.data.lock().unwrap().get(&key) {
                Some(value) => OpOutcome::ok(args! { "value" => value.clone() }),
                None => OpOutcome::error(format!("no value under key {key:?}")),
            },
            "_has" => {
                let present = self.data.lock().unwrap().contains_key(&key);
                OpOutcome::ok(args! { "present" => present })
            }
            other => OpOutcome::error(format!("unknown operation {other}")),
        }
    }
}

// =============================================================================
// Log Helpers
// =============================================================================

/// All logged invocations of one operation, in append order.
pub fn invocations_of(
    log: &InvocationLog,
    component: &str,
    operation: &str,
) -> Vec<Arc<Invocation>> {
    log.candidates(&OpRef::new(component, operation))
}

/// Assert exactly `expected` invocations of one operation were logged.
///
/// # Panics
///
/// Panics on a count mismatch.
pub fn assert_logged(log: &InvocationLog, component: &str, operation: &str, expected: usize) {
    let actual = invocations_of(log, component, operation).len();
    assert_eq!(
        actual, expected,
        "expected {expected} logged invocation(s) of {component}.{operation}, found {actual}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_recorder_echoes_by_default() {
        let recorder = RecordingComponent::new("mailer");
        let out = recorder.call("welcome", args! { "to" => "u1" }).await;
        assert_eq!(out.get("to"), Some(json!("u1")));
        assert!(recorder.was_called("welcome"));
        assert_eq!(recorder.call_count(), 1);
    }

    #[tokio::test]
    async fn test_recorder_scripted_outcomes_fifo() {
        let recorder = RecordingComponent::new("mailer")
            .fail_on("send", "smtp unavailable")
            .respond_with("send", OpOutcome::ok(args! { "delivered" => true }));

        assert!(recorder.call("send", args! {}).await.is_error());
        let second = recorder.call("send", args! {}).await;
        assert_eq!(second.get("delivered"), Some(json!(true)));
        // Script exhausted: back to echoing.
        assert!(!recorder.call("send", args! {}).await.is_error());
        recorder.assert_call_count("send", 3);
    }

    #[tokio::test]
    async fn test_recorder_last_input_and_clear() {
        let recorder = RecordingComponent::new("m");
        recorder.call("op", args! { "n" => 1 }).await;
        recorder.call("op", args! { "n" => 2 }).await;
        assert_eq!(recorder.last_input("op").unwrap()["n"], 2);

        recorder.clear();
        assert_eq!(recorder.call_count(), 0);
        recorder.assert_not_called("op");
    }

    #[test]
    #[should_panic(expected = "to be called")]
    fn test_assert_called_panics_when_missing() {
        RecordingComponent::new("m").assert_called("never");
    }

    #[tokio::test]
    async fn test_kv_set_get_roundtrip() {
        let kv = KvComponent::new("store");
        let out = kv
            .call("set", args! { "key" => "k", "value" => json!([1, 2]) })
            .await;
        assert!(!out.is_error());

        let got = kv.call("_get", args! { "key" => "k" }).await;
        assert_eq!(got.get("value"), Some(json!([1, 2])));
        assert_eq!(kv.get("k"), Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_kv_missing_key_is_error_outcome() {
        let kv = KvComponent::new("store");
        assert!(kv.call("_get", args! { "key" => "nope" }).await.is_error());
        assert!(kv.call("set", args! { "key" => "k" }).await.is_error());
        assert!(kv.call("set", args! {}).await.is_error());
    }

    #[tokio::test]
    async fn test_kv_del_and_has() {
        let kv = KvComponent::new("store");
        kv.call("set", args! { "key" => "k", "value" => 1 }).await;

        let has = kv.call("_has", args! { "key" => "k" }).await;
        assert_eq!(has.get("present"), Some(json!(true)));

        let del = kv.call("del", args! { "key" => "k" }).await;
        assert_eq!(del.get("removed"), Some(json!(true)));
        assert!(kv.is_empty());

        let again = kv.call("del", args! { "key" => "k" }).await;
        assert_eq!(again.get("removed"), Some(json!(false)));
    }

    #[test]
    fn test_log_helpers() {
        let log = InvocationLog::new();
        log.append_root(OpRef::new("a", "x"), args! {}, OpOutcome::ok(args! {}));
        log.append_root(OpRef::new("a", "x"), args! {}, OpOutcome::ok(args! {}));

        assert_eq!(invocations_of(&log, "a", "x").len(), 2);
        assert_logged(&log, "a", "x", 2);
        assert_logged(&log, "a", "y", 0);
    }
}
