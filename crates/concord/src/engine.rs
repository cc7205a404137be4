//! The engine: components + rules + log, driven by a breadth-first
//! cascade scheduler.
//!
//! One external trigger starts one *cascade*. The scheduler drains a FIFO
//! work queue of freshly logged invocations; each popped invocation is
//! pushed through the phases
//!
//! ```text
//! Pending -> Matching -> Enriching -> Dispatching -> (queue grows) -> Drained
//! ```
//!
//! for every rule its operation can trigger. Dispatched invocations enter
//! the queue one depth level deeper than their cause; a branch that
//! reaches the depth limit is halted with [`ConcordError::CycleDetected`]
//! and the rest of the cascade continues.
//!
//! Cascades from unrelated triggers may run concurrently. The only shared
//! state is the log, the fired-set, and whatever each component keeps
//! private; all three are concurrent structures, so `Engine` is `Sync`
//! and lives behind an `Arc` in hosts that take parallel traffic.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::component::{is_query, Component, ComponentMap, OpOutcome};
use crate::dispatch::dispatch_frame;
use crate::enrich::{run_clause, QueryContext};
use crate::error::ConcordError;
use crate::invocation::{Invocation, InvocationId, InvocationLog, OpRef};
use crate::matcher::match_rule;
use crate::registry::RuleBook;
use crate::rule::Rule;
use crate::value::Args;

const DEFAULT_MAX_DEPTH: usize = 32;
const DEFAULT_ENRICH_BUDGET: Duration = Duration::from_secs(5);

/// Where an invocation currently is in its trip through the scheduler.
///
/// Carried in trace output so a cascade can be reconstructed from logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadePhase {
    /// Queued, not yet examined.
    Pending,
    /// Rules are being evaluated against the log.
    Matching,
    /// A where-clause is running.
    Enriching,
    /// Then-patterns are being executed.
    Dispatching,
    /// The cascade's queue is empty.
    Drained,
}

/// Summary of one completed cascade, returned by [`Engine::submit`].
#[derive(Debug)]
pub struct CascadeReport {
    /// The external trigger that started the cascade.
    pub root: InvocationId,
    /// Total invocations logged by the cascade, including the trigger.
    pub invocations: usize,
    /// Rule names in firing order, one entry per fired frame.
    pub fired: Vec<String>,
    /// Branches halted by the depth limit.
    pub halted_branches: usize,
}

/// Builder for [`Engine`]. Registration happens here; the built engine
/// is immutable wiring around mutable component state.
pub struct EngineBuilder {
    components: Vec<Arc<dyn Component>>,
    rules: Vec<Rule>,
    max_depth: usize,
    enrich_budget: Duration,
}

impl EngineBuilder {
    /// Register a component.
    pub fn component(self, component: impl Component) -> Self {
        self.component_arc(Arc::new(component))
    }

    /// Register an already-shared component.
    pub fn component_arc(mut self, component: Arc<dyn Component>) -> Self {
        self.components.push(component);
        self
    }

    /// Register a rule.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Override the cascade depth limit (default 32).
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Override the per-clause enrichment time budget (default 5s).
    pub fn enrich_budget(mut self, budget: Duration) -> Self {
        self.enrich_budget = budget;
        self
    }

    /// Validate the wiring and produce the engine.
    ///
    /// Fails on duplicate component or rule names, and on any then-pattern
    /// naming a component that was never registered - the dispatch-time
    /// version of that mistake would otherwise only surface under traffic.
    pub fn build(self) -> Result<Engine, ConcordError> {
        let components = Arc::new(ComponentMap::new());
        for component in self.components {
            components.register(component)?;
        }

        let mut rules = RuleBook::new();
        for rule in self.rules {
            for pattern in &rule.then {
                components.get(&pattern.op.component)?;
            }
            rules.insert(rule)?;
        }

        info!(
            components = components.len(),
            rules = rules.len(),
            max_depth = self.max_depth,
            "engine built"
        );

        Ok(Engine {
            components,
            rules,
            log: Arc::new(InvocationLog::new()),
            fired: DashSet::new(),
            max_depth: self.max_depth,
            enrich_budget: self.enrich_budget,
        })
    }
}

/// The synchronization engine.
///
/// Create through [`Engine::builder`]; share behind an `Arc`.
#[derive(Debug)]
pub struct Engine {
    components: Arc<ComponentMap>,
    rules: RuleBook,
    log: Arc<InvocationLog>,
    // (rule name, sorted support ids): the at-most-once firing guard.
    fired: DashSet<(String, Vec<u64>)>,
    max_depth: usize,
    enrich_budget: Duration,
}

impl Engine {
    /// Start building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            components: Vec::new(),
            rules: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            enrich_budget: DEFAULT_ENRICH_BUDGET,
        }
    }

    /// The shared invocation log.
    pub fn log(&self) -> &Arc<InvocationLog> {
        &self.log
    }

    pub(crate) fn components(&self) -> &Arc<ComponentMap> {
        &self.components
    }

    /// Submit an external trigger: call the named action, log the result
    /// as a new cascade root, and drain the cascade to completion.
    ///
    /// Rules triggered by one invocation run in registration order and
    /// their dispatches execute serially within the cascade, so component
    /// side effects are ordered per cascade; no ordering holds *across*
    /// cascades. The operation's own failure is not an error here - it is
    /// logged and the cascade runs over it like any other invocation.
    pub async fn submit(&self, op: OpRef, input: Args) -> Result<CascadeReport, ConcordError> {
        if is_query(&op.operation) {
            return Err(ConcordError::QueryNotDispatchable {
                operation: op.operation,
            });
        }
        let component = self.components.get(&op.component)?;

        let call = component.call(&op.operation, input.clone());
        let output = match std::panic::AssertUnwindSafe(call).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => OpOutcome::error(format!("operation {op} panicked")),
        };

        let root = self.log.append_root(op, input, output);
        info!(trigger = %root.op, id = %root.id, "external trigger logged");
        Ok(self.run_cascade(root).await)
    }

    /// Log an already-completed invocation as a cascade root and drain
    /// the cascade. The boundary uses this for synthetic trigger
    /// operations whose "execution" is trivial.
    pub(crate) async fn submit_logged(
        &self,
        op: OpRef,
        input: Args,
        output: OpOutcome,
    ) -> CascadeReport {
        let root = self.log.append_root(op, input, output);
        info!(trigger = %root.op, id = %root.id, "external trigger logged");
        self.run_cascade(root).await
    }

    async fn run_cascade(&self, root: Arc<Invocation>) -> CascadeReport {
        let mut report = CascadeReport {
            root: root.id,
            invocations: 1,
            fired: Vec::new(),
            halted_branches: 0,
        };
        let mut queue: VecDeque<(Arc<Invocation>, usize)> = VecDeque::new();
        queue.push_back((root.clone(), 0));

        while let Some((inv, depth)) = queue.pop_front() {
            if depth >= self.max_depth {
                let err = ConcordError::CycleDetected {
                    root: root.id,
                    limit: self.max_depth,
                };
                warn!(cascade = %root.id, invocation = %inv.id, %err, "branch halted");
                report.halted_branches += 1;
                continue;
            }

            debug!(
                cascade = %root.id,
                invocation = %inv.id,
                op = %inv.op,
                depth,
                phase = ?CascadePhase::Matching,
                "evaluating rules"
            );

            for rule in self.rules.triggered_by(&inv.op) {
                let mut frames = match_rule(&self.log, &rule, &inv);
                if frames.is_empty() {
                    continue;
                }

                if let Some(clause) = &rule.where_clause {
                    debug!(
                        cascade = %root.id,
                        rule = %rule.name,
                        frames = frames.len(),
                        phase = ?CascadePhase::Enriching,
                        "running where-clause"
                    );
                    let ctx = QueryContext::new(self.components.clone());
                    frames =
                        run_clause(&rule.name, clause, frames, ctx, self.enrich_budget).await;
                    if frames.is_empty() {
                        continue;
                    }
                }

                for frame in frames {
                    let key = (rule.name.clone(), frame.support_key());
                    if !self.fired.insert(key) {
                        // This (rule, support) pair already fired.
                        continue;
                    }

                    debug!(
                        cascade = %root.id,
                        rule = %rule.name,
                        phase = ?CascadePhase::Dispatching,
                        "firing"
                    );
                    match dispatch_frame(&self.components, &self.log, &rule, &frame).await {
                        Ok(new_invocations) => {
                            report.fired.push(rule.name.clone());
                            report.invocations += new_invocations.len();
                            for next in new_invocations {
                                queue.push_back((next, depth + 1));
                            }
                        }
                        Err(err) => {
                            // Wiring fault; builder validation makes this
                            // unreachable for registered rules.
                            warn!(rule = %rule.name, %err, "dispatch failed");
                        }
                    }
                }
            }
        }

        info!(
            cascade = %root.id,
            invocations = report.invocations,
            fired = report.fired.len(),
            halted = report.halted_branches,
            phase = ?CascadePhase::Drained,
            "cascade complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::frame::FrameSet;
    use crate::pattern::{Pattern, PatternValue};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct Accounts;

    #[async_trait]
    impl Component for Accounts {
        fn name(&self) -> &str {
            "accounts"
        }

        async fn call(&self, operation: &str, input: Args) -> OpOutcome {
            match operation {
                "register" => {
                    let name = input.get("name").and_then(|v| v.as_str()).unwrap_or("?");
                    OpOutcome::ok(args! { "id" => format!("user-{name}") })
                }
                "_role" => {
                    let id = input.get("id").and_then(|v| v.as_str()).unwrap_or("");
                    let role = if id.ends_with("root") { "admin" } else { "member" };
                    OpOutcome::ok(args! { "role" => role })
                }
                other => OpOutcome::error(format!("unknown operation {other}")),
            }
        }
    }

    #[derive(Default)]
    struct Mailer {
        sent: Mutex<Vec<Args>>,
    }

    #[async_trait]
    impl Component for Mailer {
        fn name(&self) -> &str {
            "mailer"
        }

        async fn call(&self, operation: &str, input: Args) -> OpOutcome {
            match operation {
                "welcome" => {
                    self.sent.lock().unwrap().push(input);
                    OpOutcome::ok(args! {})
                }
                other => OpOutcome::error(format!("unknown operation {other}")),
            }
        }
    }

    #[derive(Default)]
    struct Counter {
        ticks: AtomicU64,
    }

    #[async_trait]
    impl Component for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn call(&self, _operation: &str, _input: Args) -> OpOutcome {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            OpOutcome::ok(args! { "count" => n })
        }
    }

    fn welcome_rule() -> Rule {
        Rule::build("welcome-on-register")
            .when(Pattern::of("accounts", "register").with_output("id", PatternValue::var("user")))
            .then(Pattern::of("mailer", "welcome").with_input("to", PatternValue::var("user")))
            .finish()
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_dispatches_welcome() {
        let mailer = Arc::new(Mailer::default());
        let engine = Engine::builder()
            .component(Accounts)
            .component_arc(mailer.clone())
            .rule(welcome_rule())
            .build()
            .unwrap();

        let report = engine
            .submit(OpRef::new("accounts", "register"), args! { "name" => "ada" })
            .await
            .unwrap();

        assert_eq!(report.invocations, 2);
        assert_eq!(report.fired, vec!["welcome-on-register"]);
        assert_eq!(report.halted_branches, 0);

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get("to"), Some(&json!("user-ada")));
    }

    #[tokio::test]
    async fn test_no_matching_rule_is_silent() {
        let engine = Engine::builder()
            .component(Accounts)
            .component(Mailer::default())
            .rule(
                Rule::build("never")
                    .when(Pattern::of("accounts", "delete"))
                    .then(Pattern::of("mailer", "welcome"))
                    .finish()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let report = engine
            .submit(OpRef::new("accounts", "register"), args! { "name" => "ada" })
            .await
            .unwrap();
        assert_eq!(report.invocations, 1);
        assert!(report.fired.is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_denies_non_admin() {
        let gate = |frames: FrameSet, ctx: QueryContext| async move {
            let mut kept = Vec::new();
            for frame in frames {
                let Some(user) = frame.get("user").cloned() else {
                    continue;
                };
                let Ok(out) = ctx.query("accounts", "_role", args! { "id" => user }).await
                else {
                    continue;
                };
                if out.get("role") == Some(json!("admin")) {
                    kept.push(frame);
                }
            }
            kept
        };

        let mailer = Arc::new(Mailer::default());
        let engine = Engine::builder()
            .component(Accounts)
            .component_arc(mailer.clone())
            .rule(
                Rule::build("admins-only")
                    .when(
                        Pattern::of("accounts", "register")
                            .with_output("id", PatternValue::var("user")),
                    )
                    .where_fn(gate)
                    .then(
                        Pattern::of("mailer", "welcome").with_input("to", PatternValue::var("user")),
                    )
                    .finish()
                    .unwrap(),
            )
            .build()
            .unwrap();

        // "member" role: denied, no dispatch, no error.
        let report = engine
            .submit(OpRef::new("accounts", "register"), args! { "name" => "ada" })
            .await
            .unwrap();
        assert!(report.fired.is_empty());
        assert!(mailer.sent.lock().unwrap().is_empty());

        // "admin" role: fires.
        let report = engine
            .submit(OpRef::new("accounts", "register"), args! { "name" => "root" })
            .await
            .unwrap();
        assert_eq!(report.fired, vec!["admins-only"]);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cascade_chains_through_intermediate_rule() {
        let counter = Arc::new(Counter::default());
        let engine = Engine::builder()
            .component(Accounts)
            .component(Mailer::default())
            .component_arc(counter.clone())
            .rule(welcome_rule())
            .rule(
                Rule::build("count-welcomes")
                    .when(Pattern::of("mailer", "welcome"))
                    .then(Pattern::of("counter", "tick"))
                    .finish()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let report = engine
            .submit(OpRef::new("accounts", "register"), args! { "name" => "ada" })
            .await
            .unwrap();

        // register -> welcome -> tick
        assert_eq!(report.invocations, 3);
        assert_eq!(report.fired, vec!["welcome-on-register", "count-welcomes"]);
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_self_triggering_rule_halts_at_depth_limit() {
        let counter = Arc::new(Counter::default());
        let engine = Engine::builder()
            .component_arc(counter.clone())
            .rule(
                Rule::build("runaway")
                    .when(Pattern::of("counter", "tick"))
                    .then(Pattern::of("counter", "tick"))
                    .finish()
                    .unwrap(),
            )
            .max_depth(5)
            .build()
            .unwrap();

        let report = engine
            .submit(OpRef::new("counter", "tick"), args! {})
            .await
            .unwrap();

        assert_eq!(report.halted_branches, 1);
        // Trigger at depth 0 plus one dispatch per depth 1..=5; the
        // invocation at depth 5 is popped but never evaluated.
        assert_eq!(report.invocations, 6);
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_rule_fires_at_most_once_per_support() {
        let mailer = Arc::new(Mailer::default());
        let engine = Engine::builder()
            .component(Accounts)
            .component_arc(mailer.clone())
            .rule(welcome_rule())
            .build()
            .unwrap();

        engine
            .submit(OpRef::new("accounts", "register"), args! { "name" => "ada" })
            .await
            .unwrap();
        engine
            .submit(OpRef::new("accounts", "register"), args! { "name" => "bo" })
            .await
            .unwrap();

        // One welcome per registration, not per log scan.
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
    }

    #[tokio::test]
    async fn test_submit_rejects_queries() {
        let engine = Engine::builder().component(Accounts).build().unwrap();
        let err = engine
            .submit(OpRef::new("accounts", "_role"), args! {})
            .await
            .unwrap_err();
        assert!(matches!(err, ConcordError::QueryNotDispatchable { .. }));
    }

    #[tokio::test]
    async fn test_submit_unknown_component_fails() {
        let engine = Engine::builder().build().unwrap();
        let err = engine
            .submit(OpRef::new("ghost", "boo"), args! {})
            .await
            .unwrap_err();
        assert!(matches!(err, ConcordError::UnknownComponent { .. }));
    }

    #[test]
    fn test_build_rejects_then_on_unregistered_component() {
        let err = Engine::builder()
            .component(Accounts)
            .rule(
                Rule::build("dangling")
                    .when(Pattern::of("accounts", "register"))
                    .then(Pattern::of("ghost", "boo"))
                    .finish()
                    .unwrap(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ConcordError::UnknownComponent { name } if name == "ghost"));
    }

    #[tokio::test]
    async fn test_failed_operation_is_matchable_by_rules() {
        #[derive(Default)]
        struct Audit {
            notes: Mutex<Vec<Args>>,
        }

        #[async_trait]
        impl Component for Audit {
            fn name(&self) -> &str {
                "audit"
            }

            async fn call(&self, _operation: &str, input: Args) -> OpOutcome {
                self.notes.lock().unwrap().push(input);
                OpOutcome::ok(args! {})
            }
        }

        struct FailingMailer;

        #[async_trait]
        impl Component for FailingMailer {
            fn name(&self) -> &str {
                "mailer"
            }

            async fn call(&self, _operation: &str, _input: Args) -> OpOutcome {
                OpOutcome::error("smtp unavailable")
            }
        }

        let audit = Arc::new(Audit::default());
        let engine = Engine::builder()
            .component(Accounts)
            .component(FailingMailer)
            .component_arc(audit.clone())
            .rule(welcome_rule())
            .rule(
                Rule::build("note-mail-failures")
                    .when(
                        Pattern::of("mailer", "welcome")
                            .with_output("error", PatternValue::var("reason")),
                    )
                    .then(
                        Pattern::of("audit", "note").with_input("why", PatternValue::var("reason")),
                    )
                    .finish()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let report = engine
            .submit(OpRef::new("accounts", "register"), args! { "name" => "ada" })
            .await
            .unwrap();

        assert_eq!(report.fired, vec!["welcome-on-register", "note-mail-failures"]);
        let notes = audit.notes.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].get("why"), Some(&json!("smtp unavailable")));
    }
}
