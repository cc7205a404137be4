//! The external boundary: requests in, responses out.
//!
//! Hosts hand the boundary an already-parsed request (a path plus a
//! parameter map). Three things can happen, decided by the [`RouteTable`]:
//!
//! - **Deny**: the path is refused with an error outcome.
//! - **Passthrough**: the path maps directly onto one component operation,
//!   called without touching the log. Meant for read paths; a passthrough
//!   action mutates invisibly to every rule, so configure with care.
//! - **Engine**: the request becomes a synthetic invocation of the
//!   reserved `flow.request` action carrying the path, the parameters,
//!   and a fresh request id. Rules take it from there; a rule eventually
//!   dispatches the reserved `flow.respond` action, which completes the
//!   caller's oneshot channel. A request nothing responds to times out.
//!
//! The boundary never rolls anything back: if the cascade mutated state
//! and then failed to respond, those mutations stand (at-least-once, not
//! transactional).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::component::{Component, OpOutcome};
use crate::engine::Engine;
use crate::error::ConcordError;
use crate::invocation::OpRef;
use crate::value::{str_arg, Args, Value};

/// Component name reserved for the boundary.
pub const FLOW_COMPONENT: &str = "flow";
/// Synthetic action logged for each engine-routed request.
pub const FLOW_REQUEST: &str = "request";
/// Action a rule dispatches to answer a pending request.
pub const FLOW_RESPOND: &str = "respond";

/// How one path is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Refused outright.
    Deny,
    /// Direct component call, unlogged.
    Passthrough,
    /// Synthetic `flow.request` invocation through the engine.
    Engine,
}

/// Per-path routing configuration.
///
/// Deserializable so hosts can load it from configuration:
///
/// ```json
/// { "passthrough": ["health/_ping"], "deny": ["admin/reset"] }
/// ```
///
/// Deny wins over passthrough; unlisted paths go through the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteTable {
    #[serde(default)]
    passthrough: Vec<String>,
    #[serde(default)]
    deny: Vec<String>,
}

impl RouteTable {
    /// A table routing everything through the engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a path as direct passthrough.
    pub fn passthrough(mut self, path: impl Into<String>) -> Self {
        self.passthrough.push(path.into());
        self
    }

    /// Refuse a path.
    pub fn deny(mut self, path: impl Into<String>) -> Self {
        self.deny.push(path.into());
        self
    }

    /// Decide how a path is handled.
    pub fn route(&self, path: &str) -> Route {
        if self.deny.iter().any(|p| p == path) {
            Route::Deny
        } else if self.passthrough.iter().any(|p| p == path) {
            Route::Passthrough
        } else {
            Route::Engine
        }
    }
}

type PendingMap = DashMap<Uuid, oneshot::Sender<OpOutcome>>;

/// The boundary itself. Construct once, register its
/// [`component`](Boundary::component) with the engine builder, then call
/// [`handle`](Boundary::handle) per request.
pub struct Boundary {
    routes: RouteTable,
    pending: Arc<PendingMap>,
}

impl Boundary {
    /// Create a boundary with the given routing table.
    pub fn new(routes: RouteTable) -> Self {
        Self {
            routes,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// The reserved `flow` component. Must be registered with the engine
    /// this boundary will submit to, or respond dispatches have nowhere
    /// to land.
    pub fn component(&self) -> Arc<dyn Component> {
        Arc::new(FlowComponent {
            pending: self.pending.clone(),
        })
    }

    /// Handle one external request.
    ///
    /// For engine-routed paths this submits the synthetic trigger, drains
    /// its cascade, and waits up to `timeout` for a `flow.respond`
    /// dispatch to answer. Denials and operation failures come back as
    /// error *outcomes*; only wiring faults and the timeout surface as
    /// `Err`.
    pub async fn handle(
        &self,
        engine: &Engine,
        path: &str,
        params: Args,
        timeout: Duration,
    ) -> Result<OpOutcome, ConcordError> {
        match self.routes.route(path) {
            Route::Deny => {
                debug!(path, "request denied by route table");
                Ok(OpOutcome::error(format!("path {path:?} is not allowed")))
            }
            Route::Passthrough => self.passthrough_call(engine, path, params).await,
            Route::Engine => self.engine_call(engine, path, params, timeout).await,
        }
    }

    async fn passthrough_call(
        &self,
        engine: &Engine,
        path: &str,
        params: Args,
    ) -> Result<OpOutcome, ConcordError> {
        let Some((component, operation)) = path.split_once('/') else {
            return Ok(OpOutcome::error(format!(
                "passthrough path {path:?} is not component/operation"
            )));
        };
        let component = engine.components().get(component)?;
        Ok(component.call(operation, params).await)
    }

    async fn engine_call(
        &self,
        engine: &Engine,
        path: &str,
        params: Args,
        timeout: Duration,
    ) -> Result<OpOutcome, ConcordError> {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        let mut input = params;
        input.insert("path".to_string(), Value::from(path));
        input.insert("request".to_string(), Value::from(request_id.to_string()));

        // The synthetic trigger's output echoes its input so rules can
        // match on either side.
        let output = OpOutcome::ok(input.clone());
        let report = engine
            .submit_logged(OpRef::new(FLOW_COMPONENT, FLOW_REQUEST), input, output)
            .await;
        debug!(
            path,
            request = %request_id,
            fired = report.fired.len(),
            "request cascade drained"
        );

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            // Sender dropped without answering; treat like a timeout.
            Ok(Err(_)) | Err(_) => {
                self.pending.remove(&request_id);
                warn!(path, request = %request_id, "no respond dispatch answered");
                Err(ConcordError::Timeout { duration: timeout })
            }
        }
    }
}

/// The reserved `flow` component backing the boundary.
struct FlowComponent {
    pending: Arc<PendingMap>,
}

#[async_trait]
impl Component for FlowComponent {
    fn name(&self) -> &str {
        FLOW_COMPONENT
    }

    async fn call(&self, operation: &str, input: Args) -> OpOutcome {
        match operation {
            // The trigger itself does nothing; logging it is the point.
            FLOW_REQUEST => OpOutcome::ok(input),
            FLOW_RESPOND => {
                let Some(raw) = str_arg(&input, "request") else {
                    return OpOutcome::error("respond requires a request field");
                };
                let Ok(request_id) = Uuid::parse_str(raw) else {
                    return OpOutcome::error(format!("malformed request id {raw:?}"));
                };
                let Some((_, tx)) = self.pending.remove(&request_id) else {
                    return OpOutcome::error(format!("unknown or expired request {request_id}"));
                };

                let mut payload = input;
                payload.remove("request");
                // Receiver gone means the caller already timed out.
                let _ = tx.send(OpOutcome::ok(payload.clone()));
                OpOutcome::ok(payload)
            }
            other => OpOutcome::error(format!("unknown operation {other}")),
        }
    }
}
