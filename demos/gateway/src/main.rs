//! # Gateway Demo
//!
//! The boundary in front of an engine: external requests arrive as
//! path + parameters, a serde-loaded [`RouteTable`] decides between deny,
//! direct passthrough, and engine routing, and engine-routed requests are
//! answered by rules dispatching the reserved `flow.respond` action.
//!
//! A real host would feed this from an HTTP server; here a few hardcoded
//! requests stand in for the wire.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use concord_core::{
    args, str_arg, Args, Boundary, Component, Engine, OpOutcome, Pattern, PatternValue, Rule,
    RouteTable,
};
use tracing::info;

/// A note-keeping component: `add` stores a note, `_count` reports how
/// many exist.
#[derive(Default)]
struct Notes {
    entries: Mutex<BTreeMap<String, String>>,
}

#[async_trait]
impl Component for Notes {
    fn name(&self) -> &str {
        "notes"
    }

    async fn call(&self, operation: &str, input: Args) -> OpOutcome {
        match operation {
            "add" => {
                let Some(text) = str_arg(&input, "text") else {
                    return OpOutcome::error("add requires text");
                };
                let mut entries = self.entries.lock().unwrap();
                let id = format!("note-{}", entries.len() + 1);
                entries.insert(id.clone(), text.to_string());
                OpOutcome::ok(args! { "id" => id })
            }
            "_count" => {
                let count = self.entries.lock().unwrap().len();
                OpOutcome::ok(args! { "count" => count })
            }
            other => OpOutcome::error(format!("unknown operation {other}")),
        }
    }
}

fn rules() -> Result<Vec<Rule>> {
    // Route the "notes/add" path onto the notes component.
    let add = Rule::build("route-add-note")
        .when(
            Pattern::of("flow", "request")
                .with_input("path", PatternValue::lit("notes/add"))
                .with_input("text", PatternValue::var("text")),
        )
        .then(Pattern::of("notes", "add").with_input("text", PatternValue::var("text")))
        .finish()?;

    // Answer the request once the note exists.
    let ack = Rule::build("ack-add-note")
        .when(
            Pattern::of("flow", "request")
                .with_input("path", PatternValue::lit("notes/add"))
                .with_input("request", PatternValue::var("req")),
        )
        .when(Pattern::of("notes", "add").with_output("id", PatternValue::var("id")))
        .then(
            Pattern::of("flow", "respond")
                .with_input("request", PatternValue::var("req"))
                .with_input("id", PatternValue::var("id")),
        )
        .finish()?;

    Ok(vec![add, ack])
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // In a deployment this comes from a config file.
    let routes: RouteTable = serde_json::from_value(serde_json::json!({
        "passthrough": ["notes/_count"],
        "deny": ["notes/drop_all"]
    }))?;

    let boundary = Boundary::new(routes);
    let mut builder = Engine::builder()
        .component(Notes::default())
        .component_arc(boundary.component());
    for rule in rules()? {
        builder = builder.rule(rule);
    }
    let engine = builder.build()?;

    let timeout = Duration::from_secs(2);
    let requests: Vec<(&str, Args)> = vec![
        ("notes/add", args! { "text" => "ship the gateway demo" }),
        ("notes/add", args! { "text" => "write more rules" }),
        ("notes/_count", args! {}),
        ("notes/drop_all", args! {}),
        ("unrouted/path", args! {}),
    ];

    for (path, params) in requests {
        match boundary.handle(&engine, path, params, timeout).await {
            Ok(outcome) => info!(path, ?outcome, "handled"),
            Err(err) => info!(path, %err, "request failed"),
        }
    }

    info!(logged = engine.log().len(), "log size at shutdown");
    Ok(())
}
