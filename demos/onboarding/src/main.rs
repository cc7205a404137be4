//! # Onboarding Demo
//!
//! Three components that have never heard of each other - accounts, a
//! mailer, and billing - wired together entirely by rules. Registering a
//! user cascades into a welcome mail and a billing profile; making the
//! user an admin is gated by an enrichment query.
//!
//! Run with `RUST_LOG=debug cargo run -p onboarding-demo` to watch the
//! cascade phases in the trace output.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use concord_core::{
    args, str_arg, Args, Component, Engine, OpOutcome, OpRef, Pattern, PatternValue, QueryContext,
    Rule,
};
use tracing::info;

// ============================================================================
// Components (mutually unaware)
// ============================================================================

/// User store. `register` creates a user; `_role` answers enrichment
/// queries about one.
#[derive(Default)]
struct Accounts {
    users: Mutex<BTreeMap<String, String>>, // id -> role
}

#[async_trait]
impl Component for Accounts {
    fn name(&self) -> &str {
        "accounts"
    }

    async fn call(&self, operation: &str, input: Args) -> OpOutcome {
        match operation {
            "register" => {
                let Some(name) = str_arg(&input, "name") else {
                    return OpOutcome::error("register requires a name");
                };
                let role = str_arg(&input, "role").unwrap_or("member").to_string();
                let id = format!("user-{name}");
                self.users.lock().unwrap().insert(id.clone(), role);
                OpOutcome::ok(args! { "id" => id })
            }
            "_role" => {
                let Some(id) = str_arg(&input, "id") else {
                    return OpOutcome::error("_role requires an id");
                };
                match self.users.lock().unwrap().get(id) {
                    Some(role) => OpOutcome::ok(args! { "role" => role.clone() }),
                    None => OpOutcome::error(format!("no user {id:?}")),
                }
            }
            other => OpOutcome::error(format!("unknown operation {other}")),
        }
    }
}

/// Pretend SMTP. Knows nothing about users or billing.
struct Mailer;

#[async_trait]
impl Component for Mailer {
    fn name(&self) -> &str {
        "mailer"
    }

    async fn call(&self, operation: &str, input: Args) -> OpOutcome {
        let to = str_arg(&input, "to").unwrap_or("?");
        info!(op = operation, to, "mail sent");
        OpOutcome::ok(args! { "delivered_to" => to })
    }
}

/// Billing profiles. Knows nothing about mail or registration.
struct Billing;

#[async_trait]
impl Component for Billing {
    fn name(&self) -> &str {
        "billing"
    }

    async fn call(&self, operation: &str, input: Args) -> OpOutcome {
        match operation {
            "create_profile" => {
                let Some(user) = str_arg(&input, "user") else {
                    return OpOutcome::error("create_profile requires a user");
                };
                info!(user, "billing profile created");
                OpOutcome::ok(args! { "profile" => format!("bill-{user}") })
            }
            other => OpOutcome::error(format!("unknown operation {other}")),
        }
    }
}

// ============================================================================
// Rules (the only place cross-component behavior lives)
// ============================================================================

fn rules() -> Result<Vec<Rule>> {
    let welcome = Rule::build("welcome-on-register")
        .when(Pattern::of("accounts", "register").with_output("id", PatternValue::var("user")))
        .then(Pattern::of("mailer", "welcome").with_input("to", PatternValue::var("user")))
        .finish()?;

    let billing = Rule::build("billing-on-register")
        .when(Pattern::of("accounts", "register").with_output("id", PatternValue::var("user")))
        .then(Pattern::of("billing", "create_profile").with_input("user", PatternValue::var("user")))
        .finish()?;

    // Only admins get the ops digest; the gate asks accounts via a query.
    let digest = Rule::build("digest-for-admins")
        .when(Pattern::of("accounts", "register").with_output("id", PatternValue::var("user")))
        .where_fn(|frames, ctx: QueryContext| async move {
            let mut kept = Vec::new();
            for frame in frames {
                let Some(user) = frame.get("user").cloned() else {
                    continue;
                };
                let Ok(out) = ctx.query("accounts", "_role", args! { "id" => user }).await
                else {
                    continue;
                };
                if out.get("role").and_then(|v| v.as_str().map(String::from))
                    == Some("admin".to_string())
                {
                    kept.push(frame);
                }
            }
            kept
        })
        .then(Pattern::of("mailer", "ops_digest").with_input("to", PatternValue::var("user")))
        .finish()?;

    // Registration and the billing profile it caused, same user, same
    // causal line: confirm.
    let confirm = Rule::build("confirm-onboarding")
        .when(Pattern::of("accounts", "register").with_output("id", PatternValue::var("user")))
        .when(Pattern::of("billing", "create_profile").with_input("user", PatternValue::var("user")))
        .then(Pattern::of("mailer", "all_set").with_input("to", PatternValue::var("user")))
        .finish()?;

    Ok(vec![welcome, billing, digest, confirm])
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut builder = Engine::builder()
        .component(Accounts::default())
        .component(Mailer)
        .component(Billing);
    for rule in rules()? {
        builder = builder.rule(rule);
    }
    let engine = builder.build()?;

    for (name, role) in [("ada", "member"), ("root", "admin")] {
        let report = engine
            .submit(
                OpRef::new("accounts", "register"),
                args! { "name" => name, "role" => role },
            )
            .await?;
        info!(
            name,
            invocations = report.invocations,
            fired = ?report.fired,
            "cascade drained"
        );
    }

    Ok(())
}
