//! Concurrency stress: many unrelated cascades submitted in parallel.
//!
//! Cascades share only the log and the fired-set, so running them from
//! many tasks must neither lose dispatches nor double-fire rules.

use std::sync::Arc;

use concord_core::{args, Engine, OpOutcome, OpRef, Pattern, PatternValue, Rule};
use concord_testing::{assert_logged, RecordingComponent};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cascades_fire_exactly_once_each() {
    const CASCADES: usize = 64;

    let audit = Arc::new(RecordingComponent::new("audit"));
    let engine = Arc::new(
        Engine::builder()
            .component(RecordingComponent::new("store"))
            .component_arc(audit.clone())
            .rule(
                Rule::build("audit-writes")
                    .when(Pattern::of("store", "set").with_input("key", PatternValue::var("key")))
                    .then(
                        Pattern::of("audit", "note").with_input("key", PatternValue::var("key")),
                    )
                    .finish()
                    .unwrap(),
            )
            .build()
            .unwrap(),
    );

    let mut handles = Vec::with_capacity(CASCADES);
    for i in 0..CASCADES {
        let engine = engine.clone();
        let key = format!("key-{i}-{}", fastrand::u32(..));
        handles.push(tokio::spawn(async move {
            // Stagger submissions so cascades genuinely interleave.
            if fastrand::bool() {
                tokio::task::yield_now().await;
            }
            engine
                .submit(
                    OpRef::new("store", "set"),
                    args! { "key" => key, "value" => fastrand::i32(..) },
                )
                .await
                .unwrap()
        }));
    }

    let mut total_fired = 0;
    for handle in handles {
        let report = handle.await.unwrap();
        assert_eq!(report.invocations, 2);
        total_fired += report.fired.len();
    }

    assert_eq!(total_fired, CASCADES);
    audit.assert_call_count("note", CASCADES);
    assert_logged(engine.log(), "store", "set", CASCADES);
    assert_logged(engine.log(), "audit", "note", CASCADES);
    assert_eq!(engine.log().len(), CASCADES * 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_chained_cascades_keep_causal_lines_separate() {
    const CASCADES: usize = 32;

    let sink = Arc::new(RecordingComponent::new("sink"));
    let engine = Arc::new(
        Engine::builder()
            .component(
                RecordingComponent::new("accounts"), // echoes name back
            )
            .component(RecordingComponent::new("billing"))
            .component_arc(sink.clone())
            .rule(
                Rule::build("setup-billing")
                    .when(
                        Pattern::of("accounts", "register")
                            .with_input("name", PatternValue::var("name")),
                    )
                    .then(
                        Pattern::of("billing", "setup")
                            .with_input("user", PatternValue::var("name")),
                    )
                    .finish()
                    .unwrap(),
            )
            .rule(
                Rule::build("confirm")
                    .when(
                        Pattern::of("accounts", "register")
                            .with_input("name", PatternValue::var("name")),
                    )
                    .when(
                        Pattern::of("billing", "setup")
                            .with_input("user", PatternValue::var("name")),
                    )
                    .then(Pattern::of("sink", "done").with_input("user", PatternValue::var("name")))
                    .finish()
                    .unwrap(),
            )
            .build()
            .unwrap(),
    );

    // Every cascade uses the same name, so variable agreement alone
    // cannot tell them apart; only causal lineage can.
    let mut handles = Vec::with_capacity(CASCADES);
    for _ in 0..CASCADES {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .submit(
                    OpRef::new("accounts", "register"),
                    args! { "name" => "ada" },
                )
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        // register -> billing.setup -> sink.done
        assert_eq!(handle.await.unwrap().invocations, 3);
    }

    // The join only ever pairs a setup with the registration that caused
    // it: one confirmation per cascade, never one per (register, setup)
    // pair in the log.
    sink.assert_call_count("done", CASCADES);
    for call in sink.calls_of("done") {
        assert_eq!(call.input["user"], "ada");
    }
}
