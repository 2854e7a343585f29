//! End-to-end pipeline integration tests.
//!
//! These tests drive full pipelines through the executor against a real
//! compiler node:
//!
//! 1. Security
//! 2. Pre-transformers
//! 3. Validators
//! 4. Main logic
//! 5. Post-transformers

use daedalus_core::{
    CompilerNode, DaedalusError, Definition, NodeKind, Requester, ResolveContext, StateHandle,
};
use daedalus_middleware::{
    Executor, FnMiddleware, Middleware, Pipeline, PipelineBuilder, Stage, StageOutcome,
    SyncFnMiddleware,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

/// Builds an executor for a fresh module node.
fn executor(module: &str) -> (Executor, StateHandle) {
    let node = CompilerNode::builder(NodeKind::module(module, None)).build();
    let state = StateHandle::new(json!({}));
    let ctx = ResolveContext::new(Requester::module(module, None)).with_state(state.clone());
    (Executor::new(node, ctx), state)
}

/// A synchronous middleware appending its name to the log.
fn record(log: &Log, name: String) -> impl Middleware {
    let log = log.clone();
    let entry = name.clone();
    SyncFnMiddleware::new(name, &[], move |_| {
        log.lock().push(entry.clone());
        Ok(())
    })
}

/// A cooperative middleware that calls `next` after a delay.
fn record_later(log: &Log, name: &'static str, delay_ms: u64) -> impl Middleware {
    let log = log.clone();
    FnMiddleware::new(name, &["next"], move |args| {
        let log = log.clone();
        async move {
            let control = args.control()?;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                log.lock().push(name.to_string());
                let _ = control.next();
            });
            Ok(())
        }
    })
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_slow_callable_blocks_the_next_one() {
    let (mut executor, _) = executor("orders");
    let log: Log = Arc::default();

    let pipeline = Pipeline::builder()
        .security(record_later(&log, "slow", 30))
        .security(record_later(&log, "fast", 0))
        .main_logic(record(&log, "handler".to_string()))
        .build()
        .unwrap();

    let outcome = executor.run(&pipeline).await.unwrap();

    assert_eq!(outcome, StageOutcome::Completed);
    assert_eq!(*log.lock(), vec!["slow", "fast", "handler"]);
}

#[tokio::test]
async fn test_repo_service_example_yields_ok() {
    struct Repo;
    struct Service {
        _repo: Arc<Repo>,
    }

    let (mut executor, state) = executor("example");
    executor
        .node()
        .add(Definition::builder("repo").factory(|_| Ok(Repo)).build().unwrap())
        .unwrap();
    executor
        .node()
        .add(
            Definition::builder("service")
                .params(&["repo"])
                .factory(|args| Ok(Service { _repo: args.get::<Repo>("repo")? }))
                .build()
                .unwrap(),
        )
        .unwrap();

    let pipeline = Pipeline::builder()
        .main_logic(SyncFnMiddleware::new("handler", &["service", "state"], |args| {
            args.get::<Service>("service")?;
            args.state()?.insert("ok", json!(true));
            Ok(())
        }))
        .build()
        .unwrap();

    executor.run(&pipeline).await.unwrap();
    assert_eq!(state.snapshot(), json!({ "ok": true }));
}

// ============================================================================
// Control Flow
// ============================================================================

#[tokio::test]
async fn test_done_from_spawned_task_aborts_remaining_stages() {
    let (mut executor, state) = executor("orders");
    let log: Log = Arc::default();

    let pipeline = Pipeline::builder()
        .security(FnMiddleware::new("cache", &["state", "done"], |args| async move {
            let state = args.state()?;
            let control = args.control()?;
            tokio::spawn(async move {
                state.insert("cached", json!(true));
                let _ = control.done();
            });
            Ok(())
        }))
        .main_logic(record(&log, "handler".to_string()))
        .build()
        .unwrap();

    let outcome = executor.run(&pipeline).await.unwrap();

    assert_eq!(outcome, StageOutcome::Aborted);
    assert!(log.lock().is_empty());
    assert_eq!(state.snapshot(), json!({ "cached": true }));
}

#[tokio::test]
async fn test_second_primitive_is_contract_violation() {
    let (mut executor, _) = executor("orders");
    let violation: Arc<Mutex<Option<DaedalusError>>> = Arc::default();
    let seen = violation.clone();

    let pipeline = Pipeline::builder()
        .security(FnMiddleware::new("twice", &["next", "done"], move |args| {
            let seen = seen.clone();
            async move {
                let control = args.control()?;
                control.next()?;
                if let Err(err) = control.done() {
                    *seen.lock() = Some(err);
                }
                Ok(())
            }
        }))
        .build()
        .unwrap();

    // The first primitive wins.
    assert_eq!(executor.run(&pipeline).await.unwrap(), StageOutcome::Completed);
    assert!(matches!(
        violation.lock().take(),
        Some(DaedalusError::ContractViolation { .. })
    ));
}

// ============================================================================
// Properties
// ============================================================================

fn stage_of(index: u8) -> Stage {
    Stage::all()[usize::from(index) % 5]
}

proptest! {
    /// Callables run in stage order, then declaration order; disabled
    /// entries never run.
    #[test]
    fn prop_execution_follows_declaration_order(
        entries in proptest::collection::vec((0u8..5, any::<bool>()), 0..24)
    ) {
        let log: Log = Arc::default();
        let mut builder = PipelineBuilder::new();
        let mut expected: Vec<(Stage, String)> = Vec::new();

        for (i, (stage, enabled)) in entries.iter().enumerate() {
            let stage = stage_of(*stage);
            let name = format!("{}#{i}", stage.name());
            if *enabled {
                expected.push((stage, name.clone()));
                builder = builder.add(stage, record(&log, name));
            } else {
                builder = builder.disabled(stage, record(&log, name));
            }
        }
        expected.sort_by_key(|(stage, _)| *stage);

        let pipeline = builder.build().unwrap();
        let (mut executor, _) = executor("prop");
        let outcome = tokio_test::block_on(executor.run(&pipeline)).unwrap();

        prop_assert_eq!(outcome, StageOutcome::Completed);
        let expected: Vec<String> = expected.into_iter().map(|(_, name)| name).collect();
        prop_assert_eq!(log.lock().clone(), expected);
    }

    /// Nothing declared after a `done` ever runs.
    #[test]
    fn prop_done_stops_everything_after_it(before in 0usize..6, after in 0usize..6) {
        let log: Log = Arc::default();
        let mut builder = PipelineBuilder::new();

        for i in 0..before {
            builder = builder.security(record(&log, format!("before#{i}")));
        }
        builder = builder.validator(FnMiddleware::new("stop", &["done"], |args| async move {
            args.control()?.done()
        }));
        for i in 0..after {
            builder = builder
                .validator(record(&log, format!("same#{i}")))
                .post_transformer(record(&log, format!("later#{i}")));
        }

        let pipeline = builder.build().unwrap();
        let (mut executor, _) = executor("prop");
        let outcome = tokio_test::block_on(executor.run(&pipeline)).unwrap();

        prop_assert_eq!(outcome, StageOutcome::Aborted);
        let expected: Vec<String> = (0..before).map(|i| format!("before#{i}")).collect();
        prop_assert_eq!(log.lock().clone(), expected);
    }
}
