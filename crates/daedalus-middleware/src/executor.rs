//! Cooperative pipeline executor.
//!
//! The executor runs one stage at a time, one callable at a time:
//!
//! ```text
//! Idle -> Advancing -> Waiting -> Advancing -> ... -> Completed
//!                         |
//!                         +-> Skipped -> Advancing
//!                         +-> Aborted   (done: ends the whole run)
//!                         +-> Failed    (throwException or error)
//! ```
//!
//! A callable that declares no control primitive is synchronous: `proceed`
//! is synthesized as soon as its call returns. A cooperative callable is
//! awaited through [`synchronize`] until it invokes a primitive. There is no
//! timeout on that wait.

use crate::middleware::{BoxedMiddleware, Middleware};
use crate::pipeline::{Pipeline, Stage, StageEntry};
use daedalus_core::{
    synchronize, ArgumentResolver, Bindings, CompilerNode, Control, ControlSignal, CustomArgs,
    DaedalusResult, Flow, ResolveContext,
};
use metrics::counter;
use std::sync::Arc;

/// Executor state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorState {
    /// Nothing started yet.
    Idle,
    /// Moving to the next callable.
    Advancing,
    /// Waiting for the current callable's control signal.
    Waiting,
    /// The last callable skipped.
    Skipped,
    /// `done` ended the run.
    Aborted,
    /// The run failed.
    Failed,
    /// The last stage ran to completion.
    Completed,
}

impl ExecutorState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Advancing => "advancing",
            Self::Waiting => "waiting",
            Self::Skipped => "skipped",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

/// How a stage (or a whole pipeline) ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageOutcome {
    /// Every enabled callable proceeded or skipped.
    Completed,
    /// A callable invoked `done`; nothing after it runs.
    Aborted,
}

impl StageOutcome {
    /// Returns the outcome name used in metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

/// A lazy sequence over a stage's enabled entries.
///
/// Each stage run starts from a new sequence.
#[derive(Debug, Clone)]
pub struct StageSequence<'a> {
    entries: &'a [StageEntry],
    cursor: usize,
}

impl<'a> StageSequence<'a> {
    /// Creates a sequence positioned before the first entry.
    #[must_use]
    pub fn new(entries: &'a [StageEntry]) -> Self {
        Self { entries, cursor: 0 }
    }
}

impl<'a> Iterator for StageSequence<'a> {
    type Item = &'a BoxedMiddleware;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entry) = self.entries.get(self.cursor) {
            self.cursor += 1;
            if entry.is_enabled() {
                return Some(entry.middleware());
            }
            tracing::trace!(middleware = entry.middleware().name(), "disabled entry skipped");
        }
        None
    }
}

/// Runs pipelines against one compiler node on behalf of one run.
#[derive(Debug)]
pub struct Executor {
    node: Arc<CompilerNode>,
    ctx: ResolveContext,
    state: ExecutorState,
}

impl Executor {
    /// Creates an executor resolving against `node` with the run's context.
    #[must_use]
    pub fn new(node: Arc<CompilerNode>, ctx: ResolveContext) -> Self {
        Self {
            node,
            ctx,
            state: ExecutorState::Idle,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Returns the node callables resolve against.
    #[must_use]
    pub fn node(&self) -> &Arc<CompilerNode> {
        &self.node
    }

    /// Returns the run context.
    #[must_use]
    pub fn context(&self) -> &ResolveContext {
        &self.ctx
    }

    /// Runs every stage in order.
    ///
    /// Returns `Aborted` as soon as a callable invokes `done`; no later
    /// callable or stage runs.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a callable, by argument
    /// resolution, or carried by `throwException`.
    pub async fn run(&mut self, pipeline: &Pipeline) -> DaedalusResult<StageOutcome> {
        for stage in Stage::all() {
            if self.run_stage(stage, pipeline.entries(stage)).await? == StageOutcome::Aborted {
                return Ok(StageOutcome::Aborted);
            }
        }
        Ok(StageOutcome::Completed)
    }

    /// Runs one stage over a fresh sequence of its entries.
    pub async fn run_stage(
        &mut self,
        stage: Stage,
        entries: &[StageEntry],
    ) -> DaedalusResult<StageOutcome> {
        for middleware in StageSequence::new(entries) {
            self.state = ExecutorState::Advancing;
            tracing::trace!(
                stage = stage.name(),
                middleware = middleware.name(),
                run_id = ?self.ctx.run_id(),
                "invoking middleware"
            );

            if middleware.params().declares_control() {
                self.state = ExecutorState::Waiting;
            }

            let flow = match self.invoke(middleware.as_ref(), None).await {
                Ok(flow) => flow,
                Err(err) => Flow::Fail(err),
            };

            counter!(
                "daedalus_middleware_invocations_total",
                "stage" => stage.name(),
                "flow" => flow.as_str()
            )
            .increment(1);

            match flow {
                Flow::Proceed => {}
                Flow::Skip => {
                    self.state = ExecutorState::Skipped;
                    tracing::debug!(stage = stage.name(), middleware = middleware.name(), "middleware skipped");
                }
                Flow::Terminate => {
                    self.state = ExecutorState::Aborted;
                    tracing::debug!(stage = stage.name(), middleware = middleware.name(), "run terminated");
                    record_stage(stage, "aborted");
                    return Ok(StageOutcome::Aborted);
                }
                Flow::Fail(err) => {
                    self.state = ExecutorState::Failed;
                    tracing::debug!(
                        stage = stage.name(),
                        middleware = middleware.name(),
                        error = %err,
                        category = err.category().as_str(),
                        "middleware failed"
                    );
                    record_stage(stage, "failed");
                    return Err(err);
                }
            }
        }

        self.state = ExecutorState::Completed;
        record_stage(stage, "completed");
        Ok(StageOutcome::Completed)
    }

    /// Resolves a callable's arguments, invokes it, and waits for its flow.
    ///
    /// `custom` values take precedence over dependency resolution.
    ///
    /// # Errors
    ///
    /// Returns argument resolution errors and errors returned by the callable.
    /// A `throwException` is returned as `Ok(Flow::Fail(_))`.
    pub async fn invoke(
        &self,
        middleware: &dyn Middleware,
        custom: Option<&CustomArgs>,
    ) -> DaedalusResult<Flow> {
        let signal = Arc::new(ControlSignal::new());
        let mut bindings = Bindings::none().with_control(Control::new(signal.clone()));
        if let Some(custom) = custom {
            bindings = bindings.with_custom(custom);
        }

        let context = format!(
            "middleware '{}' in {}",
            middleware.name(),
            self.ctx.requester()
        );
        let args =
            ArgumentResolver::resolve(middleware.params(), &self.node, &self.ctx, &bindings, &context)
                .await?;

        middleware.call(args).await?;

        if !middleware.params().declares_control() {
            return Ok(Flow::Proceed);
        }
        Ok(synchronize(&signal).await)
    }
}

fn record_stage(stage: Stage, outcome: &'static str) {
    counter!(
        "daedalus_stage_outcomes_total",
        "stage" => stage.name(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{FnMiddleware, SyncFnMiddleware};
    use daedalus_core::{
        DaedalusError, Definition, NodeKind, Requester, StateHandle,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    fn setup() -> (Executor, StateHandle) {
        let node = CompilerNode::builder(NodeKind::module("users", None)).build();
        let state = StateHandle::new(json!({}));
        let ctx = ResolveContext::new(Requester::module("users", None)).with_state(state.clone());
        (Executor::new(node, ctx), state)
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> impl Middleware {
        let log = log.clone();
        SyncFnMiddleware::new(name, &[], move |_| {
            log.lock().push(name.to_string());
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_stages_run_in_declaration_order() {
        let (mut executor, _) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));

        let pipeline = Pipeline::builder()
            .post_transformer(recorder(&log, "shape"))
            .main_logic(recorder(&log, "handler"))
            .security(recorder(&log, "auth"))
            .validator(recorder(&log, "check"))
            .pre_transformer(recorder(&log, "parse"))
            .security(recorder(&log, "limit"))
            .build()
            .unwrap();

        let outcome = executor.run(&pipeline).await.unwrap();

        assert_eq!(outcome, StageOutcome::Completed);
        assert_eq!(executor.state(), ExecutorState::Completed);
        assert_eq!(
            *log.lock(),
            vec!["auth", "limit", "parse", "check", "handler", "shape"]
        );
    }

    #[tokio::test]
    async fn test_disabled_entry_never_runs() {
        let (mut executor, _) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));

        let pipeline = Pipeline::builder()
            .security(recorder(&log, "a"))
            .disabled(Stage::Security, recorder(&log, "b"))
            .security(recorder(&log, "c"))
            .build()
            .unwrap();

        executor.run(&pipeline).await.unwrap();
        assert_eq!(*log.lock(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_skip_continues_and_done_aborts_everything() {
        let (mut executor, state) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));

        let pipeline = Pipeline::builder()
            .security(FnMiddleware::new("skipper", &["skip"], |args| async move {
                args.control()?.skip()
            }))
            .security(recorder(&log, "after_skip"))
            .validator(FnMiddleware::new("finisher", &["state", "done"], |args| async move {
                args.state()?.insert("finished", json!(true));
                args.control()?.done()
            }))
            .validator(recorder(&log, "same_stage"))
            .main_logic(recorder(&log, "later_stage"))
            .build()
            .unwrap();

        let outcome = executor.run(&pipeline).await.unwrap();

        assert_eq!(outcome, StageOutcome::Aborted);
        assert_eq!(executor.state(), ExecutorState::Aborted);
        assert_eq!(*log.lock(), vec!["after_skip"]);
        assert_eq!(state.get("finished"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_throw_exception_fails_with_value() {
        let (mut executor, _) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));

        let pipeline = Pipeline::builder()
            .validator(FnMiddleware::new("guard", &["throwException"], |args| async move {
                args.control()?.throw(invalid_input("bad input"))
            }))
            .main_logic(recorder(&log, "handler"))
            .build()
            .unwrap();

        let err = executor.run(&pipeline).await.unwrap_err();
        assert_eq!(err.to_string(), "bad input");
        assert_eq!(executor.state(), ExecutorState::Failed);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_returned_error_fails_run() {
        let (mut executor, _) = setup();
        let pipeline = Pipeline::builder()
            .main_logic(SyncFnMiddleware::new("handler", &[], |_| {
                Err(DaedalusError::msg("boom"))
            }))
            .build()
            .unwrap();

        assert_eq!(executor.run(&pipeline).await.unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn test_next_called_later_from_spawned_task() {
        let (mut executor, state) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));

        let pipeline = Pipeline::builder()
            .security(FnMiddleware::new("slow", &["state", "next"], |args| async move {
                let state = args.state()?;
                let control = args.control()?;
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    state.insert("slow", json!("done"));
                    let _ = control.next();
                });
                Ok(())
            }))
            .security(recorder(&log, "second"))
            .build()
            .unwrap();

        executor.run(&pipeline).await.unwrap();
        assert_eq!(state.get("slow"), Some(json!("done")));
        assert_eq!(*log.lock(), vec!["second"]);
    }

    #[tokio::test]
    async fn test_dependency_injection_into_middleware() {
        let (mut executor, state) = setup();
        executor
            .node()
            .add(
                Definition::builder("greeting")
                    .factory(|_| Ok(String::from("hello")))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let pipeline = Pipeline::builder()
            .main_logic(SyncFnMiddleware::new("handler", &["greeting", "state"], |args| {
                let greeting = args.get::<String>("greeting")?;
                args.state()?.insert("greeting", json!(greeting.as_str()));
                Ok(())
            }))
            .build()
            .unwrap();

        executor.run(&pipeline).await.unwrap();
        assert_eq!(state.get("greeting"), Some(json!("hello")));
    }

    #[tokio::test]
    async fn test_unresolvable_parameter_fails_run() {
        let (mut executor, _) = setup();
        let pipeline = Pipeline::builder()
            .main_logic(SyncFnMiddleware::new("handler", &["mailer"], |_| Ok(())))
            .build()
            .unwrap();

        let err = executor.run(&pipeline).await.unwrap_err();
        match err {
            DaedalusError::ArgumentResolution { identifier, context, .. } => {
                assert_eq!(identifier, "mailer");
                assert!(context.contains("handler"));
                assert!(context.contains("users"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invoke_with_custom_args() {
        let (executor, _) = setup();
        let mut custom = CustomArgs::new();
        custom.insert("payload".to_string(), Arc::new(5_u32) as daedalus_core::Instance);

        let listener = SyncFnMiddleware::new("listener", &["payload"], |args| {
            assert_eq!(*args.get::<u32>("payload")?, 5);
            Ok(())
        });

        let flow = executor.invoke(&listener, Some(&custom)).await.unwrap();
        assert!(matches!(flow, Flow::Proceed));
    }

    #[test]
    fn test_sequence_skips_disabled_entries() {
        let entries = vec![
            StageEntry::new(Arc::new(SyncFnMiddleware::new("a", &[], |_| Ok(())))),
            StageEntry::disabled(Arc::new(SyncFnMiddleware::new("b", &[], |_| Ok(())))),
            StageEntry::new(Arc::new(SyncFnMiddleware::new("c", &[], |_| Ok(())))),
        ];
        let mut sequence = StageSequence::new(&entries);

        let names: Vec<_> = sequence.by_ref().map(|mw| mw.name().to_string()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(sequence.next().is_none());
        assert_eq!(StageSequence::new(&entries).count(), 2);
    }

    fn invalid_input(message: &'static str) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, message)
    }
}
