//! One pipeline run, from fresh Run State to final snapshot.

use crate::boundary::{recover, ErrorBoundary};
use daedalus_core::{
    CompilerNode, DaedalusResult, HttpContext, ResolveContext, RunId, StateHandle,
};
use daedalus_middleware::{Executor, Pipeline};
use daedalus_telemetry::record_run;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Everything a run needs besides its initial state.
pub(crate) struct RunTarget<'a> {
    pub node: Arc<CompilerNode>,
    pub pipeline: Pipeline,
    pub boundaries: Vec<&'a ErrorBoundary>,
    pub http: Option<HttpContext>,
}

/// Runs `target.pipeline` against `target.node` with a fresh Run State.
///
/// Resolves with a deep copy of the state when every stage completed, when
/// a callable invoked `done`, or when an error handler recovered.
pub(crate) async fn execute(target: RunTarget<'_>, initial: Value) -> DaedalusResult<Value> {
    let run_id = RunId::new();
    let component = target.node.label().to_string();
    let span = tracing::info_span!("run", run_id = %run_id, component = %component);

    async move {
        let started = Instant::now();
        let state = StateHandle::new(initial);

        let mut ctx = ResolveContext::new(target.node.requester())
            .with_run_id(run_id)
            .with_state(state.clone());
        if let Some(http) = target.http {
            ctx = ctx.with_http(http);
        }

        let mut executor = Executor::new(target.node, ctx);
        let (outcome, result) = match executor.run(&target.pipeline).await {
            Ok(outcome) => (outcome.as_str(), Ok(())),
            Err(err) => match recover(&target.boundaries, &executor, err).await {
                Ok(()) => ("recovered", Ok(())),
                Err(err) => ("failed", Err(err)),
            },
        };

        let elapsed = started.elapsed();
        record_run(&component, outcome, elapsed);

        match result {
            Ok(()) => {
                tracing::debug!(
                    outcome,
                    duration_ms = elapsed.as_millis() as u64,
                    "run finished"
                );
                Ok(state.snapshot())
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    category = err.category().as_str(),
                    duration_ms = elapsed.as_millis() as u64,
                    "run failed"
                );
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}
