//! Application-wide events.
//!
//! Listeners are ordinary middleware. They resolve dependencies against the
//! public node and receive the event payload through the custom-argument
//! map, so a listener declaring `order` gets the payload entry `order`
//! before any definition of that name is consulted.
//!
//! ```
//! use daedalus::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let app = Application::new(DaedalusConfig::default()).unwrap();
//! app.mediator().on(
//!     "order.created",
//!     SyncFnMiddleware::new("audit", &["id"], |args| {
//!         assert_eq!(*args.get::<u64>("id")?, 42);
//!         Ok(())
//!     }),
//! );
//!
//! let outcome = app
//!     .mediator()
//!     .emit("order.created", EventArgs::new().with("id", 42_u64).into_args())
//!     .await
//!     .unwrap();
//! assert_eq!(outcome, StageOutcome::Completed);
//! # });
//! ```

use daedalus_core::{
    CompilerNode, CustomArgs, DaedalusError, DaedalusResult, Flow, Instance, Requester,
    ResolveContext, RunId, StateHandle,
};
use daedalus_middleware::{BoxedMiddleware, Executor, Middleware, StageOutcome};
use daedalus_telemetry::record_event;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};

/// Event name to ordered listeners.
pub struct Mediator {
    root: Weak<CompilerNode>,
    listeners: RwLock<IndexMap<String, Vec<BoxedMiddleware>>>,
}

impl Mediator {
    pub(crate) fn new(root: &Arc<CompilerNode>) -> Self {
        Self {
            root: Arc::downgrade(root),
            listeners: RwLock::new(IndexMap::new()),
        }
    }

    /// Appends a listener for `event`.
    pub fn on<M: Middleware>(&self, event: impl Into<String>, listener: M) {
        self.on_boxed(event, Arc::new(listener));
    }

    /// Appends an already boxed listener for `event`.
    pub fn on_boxed(&self, event: impl Into<String>, listener: BoxedMiddleware) {
        let event = event.into();
        tracing::debug!(event = %event, listener = listener.name(), "listener registered");
        self.listeners.write().entry(event).or_default().push(listener);
    }

    /// Removes every listener of `event` and returns how many there were.
    pub fn off(&self, event: &str) -> usize {
        self.listeners
            .write()
            .shift_remove(event)
            .map_or(0, |listeners| listeners.len())
    }

    /// Returns the number of listeners of `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }

    /// Returns the names of events with at least one listener.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.listeners.read().keys().cloned().collect()
    }

    /// Runs the listeners of `event` in registration order.
    ///
    /// A listener invoking `done` stops the remaining ones and the emit
    /// resolves with `Aborted`. An event without listeners completes.
    ///
    /// # Errors
    ///
    /// Returns the first listener error, or a contract violation if the
    /// application was dropped.
    pub async fn emit(&self, event: &str, payload: CustomArgs) -> DaedalusResult<StageOutcome> {
        let listeners = self.listeners.read().get(event).cloned().unwrap_or_default();
        if listeners.is_empty() {
            tracing::trace!(event, "event without listeners");
            return Ok(StageOutcome::Completed);
        }

        let Some(root) = self.root.upgrade() else {
            return Err(DaedalusError::contract_violation(format!(
                "event '{event}' emitted after the application was dropped"
            )));
        };

        let ctx = ResolveContext::new(Requester::application())
            .with_run_id(RunId::new())
            .with_state(StateHandle::new(Value::Object(serde_json::Map::new())));
        let executor = Executor::new(root, ctx);

        let result = dispatch(&executor, event, &listeners, &payload).await;
        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "failed",
        };
        record_event(event, outcome);
        result
    }
}

async fn dispatch(
    executor: &Executor,
    event: &str,
    listeners: &[BoxedMiddleware],
    payload: &CustomArgs,
) -> DaedalusResult<StageOutcome> {
    for listener in listeners {
        match executor.invoke(listener.as_ref(), Some(payload)).await? {
            Flow::Proceed | Flow::Skip => {}
            Flow::Terminate => {
                tracing::debug!(event, listener = listener.name(), "event propagation stopped");
                return Ok(StageOutcome::Aborted);
            }
            Flow::Fail(err) => {
                tracing::debug!(
                    event,
                    listener = listener.name(),
                    error = %err,
                    "listener failed"
                );
                return Err(err);
            }
        }
    }
    Ok(StageOutcome::Completed)
}

impl fmt::Debug for Mediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        f.debug_map()
            .entries(listeners.iter().map(|(event, list)| (event, list.len())))
            .finish()
    }
}

/// Builder for an event payload.
#[derive(Default)]
pub struct EventArgs {
    args: CustomArgs,
}

impl EventArgs {
    /// An empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` under `name`.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(self, name: impl Into<String>, value: T) -> Self {
        self.with_instance(name, Arc::new(value))
    }

    /// Adds an already shared instance under `name`.
    #[must_use]
    pub fn with_instance(mut self, name: impl Into<String>, value: Instance) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    /// Returns the custom-argument map.
    #[must_use]
    pub fn into_args(self) -> CustomArgs {
        self.args
    }
}

impl From<EventArgs> for CustomArgs {
    fn from(args: EventArgs) -> Self {
        args.args
    }
}
