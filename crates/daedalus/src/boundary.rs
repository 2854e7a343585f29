//! Error boundary for pipeline runs.
//!
//! Modules and plugins can each register one error handler. When a run
//! fails, only the nearest handler runs: the module's own, otherwise the one
//! of its plugin. With no handler the error reaches the caller of `run`.
//!
//! A handler is an ordinary middleware. It receives the error as the
//! custom arguments `error` and `e` (`Arc<DaedalusError>`) and resolves any
//! other identifier against the failing module's node.
//!
//! | Handler result | Run result |
//! |----------------|------------|
//! | returns `Ok`, `next`, `skip` or `done` | recovered, state so far |
//! | returns `Err` or calls `throwException` | that error |

use daedalus_core::{CustomArgs, DaedalusError, DaedalusResult, Flow, Instance};
use daedalus_middleware::{BoxedMiddleware, Executor, Middleware};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Custom argument names carrying the error into a handler.
pub const ERROR_ARGUMENTS: [&str; 2] = ["error", "e"];

/// A slot holding at most one error handler.
#[derive(Default)]
pub struct ErrorBoundary {
    handler: RwLock<Option<BoxedMiddleware>>,
}

impl ErrorBoundary {
    /// An empty boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler`, replacing any previous one.
    pub fn set<M: Middleware>(&self, handler: M) {
        self.set_boxed(Arc::new(handler));
    }

    /// Installs an already boxed handler.
    pub fn set_boxed(&self, handler: BoxedMiddleware) {
        *self.handler.write() = Some(handler);
    }

    /// Removes the handler and returns it.
    pub fn clear(&self) -> Option<BoxedMiddleware> {
        self.handler.write().take()
    }

    /// Returns the current handler.
    #[must_use]
    pub fn handler(&self) -> Option<BoxedMiddleware> {
        self.handler.read().clone()
    }

    /// Returns true if a handler is installed.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.handler.read().is_some()
    }
}

impl fmt::Debug for ErrorBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handler = self.handler.read();
        f.debug_struct("ErrorBoundary")
            .field("handler", &handler.as_ref().map(|h| h.name().to_string()))
            .finish()
    }
}

/// Hands `error` to the nearest handler in `chain`.
///
/// Returns `Ok(())` when the handler recovered the run.
pub(crate) async fn recover(
    chain: &[&ErrorBoundary],
    executor: &Executor,
    error: DaedalusError,
) -> DaedalusResult<()> {
    let Some(handler) = chain.iter().find_map(|boundary| boundary.handler()) else {
        return Err(error);
    };

    tracing::debug!(
        handler = handler.name(),
        error = %error,
        category = error.category().as_str(),
        "error handed to boundary"
    );

    let shared: Instance = Arc::new(error);
    let custom: CustomArgs = ERROR_ARGUMENTS
        .iter()
        .map(|name| ((*name).to_string(), shared.clone()))
        .collect::<HashMap<_, _>>();

    match executor.invoke(handler.as_ref(), Some(&custom)).await? {
        Flow::Fail(err) => Err(err),
        Flow::Proceed | Flow::Skip | Flow::Terminate => Ok(()),
    }
}
