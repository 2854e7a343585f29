//! Core middleware trait and function adapters.
//!
//! This module defines the [`Middleware`] trait that every pipeline entry,
//! error handler and event listener implements.
//!
//! A middleware declares the identifiers it wants injected (see
//! [`ParamList::for_middleware`]). Declaring any control primitive (`next`,
//! `skip`, `done`, `throwException`) makes it *cooperative*: it must settle
//! the step through [`Control`](daedalus_core::Control), possibly after its
//! future returned. Declaring none makes it *synchronous*: the step proceeds
//! as soon as the call returns.
//!
//! # Example
//!
//! ```
//! use daedalus_middleware::{FnMiddleware, Middleware, SyncFnMiddleware};
//!
//! let audit = SyncFnMiddleware::new("audit", &["state"], |args| {
//!     args.state()?.insert("audited", serde_json::json!(true));
//!     Ok(())
//! });
//! assert!(!audit.params().declares_control());
//!
//! let auth = FnMiddleware::new("auth", &["next"], |args| async move {
//!     args.control()?.next()
//! });
//! assert!(auth.params().declares_control());
//! ```

use daedalus_core::{Arguments, BoxFuture, DaedalusResult, ParamList};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The core middleware trait.
///
/// # Invariants
///
/// - A cooperative middleware MUST invoke exactly one control primitive
/// - A synchronous middleware never sees a control primitive
/// - An `Err` returned from [`call`](Self::call) fails the run like
///   `throwException`
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this middleware, used in logs and metrics.
    fn name(&self) -> &str;

    /// Returns the declared parameters.
    fn params(&self) -> &ParamList;

    /// Invokes the middleware with its resolved arguments.
    fn call(&self, args: Arguments) -> BoxFuture<'static, DaedalusResult<()>>;
}

/// A type-erased middleware that can be stored in a pipeline.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// A middleware created from an async function.
pub struct FnMiddleware<F> {
    name: String,
    params: ParamList,
    func: F,
}

impl<F> FnMiddleware<F> {
    /// Creates a new function-based middleware.
    pub fn new<Fut>(name: impl Into<String>, params: &[&str], func: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DaedalusResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            params: ParamList::for_middleware(params),
            func,
        }
    }
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DaedalusResult<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &ParamList {
        &self.params
    }

    fn call(&self, args: Arguments) -> BoxFuture<'static, DaedalusResult<()>> {
        Box::pin((self.func)(args))
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// A middleware created from a plain function.
pub struct SyncFnMiddleware<F> {
    name: String,
    params: ParamList,
    func: F,
}

impl<F> SyncFnMiddleware<F> {
    /// Creates a new synchronous function-based middleware.
    pub fn new(name: impl Into<String>, params: &[&str], func: F) -> Self
    where
        F: Fn(&Arguments) -> DaedalusResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params: ParamList::for_middleware(params),
            func,
        }
    }
}

impl<F> Middleware for SyncFnMiddleware<F>
where
    F: Fn(&Arguments) -> DaedalusResult<()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &ParamList {
        &self.params
    }

    fn call(&self, args: Arguments) -> BoxFuture<'static, DaedalusResult<()>> {
        let result = (self.func)(&args);
        Box::pin(std::future::ready(result))
    }
}

impl<F> fmt::Debug for SyncFnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncFnMiddleware")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
