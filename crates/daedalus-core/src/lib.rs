//! # Daedalus Core
//!
//! Scoped dependency resolution and control signals for the Daedalus
//! application framework.
//!
//! This crate provides the pieces every run is built from:
//!
//! - [`Definition`] - A named service recipe with its placement
//! - [`CompilerNode`] - A registry of definitions plus a per-node instance cache
//! - [`ArgumentResolver`] - Turns declared parameters into [`Arguments`]
//! - [`Signal`] and [`synchronize`] - Single-slot signals and the waiter
//! - [`Control`] and [`Continuation`] - Handles callables use to settle signals
//! - [`DaedalusError`] - Standard error type

#![doc(html_root_url = "https://docs.rs/daedalus-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod definition;
mod error;
mod node;
mod param;
mod resolver;
mod signal;
mod synchronizer;

use std::future::Future;
use std::pin::Pin;

pub use context::{HttpContext, Requester, ResolveContext, RunId, StateHandle};
pub use definition::{
    CompilerPass, Definition, DefinitionBuilder, Factory, Instance, Placement, Scope,
    SharedPolicy, SharingPermission,
};
pub use error::{DaedalusError, DaedalusResult, ErrorCategory};
pub use node::{CompilerNode, CompilerNodeBuilder, NodeKind};
pub use param::{ControlKind, Param, ParamList};
pub use resolver::{Argument, ArgumentResolver, Arguments, Bindings, CompilerHandle, CustomArgs};
pub use signal::{Construction, Continuation, Control, ControlSignal, Flow, Signal, Thunk};
pub use synchronizer::synchronize;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
