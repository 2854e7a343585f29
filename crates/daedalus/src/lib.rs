//! # Daedalus
//!
//! **Scoped dependency injection and cooperative middleware pipelines**
//!
//! Daedalus is an application framework whose execution core provides:
//!
//! - **Scoped Definitions** – Module, plugin, public and shared visibility
//! - **Lazy Singletons** – One instance per owning node, built on first use
//! - **Async Construction** – Factories settle a continuation; consumers stay straight-line
//! - **Staged Pipelines** – Five fixed stages of callables with explicit control flow
//! - **Error Boundaries** – Per-module and per-plugin error handlers
//!
//! ## Quick Start
//!
//! ```
//! use daedalus::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Repo;
//! struct Service {
//!     repo: Arc<Repo>,
//! }
//!
//! # tokio_test::block_on(async {
//! let app = Application::new(DaedalusConfig::default()).unwrap();
//! let orders = app.module("orders").unwrap();
//!
//! orders
//!     .define(Definition::builder("repo").factory(|_| Ok(Repo)).build().unwrap())
//!     .unwrap();
//! orders
//!     .define(
//!         Definition::builder("service")
//!             .params(&["repo"])
//!             .factory(|args| Ok(Service { repo: args.get::<Repo>("repo")? }))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! orders.set_pipeline(
//!     Pipeline::builder()
//!         .main_logic(FnMiddleware::new("handle", &["service", "state", "next"], |args| async move {
//!             let _service = args.get::<Service>("service")?;
//!             args.state()?.insert("ok", json!(true));
//!             args.control()?.next()
//!         }))
//!         .build()
//!         .unwrap(),
//! );
//!
//! assert_eq!(orders.run(json!({})).await.unwrap(), json!({ "ok": true }));
//! # });
//! ```
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────── root (public) ────────────┐
//!                  │                                       │
//!          plugin:billing                                  │      shared pool
//!           │         │                                    │   (allow-listed by
//!   module:invoices  module:refunds              module:reports   module/plugin)
//! ```
//!
//! A module resolves names in its own node, then its plugin's node, then the
//! root, and finally the shared pool when the definition allows the module
//! or its plugin.
//!
//! Each run executes
//!
//! ```text
//! Security → PreTransformers → Validators → MainLogic → PostTransformers
//! ```
//!
//! against a fresh Run State and resolves with a copy of it.

#![doc(html_root_url = "https://docs.rs/daedalus/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod application;
mod boundary;
mod mediator;
mod module;
mod plugin;
mod run;

pub use application::{Application, CONFIG_DEFINITION, MEDIATOR_DEFINITION};
pub use boundary::{ErrorBoundary, ERROR_ARGUMENTS};
pub use mediator::{EventArgs, Mediator};
pub use module::Module;
pub use plugin::Plugin;

// Re-export the building blocks
pub use daedalus_config as config;
pub use daedalus_core as core;
pub use daedalus_middleware as middleware;
pub use daedalus_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```
/// use daedalus::prelude::*;
///
/// let app = Application::new(DaedalusConfig::default()).unwrap();
/// assert!(app.has("config"));
/// ```
pub mod prelude {
    pub use crate::{Application, ErrorBoundary, EventArgs, Mediator, Module, Plugin};

    // Definitions, nodes and errors
    pub use daedalus_core::{
        Arguments, CompilerHandle, CompilerNode, CompilerPass, Continuation, Control,
        CustomArgs, DaedalusError, DaedalusResult, Definition, Flow, HttpContext, Instance,
        Scope, SharedPolicy, StateHandle,
    };

    // Pipelines
    pub use daedalus_middleware::{
        FnMiddleware, Middleware, Pipeline, Stage, StageOutcome, SyncFnMiddleware,
    };

    // Configuration
    pub use daedalus_config::{ConfigLoader, DaedalusConfig, RunMode};
}
