//! # Daedalus Middleware
//!
//! Staged middleware pipeline and cooperative executor for the Daedalus
//! framework.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Security → PreTransformers → Validators → MainLogic → PostTransformers
//! ```
//!
//! | Stage | Purpose |
//! |-------|---------|
//! | 1     | Security guards (authentication, rate limits) |
//! | 2     | Pre-transformers (normalize input into the Run State) |
//! | 3     | Validators (reject invalid input) |
//! | 4     | Main logic |
//! | 5     | Post-transformers (shape the result) |
//!
//! ## Control Flow
//!
//! Each callable decides how the run continues by invoking one control
//! primitive:
//!
//! - `next` - continue with the next callable
//! - `skip` - same as `next`; documents that the callable did nothing
//! - `done` - end the whole run successfully
//! - `throwException` - fail the run
//!
//! A callable that declares none of them proceeds when it returns.
//!
//! ## Example
//!
//! ```
//! use daedalus_middleware::pipeline::{Pipeline, Stage};
//!
//! let stages = Stage::all();
//! assert_eq!(stages.len(), 5);
//! assert_eq!(stages[0].name(), "security");
//! assert_eq!(stages[4].name(), "post_transformers");
//! assert!(Pipeline::empty().is_empty());
//! ```

#![doc(html_root_url = "https://docs.rs/daedalus-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod executor;
pub mod middleware;
pub mod pipeline;

pub use executor::{Executor, ExecutorState, StageOutcome, StageSequence};
pub use middleware::{BoxedMiddleware, FnMiddleware, Middleware, SyncFnMiddleware};
pub use pipeline::{Pipeline, PipelineBuilder, Stage, StageEntry};
