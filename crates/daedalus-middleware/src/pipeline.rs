//! Staged middleware pipeline.
//!
//! A pipeline holds five stages in a fixed order:
//!
//! 1. **Security** - authentication, authorization, request guards
//! 2. **Pre-transformers** - normalize input into the Run State
//! 3. **Validators** - reject invalid input
//! 4. **Main logic** - the module's business logic
//! 5. **Post-transformers** - shape the result
//!
//! Each stage is an ordered list of entries. An entry can be disabled, in
//! which case the executor never invokes it.

use crate::middleware::{BoxedMiddleware, Middleware};
use daedalus_core::{DaedalusError, DaedalusResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Pipeline stage marker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Stage {
    /// Stage 1: security guards
    Security = 1,
    /// Stage 2: input transformation
    PreTransformers = 2,
    /// Stage 3: input validation
    Validators = 3,
    /// Stage 4: business logic
    MainLogic = 4,
    /// Stage 5: output transformation
    PostTransformers = 5,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::PreTransformers => "pre_transformers",
            Self::Validators => "validators",
            Self::MainLogic => "main_logic",
            Self::PostTransformers => "post_transformers",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [Stage; 5] {
        [
            Self::Security,
            Self::PreTransformers,
            Self::Validators,
            Self::MainLogic,
            Self::PostTransformers,
        ]
    }

    const fn index(self) -> usize {
        self as usize - 1
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a stage.
#[derive(Clone)]
pub struct StageEntry {
    middleware: BoxedMiddleware,
    enabled: bool,
}

impl StageEntry {
    /// An enabled entry.
    #[must_use]
    pub fn new(middleware: BoxedMiddleware) -> Self {
        Self {
            middleware,
            enabled: true,
        }
    }

    /// A disabled entry.
    #[must_use]
    pub fn disabled(middleware: BoxedMiddleware) -> Self {
        Self {
            middleware,
            enabled: false,
        }
    }

    /// Returns the middleware.
    #[must_use]
    pub fn middleware(&self) -> &BoxedMiddleware {
        &self.middleware
    }

    /// Returns false if the executor must skip this entry.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl fmt::Debug for StageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageEntry")
            .field("middleware", &self.middleware.name())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// An immutable, staged middleware pipeline.
///
/// # Example
///
/// ```
/// use daedalus_middleware::{Pipeline, Stage, SyncFnMiddleware};
///
/// let pipeline = Pipeline::builder()
///     .security(SyncFnMiddleware::new("auth", &[], |_| Ok(())))
///     .main_logic(SyncFnMiddleware::new("handler", &["state"], |_| Ok(())))
///     .build()
///     .unwrap();
///
/// assert_eq!(pipeline.len(), 2);
/// assert_eq!(pipeline.middleware_names(Stage::Security), vec!["auth"]);
/// assert!(pipeline.entries(Stage::Validators).is_empty());
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: [Vec<StageEntry>; 5],
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// An empty pipeline.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the entries of a stage in declaration order.
    #[must_use]
    pub fn entries(&self, stage: Stage) -> &[StageEntry] {
        &self.stages[stage.index()]
    }

    /// Returns the names of a stage's middleware, including disabled ones.
    #[must_use]
    pub fn middleware_names(&self, stage: Stage) -> Vec<&str> {
        self.entries(stage)
            .iter()
            .map(|entry| entry.middleware.name())
            .collect()
    }

    /// Returns the total number of entries across all stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }

    /// Returns true if no stage has any entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.iter().all(Vec::is_empty)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for stage in Stage::all() {
            map.entry(&stage.name(), &self.entries(stage));
        }
        map.finish()
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: [Vec<StageEntry>; 5],
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an enabled middleware to `stage`.
    #[must_use]
    pub fn add<M: Middleware>(self, stage: Stage, middleware: M) -> Self {
        self.entry(stage, StageEntry::new(Arc::new(middleware)))
    }

    /// Appends an already boxed middleware to `stage`.
    #[must_use]
    pub fn add_boxed(self, stage: Stage, middleware: BoxedMiddleware) -> Self {
        self.entry(stage, StageEntry::new(middleware))
    }

    /// Appends a disabled middleware to `stage`.
    #[must_use]
    pub fn disabled<M: Middleware>(self, stage: Stage, middleware: M) -> Self {
        self.entry(stage, StageEntry::disabled(Arc::new(middleware)))
    }

    /// Appends an entry to `stage`.
    #[must_use]
    pub fn entry(mut self, stage: Stage, entry: StageEntry) -> Self {
        self.stages[stage.index()].push(entry);
        self
    }

    /// Appends to the security stage.
    #[must_use]
    pub fn security<M: Middleware>(self, middleware: M) -> Self {
        self.add(Stage::Security, middleware)
    }

    /// Appends to the pre-transformers stage.
    #[must_use]
    pub fn pre_transformer<M: Middleware>(self, middleware: M) -> Self {
        self.add(Stage::PreTransformers, middleware)
    }

    /// Appends to the validators stage.
    #[must_use]
    pub fn validator<M: Middleware>(self, middleware: M) -> Self {
        self.add(Stage::Validators, middleware)
    }

    /// Appends to the main logic stage.
    #[must_use]
    pub fn main_logic<M: Middleware>(self, middleware: M) -> Self {
        self.add(Stage::MainLogic, middleware)
    }

    /// Appends to the post-transformers stage.
    #[must_use]
    pub fn post_transformer<M: Middleware>(self, middleware: M) -> Self {
        self.add(Stage::PostTransformers, middleware)
    }

    /// Validates and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `ContractViolation` if a middleware declares the same
    /// identifier twice.
    pub fn build(self) -> DaedalusResult<Pipeline> {
        for (stage, entries) in Stage::all().iter().zip(&self.stages) {
            for entry in entries {
                let middleware = &entry.middleware;
                if let Some(duplicate) = middleware.params().first_duplicate() {
                    return Err(DaedalusError::contract_violation(format!(
                        "middleware '{}' in stage {stage} declares '{duplicate}' twice",
                        middleware.name()
                    )));
                }
            }
        }

        Ok(Pipeline {
            stages: self.stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::SyncFnMiddleware;

    fn noop(name: &str) -> impl Middleware {
        SyncFnMiddleware::new(name, &[], |_| Ok(()))
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::Security < Stage::PreTransformers);
        assert!(Stage::PreTransformers < Stage::Validators);
        assert!(Stage::Validators < Stage::MainLogic);
        assert!(Stage::MainLogic < Stage::PostTransformers);
        assert_eq!(Stage::all().len(), 5);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Security.name(), "security");
        assert_eq!(Stage::PreTransformers.name(), "pre_transformers");
        assert_eq!(Stage::Validators.name(), "validators");
        assert_eq!(Stage::MainLogic.name(), "main_logic");
        assert_eq!(Stage::PostTransformers.name(), "post_transformers");
    }

    #[test]
    fn test_builder_places_entries() {
        let pipeline = Pipeline::builder()
            .post_transformer(noop("shape"))
            .security(noop("auth"))
            .security(noop("rate"))
            .disabled(Stage::Validators, noop("legacy"))
            .build()
            .unwrap();

        assert_eq!(pipeline.middleware_names(Stage::Security), vec!["auth", "rate"]);
        assert_eq!(pipeline.middleware_names(Stage::PostTransformers), vec!["shape"]);
        assert!(!pipeline.entries(Stage::Validators)[0].is_enabled());
        assert_eq!(pipeline.len(), 4);
    }

    #[test]
    fn test_duplicate_param_rejected() {
        let err = Pipeline::builder()
            .main_logic(SyncFnMiddleware::new("handler", &["repo", "repo"], |_| Ok(())))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("handler"));
    }

    #[test]
    fn test_empty_pipeline() {
        let pipeline = Pipeline::empty();
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.len(), 0);
    }
}
