//! Plugins: a named group of modules sharing plugin-scope definitions.

use crate::application::Links;
use crate::boundary::ErrorBoundary;
use crate::module::{Module, Owner};
use crate::run::{execute, RunTarget};
use daedalus_core::{
    CompilerNode, DaedalusError, DaedalusResult, Definition, Instance, NodeKind, Placement, Scope,
};
use daedalus_middleware::{Middleware, Pipeline};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A plugin owns a compiler node that is the parent of every module
/// registered through it.
///
/// Its error handler is the fallback for member modules without their own.
pub struct Plugin {
    name: String,
    links: Links,
    node: Arc<CompilerNode>,
    modules: RwLock<IndexMap<String, Arc<Module>>>,
    pipeline: RwLock<Pipeline>,
    boundary: Arc<ErrorBoundary>,
}

impl Plugin {
    pub(crate) fn new(name: impl Into<String>, links: Links) -> Self {
        let name = name.into();
        let node = CompilerNode::builder(NodeKind::plugin(name.clone()))
            .root(links.root.clone())
            .shared(links.shared.clone())
            .build();
        tracing::debug!(plugin = %name, "plugin created");
        Self {
            name,
            links,
            node,
            modules: RwLock::new(IndexMap::new()),
            pipeline: RwLock::new(Pipeline::empty()),
            boundary: Arc::new(ErrorBoundary::new()),
        }
    }

    /// Returns the plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the plugin node.
    #[must_use]
    pub fn node(&self) -> &Arc<CompilerNode> {
        &self.node
    }

    /// Creates a module owned by this plugin.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateComponent` if the plugin already has a module with
    /// that name.
    pub fn module(&self, name: &str) -> DaedalusResult<Arc<Module>> {
        let mut modules = self.modules.write();
        if modules.contains_key(name) {
            return Err(DaedalusError::duplicate_component(
                "module",
                format!("{}/{name}", self.name),
            ));
        }

        let owner = Owner {
            name: self.name.clone(),
            node: self.node.clone(),
            boundary: self.boundary.clone(),
        };
        let module = Arc::new(Module::new(name, Some(owner), self.links.clone()));
        modules.insert(name.to_string(), module.clone());
        Ok(module)
    }

    /// Returns a member module by name.
    #[must_use]
    pub fn get_module(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.read().get(name).cloned()
    }

    /// Returns member module names in registration order.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }

    /// Adds a definition to the node its placement names.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateDefinition` if the target node already owns the
    /// name, or `InvalidDefinition` for module scope.
    pub fn define(&self, definition: Definition) -> DaedalusResult<()> {
        self.target(&definition)?.add(definition)
    }

    /// Adds or overrides a definition without the duplicate check.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` for module scope.
    pub fn replace(&self, definition: Definition) -> DaedalusResult<()> {
        self.target(&definition)?.replace(definition);
        Ok(())
    }

    /// Installs the plugin's own pipeline.
    pub fn set_pipeline(&self, pipeline: Pipeline) {
        *self.pipeline.write() = pipeline;
    }

    /// Returns a copy of the plugin's pipeline.
    #[must_use]
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline.read().clone()
    }

    /// Installs the plugin's error handler.
    pub fn on_error<M: Middleware>(&self, handler: M) {
        self.boundary.set(handler);
    }

    /// Returns the plugin's error boundary.
    #[must_use]
    pub fn error_boundary(&self) -> &ErrorBoundary {
        &self.boundary
    }

    /// Returns true if `name` is visible from the plugin node.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.node.has(name)
    }

    /// Resolves `name` on behalf of the plugin.
    pub async fn get(&self, name: &str) -> DaedalusResult<Instance> {
        self.node.get(name).await
    }

    /// Resolves `name` on behalf of the plugin and downcasts it.
    pub async fn get_as<T: Any + Send + Sync>(&self, name: &str) -> DaedalusResult<Arc<T>> {
        self.node.get_as(name).await
    }

    /// Runs the plugin's pipeline against the plugin node.
    ///
    /// # Errors
    ///
    /// Returns the run's error when the plugin's handler did not recover it.
    pub async fn run(&self, initial: Value) -> DaedalusResult<Value> {
        let target = RunTarget {
            node: self.node.clone(),
            pipeline: self.pipeline(),
            boundaries: vec![self.boundary.as_ref()],
            http: None,
        };
        execute(target, initial).await
    }

    fn target(&self, definition: &Definition) -> DaedalusResult<&Arc<CompilerNode>> {
        match definition.placement() {
            Placement::Scoped(Scope::Plugin) => Ok(&self.node),
            Placement::Scoped(Scope::Public) => Ok(&self.links.root),
            Placement::Shared(_) => Ok(&self.links.shared),
            Placement::Scoped(Scope::Module) => Err(DaedalusError::invalid_definition(
                definition.name(),
                format!(
                    "module scope must be defined on a module, not on plugin '{}'",
                    self.name
                ),
            )),
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("modules", &self.module_names())
            .field("pipeline", &self.pipeline.read().len())
            .field("boundary", &self.boundary)
            .finish()
    }
}
