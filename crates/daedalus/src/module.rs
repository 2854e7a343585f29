//! Modules: a compiler node, a pipeline and an error handler.

use crate::application::Links;
use crate::boundary::ErrorBoundary;
use crate::run::{execute, RunTarget};
use daedalus_config::RunMode;
use daedalus_core::{
    CompilerNode, DaedalusError, DaedalusResult, Definition, HttpContext, Instance, NodeKind,
    Placement, Scope,
};
use daedalus_middleware::{Middleware, Pipeline};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The plugin a module belongs to.
#[derive(Clone)]
pub(crate) struct Owner {
    pub name: String,
    pub node: Arc<CompilerNode>,
    pub boundary: Arc<ErrorBoundary>,
}

/// A unit of business logic with its own definitions and pipeline.
///
/// Module-scope definitions live in the module's node and are private to
/// it. Definitions with another placement are routed to the node that owns
/// that placement: the plugin node, the root node or the shared pool.
///
/// # Example
///
/// ```
/// use daedalus::prelude::*;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let app = Application::new(DaedalusConfig::default()).unwrap();
/// let orders = app.module("orders").unwrap();
///
/// orders.set_pipeline(
///     Pipeline::builder()
///         .main_logic(SyncFnMiddleware::new("handler", &["state"], |args| {
///             args.state()?.insert("ok", json!(true));
///             Ok(())
///         }))
///         .build()
///         .unwrap(),
/// );
///
/// assert_eq!(orders.run(json!({})).await.unwrap(), json!({ "ok": true }));
/// # });
/// ```
pub struct Module {
    name: String,
    owner: Option<Owner>,
    links: Links,
    node: Arc<CompilerNode>,
    definitions: RwLock<IndexMap<String, Definition>>,
    pipeline: RwLock<Pipeline>,
    boundary: ErrorBoundary,
}

impl Module {
    pub(crate) fn new(name: impl Into<String>, owner: Option<Owner>, links: Links) -> Self {
        let name = name.into();
        let node = build_node(&name, owner.as_ref(), &links);
        tracing::debug!(node = node.label(), "module created");
        Self {
            name,
            owner,
            links,
            node,
            definitions: RwLock::new(IndexMap::new()),
            pipeline: RwLock::new(Pipeline::empty()),
            boundary: ErrorBoundary::new(),
        }
    }

    /// Returns the module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the owning plugin's name, if any.
    #[must_use]
    pub fn plugin(&self) -> Option<&str> {
        self.owner.as_ref().map(|owner| owner.name.as_str())
    }

    /// Returns the persistent module node.
    #[must_use]
    pub fn node(&self) -> &Arc<CompilerNode> {
        &self.node
    }

    /// Adds a definition to the node its placement names.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateDefinition` if the target node already owns the
    /// name, or `InvalidDefinition` for plugin scope outside a plugin.
    pub fn define(&self, definition: Definition) -> DaedalusResult<()> {
        match definition.placement() {
            Placement::Scoped(Scope::Module) => {
                let name = definition.name().to_string();
                self.node.add(definition.clone())?;
                self.definitions.write().insert(name, definition);
                Ok(())
            }
            _ => self.target(&definition)?.add(definition),
        }
    }

    /// Adds or overrides a definition without the duplicate check.
    ///
    /// Cached instances of the replaced name are dropped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` for plugin scope outside a plugin.
    pub fn replace(&self, definition: Definition) -> DaedalusResult<()> {
        match definition.placement() {
            Placement::Scoped(Scope::Module) => {
                let name = definition.name().to_string();
                self.node.replace(definition.clone());
                let mut definitions = self.definitions.write();
                definitions.shift_remove(&name);
                definitions.insert(name, definition);
            }
            _ => self.target(&definition)?.replace(definition),
        }
        Ok(())
    }

    /// Installs the module's pipeline.
    pub fn set_pipeline(&self, pipeline: Pipeline) {
        *self.pipeline.write() = pipeline;
    }

    /// Returns a copy of the module's pipeline.
    #[must_use]
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline.read().clone()
    }

    /// Installs the module's error handler.
    pub fn on_error<M: Middleware>(&self, handler: M) {
        self.boundary.set(handler);
    }

    /// Returns the module's own error boundary.
    #[must_use]
    pub fn error_boundary(&self) -> &ErrorBoundary {
        &self.boundary
    }

    /// Returns true if `name` is visible from this module.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.node.has(name)
    }

    /// Resolves `name` on behalf of this module.
    pub async fn get(&self, name: &str) -> DaedalusResult<Instance> {
        self.node.get(name).await
    }

    /// Resolves `name` on behalf of this module and downcasts it.
    pub async fn get_as<T: Any + Send + Sync>(&self, name: &str) -> DaedalusResult<Arc<T>> {
        self.node.get_as(name).await
    }

    /// Runs the pipeline against the persistent module node.
    ///
    /// # Errors
    ///
    /// Returns the run's error when no error handler recovered it.
    pub async fn run(&self, initial: Value) -> DaedalusResult<Value> {
        execute(self.target_for(self.node.clone(), None), initial).await
    }

    /// Runs the pipeline for one HTTP-bound request.
    ///
    /// `http` is injected as the reserved `http` argument. In server mode
    /// the run gets a fresh module node, so module-scope instances are
    /// built per request; in process mode the persistent node is used.
    ///
    /// # Errors
    ///
    /// Returns the run's error when no error handler recovered it.
    pub async fn run_http(&self, initial: Value, http: HttpContext) -> DaedalusResult<Value> {
        let node = match self.links.mode {
            RunMode::Server => self.fresh_node(),
            RunMode::Process => self.node.clone(),
        };
        execute(self.target_for(node, Some(http)), initial).await
    }

    /// Builds a module node holding copies of every module-scope definition
    /// and an empty cache.
    #[must_use]
    pub fn fresh_node(&self) -> Arc<CompilerNode> {
        let node = build_node(&self.name, self.owner.as_ref(), &self.links);
        for definition in self.definitions.read().values() {
            node.replace(definition.clone());
        }
        node
    }

    fn target_for(&self, node: Arc<CompilerNode>, http: Option<HttpContext>) -> RunTarget<'_> {
        let mut boundaries = vec![&self.boundary];
        if let Some(owner) = &self.owner {
            boundaries.push(owner.boundary.as_ref());
        }
        RunTarget {
            node,
            pipeline: self.pipeline(),
            boundaries,
            http,
        }
    }

    fn target(&self, definition: &Definition) -> DaedalusResult<&Arc<CompilerNode>> {
        match definition.placement() {
            Placement::Scoped(Scope::Module) => Ok(&self.node),
            Placement::Scoped(Scope::Plugin) => match &self.owner {
                Some(owner) => Ok(&owner.node),
                None => Err(DaedalusError::invalid_definition(
                    definition.name(),
                    format!("plugin scope requires a plugin, but module '{}' has none", self.name),
                )),
            },
            Placement::Scoped(Scope::Public) => Ok(&self.links.root),
            Placement::Shared(_) => Ok(&self.links.shared),
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("plugin", &self.plugin())
            .field("definitions", &self.definitions.read().keys().collect::<Vec<_>>())
            .field("pipeline", &self.pipeline.read().len())
            .field("boundary", &self.boundary)
            .finish()
    }
}

fn build_node(name: &str, owner: Option<&Owner>, links: &Links) -> Arc<CompilerNode> {
    let kind = NodeKind::module(name, owner.map(|owner| owner.name.clone()));
    let mut builder = CompilerNode::builder(kind)
        .root(links.root.clone())
        .shared(links.shared.clone());
    if let Some(owner) = owner {
        builder = builder.parent(owner.node.clone());
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Application;
    use daedalus_config::DaedalusConfig;

    struct Counter;

    fn counter() -> Definition {
        Definition::builder("counter")
            .factory(|_| Ok(Counter))
            .build()
            .unwrap()
    }

    #[test]
    fn test_plugin_scope_outside_plugin_rejected() {
        let app = Application::new(DaedalusConfig::default()).unwrap();
        let module = app.module("orders").unwrap();

        let definition = Definition::builder("cache")
            .scope(Scope::Plugin)
            .factory(|_| Ok(Counter))
            .build()
            .unwrap();

        let err = module.define(definition).unwrap_err();
        assert!(matches!(err, DaedalusError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_public_definition_goes_to_root() {
        let app = Application::new(DaedalusConfig::default()).unwrap();
        let module = app.module("orders").unwrap();

        let definition = Definition::builder("clock")
            .scope(Scope::Public)
            .factory(|_| Ok(Counter))
            .build()
            .unwrap();
        module.define(definition).unwrap();

        assert!(app.root().has_own("clock"));
        assert!(!module.node().has_own("clock"));
    }

    #[tokio::test]
    async fn test_fresh_node_has_definitions_but_no_cache() {
        let app = Application::new(DaedalusConfig::default()).unwrap();
        let module = app.module("orders").unwrap();
        module.define(counter()).unwrap();

        let persistent = module.get_as::<Counter>("counter").await.unwrap();
        let fresh = module.fresh_node();

        assert!(fresh.has_own("counter"));
        assert!(!fresh.is_resolved("counter"));
        let rebuilt = fresh.get_as::<Counter>("counter").await.unwrap();
        assert!(!Arc::ptr_eq(&persistent, &rebuilt));
    }

    #[tokio::test]
    async fn test_replace_reaches_fresh_nodes() {
        struct Versioned(u8);

        let app = Application::new(DaedalusConfig::default()).unwrap();
        let module = app.module("orders").unwrap();
        module
            .define(Definition::builder("v").factory(|_| Ok(Versioned(1))).build().unwrap())
            .unwrap();
        module
            .replace(Definition::builder("v").factory(|_| Ok(Versioned(2))).build().unwrap())
            .unwrap();

        assert_eq!(module.get_as::<Versioned>("v").await.unwrap().0, 2);
        assert_eq!(module.fresh_node().get_as::<Versioned>("v").await.unwrap().0, 2);
    }
}
