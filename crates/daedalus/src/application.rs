//! The application: root node, shared pool and component registry.

use crate::mediator::Mediator;
use crate::module::Module;
use crate::plugin::Plugin;
use daedalus_config::{DaedalusConfig, RunMode};
use daedalus_core::{
    CompilerNode, DaedalusError, DaedalusResult, Definition, Instance, NodeKind, Placement, Scope,
};
use daedalus_telemetry::{TelemetryConfig, TelemetryResult};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Public definition holding the `values` table of the configuration.
pub const CONFIG_DEFINITION: &str = "config";

/// Public definition holding the application's [`Mediator`].
pub const MEDIATOR_DEFINITION: &str = "mediator";

/// Application-wide nodes every component links to.
#[derive(Debug, Clone)]
pub(crate) struct Links {
    pub root: Arc<CompilerNode>,
    pub shared: Arc<CompilerNode>,
    pub mode: RunMode,
}

/// A Daedalus application.
///
/// Owns the public node, the shared pool and every plugin and module.
/// Module and plugin names are unique within their registry.
///
/// # Example
///
/// ```
/// use daedalus::prelude::*;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let app = Application::new(DaedalusConfig::default()).unwrap();
/// app.define(
///     Definition::builder("greeting")
///         .scope(Scope::Public)
///         .factory(|_| Ok(String::from("hello")))
///         .build()
///         .unwrap(),
/// )
/// .unwrap();
///
/// let orders = app.module("orders").unwrap();
/// let greeting = orders.get_as::<String>("greeting").await.unwrap();
/// assert_eq!(greeting.as_str(), "hello");
/// # });
/// ```
pub struct Application {
    config: Arc<DaedalusConfig>,
    links: Links,
    mediator: Arc<Mediator>,
    plugins: RwLock<IndexMap<String, Arc<Plugin>>>,
    modules: RwLock<IndexMap<String, Arc<Module>>>,
}

impl Application {
    /// Creates an application from a loaded configuration.
    ///
    /// Registers the public definitions `config` (the `values` table as an
    /// `Arc<serde_json::Value>`) and `mediator`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` if a built-in definition cannot be built.
    pub fn new(config: DaedalusConfig) -> DaedalusResult<Self> {
        let shared = CompilerNode::builder(NodeKind::Shared).build();
        let root = CompilerNode::builder(NodeKind::Root)
            .shared(shared.clone())
            .build();
        shared.link_root(&root);
        let mediator = Arc::new(Mediator::new(&root));

        let values: Instance = Arc::new(config.values_json());
        root.add(
            Definition::builder(CONFIG_DEFINITION)
                .raw_factory(move |_| Ok(Some(values.clone())))
                .scope(Scope::Public)
                .build()?,
        )?;
        let shared_mediator: Instance = mediator.clone();
        root.add(
            Definition::builder(MEDIATOR_DEFINITION)
                .raw_factory(move |_| Ok(Some(shared_mediator.clone())))
                .scope(Scope::Public)
                .build()?,
        )?;

        tracing::info!(
            service = %config.telemetry.service_name,
            mode = config.runtime.mode.as_str(),
            "application created"
        );

        Ok(Self {
            links: Links {
                root,
                shared,
                mode: config.runtime.mode,
            },
            config: Arc::new(config),
            mediator,
            plugins: RwLock::new(IndexMap::new()),
            modules: RwLock::new(IndexMap::new()),
        })
    }

    /// Installs logging and metrics from the `telemetry` section.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError` if a subscriber or recorder is already
    /// installed, or the metrics listener cannot be started.
    pub fn init_telemetry(&self) -> TelemetryResult<()> {
        daedalus_telemetry::init_telemetry(&TelemetryConfig::from(&self.config.telemetry))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DaedalusConfig {
        &self.config
    }

    /// Returns the run mode.
    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.links.mode
    }

    /// Returns the public node.
    #[must_use]
    pub fn root(&self) -> &Arc<CompilerNode> {
        &self.links.root
    }

    /// Returns the shared pool.
    #[must_use]
    pub fn shared(&self) -> &Arc<CompilerNode> {
        &self.links.shared
    }

    /// Returns the event mediator.
    #[must_use]
    pub fn mediator(&self) -> &Arc<Mediator> {
        &self.mediator
    }

    /// Adds a public or shared definition.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateDefinition` if the target node already owns the
    /// name, or `InvalidDefinition` for module or plugin scope.
    pub fn define(&self, definition: Definition) -> DaedalusResult<()> {
        self.target(&definition)?.add(definition)
    }

    /// Adds or overrides a public or shared definition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` for module or plugin scope.
    pub fn replace(&self, definition: Definition) -> DaedalusResult<()> {
        self.target(&definition)?.replace(definition);
        Ok(())
    }

    /// Creates a plugin.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateComponent` if a plugin with that name exists.
    pub fn plugin(&self, name: &str) -> DaedalusResult<Arc<Plugin>> {
        let mut plugins = self.plugins.write();
        if plugins.contains_key(name) {
            return Err(DaedalusError::duplicate_component("plugin", name));
        }
        let plugin = Arc::new(Plugin::new(name, self.links.clone()));
        plugins.insert(name.to_string(), plugin.clone());
        Ok(plugin)
    }

    /// Creates a module that belongs to no plugin.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateComponent` if a module with that name exists.
    pub fn module(&self, name: &str) -> DaedalusResult<Arc<Module>> {
        let mut modules = self.modules.write();
        if modules.contains_key(name) {
            return Err(DaedalusError::duplicate_component("module", name));
        }
        let module = Arc::new(Module::new(name, None, self.links.clone()));
        modules.insert(name.to_string(), module.clone());
        Ok(module)
    }

    /// Returns a plugin by name.
    #[must_use]
    pub fn get_plugin(&self, name: &str) -> Option<Arc<Plugin>> {
        self.plugins.read().get(name).cloned()
    }

    /// Returns a standalone module by name.
    #[must_use]
    pub fn get_module(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.read().get(name).cloned()
    }

    /// Returns plugin names in registration order.
    #[must_use]
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.read().keys().cloned().collect()
    }

    /// Returns standalone module names in registration order.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }

    /// Returns true if `name` is defined in the public node or the shared pool.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.links.root.has(name)
    }

    /// Resolves a public definition.
    ///
    /// Shared definitions are only reachable by allow-listed modules and
    /// plugins, so they are denied here.
    pub async fn get(&self, name: &str) -> DaedalusResult<Instance> {
        self.links.root.get(name).await
    }

    /// Resolves a public definition and downcasts it.
    pub async fn get_as<T: Any + Send + Sync>(&self, name: &str) -> DaedalusResult<Arc<T>> {
        self.links.root.get_as(name).await
    }

    /// Returns the configuration `values` entry at a dotted path.
    #[must_use]
    pub fn value(&self, path: &str) -> Option<&Value> {
        self.config.value(path)
    }

    fn target(&self, definition: &Definition) -> DaedalusResult<&Arc<CompilerNode>> {
        match definition.placement() {
            Placement::Scoped(Scope::Public) => Ok(&self.links.root),
            Placement::Shared(_) => Ok(&self.links.shared),
            Placement::Scoped(scope) => Err(DaedalusError::invalid_definition(
                definition.name(),
                format!(
                    "{} scope must be defined on a {}",
                    scope.as_str(),
                    scope.as_str()
                ),
            )),
        }
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("mode", &self.links.mode)
            .field("plugins", &self.plugin_names())
            .field("modules", &self.module_names())
            .field("mediator", &self.mediator)
            .finish_non_exhaustive()
    }
}
