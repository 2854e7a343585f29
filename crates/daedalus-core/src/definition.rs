//! Service definitions.
//!
//! A [`Definition`] is a named recipe for building one service: a factory,
//! the parameters the factory wants injected, and where the built instance
//! lives (its [`Placement`]).
//!
//! # Example
//!
//! ```
//! use daedalus_core::{Definition, Scope};
//!
//! struct Repo;
//! struct Service {
//!     repo: std::sync::Arc<Repo>,
//! }
//!
//! let repo = Definition::builder("repo")
//!     .factory(|_| Ok(Repo))
//!     .build()
//!     .unwrap();
//!
//! let service = Definition::builder("service")
//!     .params(&["repo"])
//!     .factory(|args| Ok(Service { repo: args.get::<Repo>("repo")? }))
//!     .scope(Scope::Module)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(service.name(), "service");
//! assert!(!repo.is_async());
//! ```

use crate::context::Requester;
use crate::error::{DaedalusError, DaedalusResult};
use crate::param::{Param, ParamList};
use crate::resolver::Arguments;
use crate::BoxFuture;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A type-erased service instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Default visibility bucket of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Private to the declaring module; one instance per module node.
    #[default]
    Module,
    /// Visible to every module of the declaring plugin.
    Plugin,
    /// Visible everywhere; lives in the root node.
    Public,
}

impl Scope {
    /// Returns the scope name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Plugin => "plugin",
            Self::Public => "public",
        }
    }
}

/// Which rule granted access to a shared definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharingPermission {
    /// Both the plugin and the module are allow-listed.
    Complete,
    /// The requester's plugin is allow-listed.
    Plugin,
    /// The requester module is allow-listed.
    Module,
}

/// Explicit allow-list for a definition living in the shared pool.
///
/// # Example
///
/// ```
/// use daedalus_core::{Requester, SharedPolicy, SharingPermission};
///
/// let policy = SharedPolicy::new().with_module("A");
/// assert_eq!(
///     policy.permission_for(&Requester::module("A", None)),
///     Some(SharingPermission::Module)
/// );
/// assert_eq!(policy.permission_for(&Requester::module("B", None)), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedPolicy {
    #[serde(default)]
    modules: BTreeSet<String>,
    #[serde(default)]
    plugins: BTreeSet<String>,
}

impl SharedPolicy {
    /// An empty allow-list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows a module by name.
    #[must_use]
    pub fn with_module(mut self, name: impl Into<String>) -> Self {
        self.modules.insert(name.into());
        self
    }

    /// Allows a plugin by name.
    #[must_use]
    pub fn with_plugin(mut self, name: impl Into<String>) -> Self {
        self.plugins.insert(name.into());
        self
    }

    /// Returns the allow-listed module names.
    #[must_use]
    pub fn modules(&self) -> &BTreeSet<String> {
        &self.modules
    }

    /// Returns the allow-listed plugin names.
    #[must_use]
    pub fn plugins(&self) -> &BTreeSet<String> {
        &self.plugins
    }

    /// Decides whether `requester` may resolve the definition.
    ///
    /// Rules are tried in order: complete (plugin and module), plugin, module.
    #[must_use]
    pub fn permission_for(&self, requester: &Requester) -> Option<SharingPermission> {
        let module_allowed = requester
            .module_name()
            .is_some_and(|module| self.modules.contains(module));
        let plugin_allowed = requester
            .plugin_name()
            .is_some_and(|plugin| self.plugins.contains(plugin));

        if requester.is_plugin_member() && plugin_allowed && module_allowed {
            Some(SharingPermission::Complete)
        } else if requester.is_plugin_member() && plugin_allowed {
            Some(SharingPermission::Plugin)
        } else if module_allowed {
            Some(SharingPermission::Module)
        } else {
            None
        }
    }
}

/// Where a definition's instance lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Placed by visibility bucket.
    Scoped(Scope),
    /// Placed in the shared pool behind an allow-list.
    Shared(SharedPolicy),
}

impl Default for Placement {
    fn default() -> Self {
        Self::Scoped(Scope::Module)
    }
}

type SyncFactoryFn = dyn Fn(&Arguments) -> DaedalusResult<Option<Instance>> + Send + Sync;
type AsyncFactoryFn = dyn Fn(Arguments) -> BoxFuture<'static, DaedalusResult<()>> + Send + Sync;
type PassFn = dyn Fn(&Arguments) -> DaedalusResult<()> + Send + Sync;

/// How a definition builds its instance.
#[derive(Clone)]
pub enum Factory {
    /// Returns the instance directly; `None` means "empty".
    Sync(Arc<SyncFactoryFn>),
    /// Kicks off construction and delivers the instance through the
    /// continuation, possibly after the returned future completes.
    Async(Arc<AsyncFactoryFn>),
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Factory::Sync"),
            Self::Async(_) => f.write_str("Factory::Async"),
        }
    }
}

/// Post-construction hook.
///
/// The hook runs once per construction, before the instance is cached. The
/// new instance is injected under `property` (the definition name unless set)
/// alongside the hook's other declared dependencies.
#[derive(Clone)]
pub struct CompilerPass {
    property: Option<String>,
    params: ParamList,
    hook: Arc<PassFn>,
}

impl CompilerPass {
    /// Creates a compiler pass with its declared parameters.
    pub fn new<F>(params: &[&str], hook: F) -> Self
    where
        F: Fn(&Arguments) -> DaedalusResult<()> + Send + Sync + 'static,
    {
        Self {
            property: None,
            params: ParamList::for_factory(params),
            hook: Arc::new(hook),
        }
    }

    /// Sets the identifier the new instance is injected under.
    #[must_use]
    pub fn property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Returns the injection identifier, falling back to `definition_name`.
    #[must_use]
    pub fn property_or<'a>(&'a self, definition_name: &'a str) -> &'a str {
        self.property.as_deref().unwrap_or(definition_name)
    }

    /// Returns the declared parameters.
    #[must_use]
    pub fn params(&self) -> &ParamList {
        &self.params
    }

    /// Runs the hook.
    pub fn apply(&self, args: &Arguments) -> DaedalusResult<()> {
        (self.hook)(args)
    }
}

impl fmt::Debug for CompilerPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerPass")
            .field("property", &self.property)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// A named recipe for building one service.
#[derive(Clone)]
pub struct Definition {
    name: String,
    params: ParamList,
    factory: Factory,
    placement: Placement,
    cache: bool,
    dependencies: Vec<Definition>,
    compiler_pass: Option<CompilerPass>,
}

impl Definition {
    /// Starts building a definition.
    pub fn builder(name: impl Into<String>) -> DefinitionBuilder {
        DefinitionBuilder::new(name)
    }

    /// A definition that always yields the given instance.
    ///
    /// # Example
    ///
    /// ```
    /// use daedalus_core::{Definition, Instance};
    /// use std::sync::Arc;
    ///
    /// let config: Instance = Arc::new(String::from("postgres://localhost"));
    /// let def = Definition::from_instance("dsn", config).unwrap();
    /// assert!(def.params().is_empty());
    /// ```
    pub fn from_instance(name: impl Into<String>, instance: Instance) -> DaedalusResult<Self> {
        Self::builder(name)
            .raw_factory(move |_| Ok(Some(instance.clone())))
            .build()
    }

    /// Returns the definition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the factory's declared parameters.
    #[must_use]
    pub fn params(&self) -> &ParamList {
        &self.params
    }

    /// Returns the factory.
    #[must_use]
    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Returns the placement.
    #[must_use]
    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Returns the scope, or `None` for shared definitions.
    #[must_use]
    pub fn scope(&self) -> Option<Scope> {
        match &self.placement {
            Placement::Scoped(scope) => Some(*scope),
            Placement::Shared(_) => None,
        }
    }

    /// Returns the shared policy, if this definition lives in the shared pool.
    #[must_use]
    pub fn shared(&self) -> Option<&SharedPolicy> {
        match &self.placement {
            Placement::Shared(policy) => Some(policy),
            Placement::Scoped(_) => None,
        }
    }

    /// Returns true for async factories.
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self.factory, Factory::Async(_))
    }

    /// Returns true if built instances are memoized.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cache
    }

    /// Returns the nested definitions.
    #[must_use]
    pub fn dependencies(&self) -> &[Definition] {
        &self.dependencies
    }

    /// Returns the compiler pass, if any.
    #[must_use]
    pub fn compiler_pass(&self) -> Option<&CompilerPass> {
        self.compiler_pass.as_ref()
    }

    pub(crate) fn dependencies_mut(&mut self) -> &mut Vec<Definition> {
        &mut self.dependencies
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("factory", &self.factory)
            .field("placement", &self.placement)
            .field("cache", &self.cache)
            .field("dependencies", &self.dependencies)
            .field("compiler_pass", &self.compiler_pass)
            .finish()
    }
}

/// Builder for [`Definition`].
///
/// Validation happens in [`build`](Self::build), so malformed definitions are
/// rejected before they are ever added to a node.
pub struct DefinitionBuilder {
    name: String,
    params: ParamList,
    factory: Option<Factory>,
    scope: Option<Scope>,
    shared: Option<SharedPolicy>,
    cache: bool,
    dependencies: Vec<Definition>,
    compiler_pass: Option<CompilerPass>,
}

impl DefinitionBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: ParamList::empty(),
            factory: None,
            scope: None,
            shared: None,
            cache: true,
            dependencies: Vec::new(),
            compiler_pass: None,
        }
    }

    /// Declares the factory's parameters (`next` is the continuation).
    #[must_use]
    pub fn params(mut self, identifiers: &[&str]) -> Self {
        self.params = ParamList::for_factory(identifiers);
        self
    }

    /// Declares the factory's parameters explicitly.
    #[must_use]
    pub fn param_list(mut self, params: ParamList) -> Self {
        self.params = params;
        self
    }

    /// Sets a synchronous factory.
    #[must_use]
    pub fn factory<T, F>(self, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Arguments) -> DaedalusResult<T> + Send + Sync + 'static,
    {
        self.raw_factory(move |args| factory(args).map(|value| Some(Arc::new(value) as Instance)))
    }

    /// Sets a synchronous factory that may produce nothing.
    #[must_use]
    pub fn optional_factory<T, F>(self, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Arguments) -> DaedalusResult<Option<T>> + Send + Sync + 'static,
    {
        self.raw_factory(move |args| {
            factory(args).map(|value| value.map(|value| Arc::new(value) as Instance))
        })
    }

    /// Sets a synchronous factory producing type-erased instances.
    #[must_use]
    pub fn raw_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Arguments) -> DaedalusResult<Option<Instance>> + Send + Sync + 'static,
    {
        self.factory = Some(Factory::Sync(Arc::new(factory)));
        self
    }

    /// Sets an async factory. The factory must declare `next` and settle the
    /// continuation exactly once.
    #[must_use]
    pub fn async_factory<F, Fut>(mut self, factory: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DaedalusResult<()>> + Send + 'static,
    {
        self.factory = Some(Factory::Async(Arc::new(move |args: Arguments| {
            Box::pin(factory(args)) as BoxFuture<'static, DaedalusResult<()>>
        })));
        self
    }

    /// Places the definition by scope.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Places the definition in the shared pool.
    #[must_use]
    pub fn shared(mut self, policy: SharedPolicy) -> Self {
        self.shared = Some(policy);
        self
    }

    /// Disables (or re-enables) memoization.
    #[must_use]
    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Adds a nested definition, registered alongside this one.
    #[must_use]
    pub fn dependency(mut self, definition: Definition) -> Self {
        self.dependencies.push(definition);
        self
    }

    /// Attaches a compiler pass.
    #[must_use]
    pub fn compiler_pass(mut self, pass: CompilerPass) -> Self {
        self.compiler_pass = Some(pass);
        self
    }

    /// Validates and builds the definition.
    ///
    /// # Errors
    ///
    /// - `InvalidAsyncDefinition` if an async factory does not declare `next`
    /// - `InvalidDefinition` if the name is empty, no factory is set, both a
    ///   scope and a shared policy are set, a synchronous factory declares the
    ///   continuation, or a parameter is declared twice
    pub fn build(self) -> DaedalusResult<Definition> {
        let name = self.name;
        if name.is_empty() {
            return Err(DaedalusError::invalid_definition(name, "name must not be empty"));
        }

        let Some(factory) = self.factory else {
            return Err(DaedalusError::invalid_definition(name, "no factory set"));
        };

        let placement = match (self.scope, self.shared) {
            (Some(_), Some(_)) => {
                return Err(DaedalusError::invalid_definition(
                    name,
                    "a definition is either scoped or shared, not both",
                ))
            }
            (Some(scope), None) => Placement::Scoped(scope),
            (None, Some(policy)) => Placement::Shared(policy),
            (None, None) => Placement::default(),
        };

        if let Some(duplicate) = self.params.first_duplicate() {
            return Err(DaedalusError::invalid_definition(
                &name,
                format!("parameter '{duplicate}' is declared twice"),
            ));
        }

        if self
            .params
            .iter()
            .any(|param| matches!(param, Param::Control(_)))
        {
            return Err(DaedalusError::invalid_definition(
                name,
                "factories cannot declare middleware control primitives",
            ));
        }

        match factory {
            Factory::Async(_) if !self.params.declares_continuation() => {
                return Err(DaedalusError::invalid_async(
                    name,
                    "async factories must declare the 'next' continuation",
                ));
            }
            Factory::Sync(_) if self.params.declares_continuation() => {
                return Err(DaedalusError::invalid_definition(
                    name,
                    "the 'next' continuation is only available to async factories",
                ));
            }
            _ => {}
        }

        Ok(Definition {
            name,
            params: self.params,
            factory,
            placement,
            cache: self.cache,
            dependencies: self.dependencies,
            compiler_pass: self.compiler_pass,
        })
    }
}
