//! Compiler nodes.
//!
//! A [`CompilerNode`] owns the definitions registered at one scope level and
//! a cache of the instances built from them. Nodes link to each other through
//! shared ownership handles:
//!
//! ```text
//!            shared pool
//!                 ^
//!   module -> plugin -> root
//! ```
//!
//! Resolution searches self, then parent, then root, and finally the shared
//! pool (behind an allow-list check). The instance is built and cached at the
//! node that owns the definition, and the definition's own parameters are
//! resolved against that owning node.
//!
//! The root owns its shared pool, so the pool points back at the root
//! through a weak link set once with [`CompilerNode::link_root`].

use crate::context::{Requester, ResolveContext};
use crate::definition::{Definition, Factory, Instance};
use crate::error::{DaedalusError, DaedalusResult};
use crate::resolver::{ArgumentResolver, Bindings, CustomArgs};
use crate::signal::{Construction, Continuation, Signal};
use crate::synchronizer::synchronize;
use crate::BoxFuture;
use indexmap::IndexMap;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::OnceCell;

/// The scope level a node represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The application-wide node holding public definitions.
    Root,
    /// The side pool holding allow-listed definitions.
    Shared,
    /// A plugin node.
    Plugin {
        /// Plugin name.
        name: String,
    },
    /// A module node, optionally owned by a plugin.
    Module {
        /// Module name.
        name: String,
        /// Owning plugin name.
        plugin: Option<String>,
    },
}

impl NodeKind {
    /// A module node.
    #[must_use]
    pub fn module(name: impl Into<String>, plugin: Option<String>) -> Self {
        Self::Module {
            name: name.into(),
            plugin,
        }
    }

    /// A plugin node.
    #[must_use]
    pub fn plugin(name: impl Into<String>) -> Self {
        Self::Plugin { name: name.into() }
    }

    /// Returns the kind name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Shared => "shared",
            Self::Plugin { .. } => "plugin",
            Self::Module { .. } => "module",
        }
    }

    /// Returns the identity this node resolves on behalf of.
    #[must_use]
    pub fn requester(&self) -> Requester {
        match self {
            Self::Root | Self::Shared => Requester::application(),
            Self::Plugin { name } => Requester::plugin(name.clone()),
            Self::Module { name, plugin } => Requester::module(name.clone(), plugin.clone()),
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Root => "root".to_string(),
            Self::Shared => "shared".to_string(),
            Self::Plugin { name } => format!("plugin:{name}"),
            Self::Module { name, plugin: None } => format!("module:{name}"),
            Self::Module {
                name,
                plugin: Some(plugin),
            } => format!("plugin:{plugin}/module:{name}"),
        }
    }
}

/// Builder for [`CompilerNode`].
#[derive(Debug)]
pub struct CompilerNodeBuilder {
    kind: NodeKind,
    parent: Option<Arc<CompilerNode>>,
    root: Option<Arc<CompilerNode>>,
    shared: Option<Arc<CompilerNode>>,
}

impl CompilerNodeBuilder {
    /// Links the parent node (the owning plugin for plugin modules).
    #[must_use]
    pub fn parent(mut self, parent: Arc<CompilerNode>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Links the root node.
    #[must_use]
    pub fn root(mut self, root: Arc<CompilerNode>) -> Self {
        self.root = Some(root);
        self
    }

    /// Links the shared pool.
    #[must_use]
    pub fn shared(mut self, shared: Arc<CompilerNode>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Builds the node.
    #[must_use]
    pub fn build(self) -> Arc<CompilerNode> {
        Arc::new(CompilerNode {
            label: self.kind.label(),
            kind: self.kind,
            definitions: RwLock::new(IndexMap::new()),
            cache: Mutex::new(HashMap::new()),
            parent: self.parent,
            root: self.root,
            upstream: OnceLock::new(),
            shared: self.shared,
        })
    }
}

/// A registry of definitions plus the instances built from them.
///
/// Each cached name gets its own [`OnceCell`], so concurrent resolutions of
/// the same name against the same node build exactly one instance.
pub struct CompilerNode {
    kind: NodeKind,
    label: String,
    definitions: RwLock<IndexMap<String, Arc<Definition>>>,
    cache: Mutex<HashMap<String, Arc<OnceCell<Instance>>>>,
    parent: Option<Arc<CompilerNode>>,
    root: Option<Arc<CompilerNode>>,
    upstream: OnceLock<Weak<CompilerNode>>,
    shared: Option<Arc<CompilerNode>>,
}

impl CompilerNode {
    /// Starts building a node of the given kind.
    #[must_use]
    pub fn builder(kind: NodeKind) -> CompilerNodeBuilder {
        CompilerNodeBuilder {
            kind,
            parent: None,
            root: None,
            shared: None,
        }
    }

    /// Returns the node kind.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns the node label, e.g. `module:users` or `plugin:billing`.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the identity this node resolves on behalf of.
    #[must_use]
    pub fn requester(&self) -> Requester {
        self.kind.requester()
    }

    /// Returns the linked parent node.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<CompilerNode>> {
        self.parent.as_ref()
    }

    /// Returns the linked root node.
    #[must_use]
    pub fn root(&self) -> Option<&Arc<CompilerNode>> {
        self.root.as_ref()
    }

    /// Returns the linked shared pool.
    #[must_use]
    pub fn shared_pool(&self) -> Option<&Arc<CompilerNode>> {
        self.shared.as_ref()
    }

    /// Points this node back at a root that owns it.
    ///
    /// The link is weak and can be set once; later calls are ignored.
    pub fn link_root(&self, root: &Arc<CompilerNode>) {
        if self.upstream.set(Arc::downgrade(root)).is_err() {
            tracing::warn!(node = %self.label, "root link already set");
        }
    }

    /// Registers a definition and its nested dependencies at this node.
    ///
    /// Either every definition is added or none is.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateDefinition` if any name is already registered here.
    pub fn add(&self, definition: Definition) -> DaedalusResult<()> {
        let mut pending = Vec::new();
        flatten(definition, &mut pending);

        let mut definitions = self.definitions.write();
        for (index, def) in pending.iter().enumerate() {
            let repeated = pending[..index]
                .iter()
                .any(|earlier| earlier.name() == def.name());
            if repeated || definitions.contains_key(def.name()) {
                return Err(DaedalusError::duplicate_definition(
                    def.name(),
                    self.label.clone(),
                ));
            }
        }

        for def in pending {
            tracing::debug!(node = %self.label, definition = def.name(), "definition added");
            definitions.insert(def.name().to_string(), Arc::new(def));
        }
        Ok(())
    }

    /// Registers a definition, replacing any existing one with the same name.
    ///
    /// Cached instances of every replaced name are evicted, so the next
    /// resolution builds from the new definition.
    pub fn replace(&self, definition: Definition) {
        let mut pending = Vec::new();
        flatten(definition, &mut pending);

        let mut definitions = self.definitions.write();
        let mut cache = self.cache.lock();
        for def in pending {
            if cache.remove(def.name()).is_some() {
                tracing::debug!(node = %self.label, definition = def.name(), "cached instance evicted");
            }
            definitions.insert(def.name().to_string(), Arc::new(def));
        }
    }

    /// Returns true if `name` is defined anywhere in the visible chain,
    /// including the shared pool. Permissions are not checked.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.has_own(name)
            || self.links().any(|node| node.has_own(name))
            || self.shared.as_ref().is_some_and(|pool| pool.has_own(name))
    }

    /// Returns true if `name` is defined at this node.
    #[must_use]
    pub fn has_own(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    /// Returns true if an instance of `name` is cached anywhere in the
    /// visible chain.
    #[must_use]
    pub fn is_resolved(&self, name: &str) -> bool {
        self.cached(name).is_some()
            || self.links().any(|node| node.cached(name).is_some())
            || self
                .shared
                .as_ref()
                .is_some_and(|pool| pool.cached(name).is_some())
    }

    /// Returns the definition registered at this node under `name`.
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<Arc<Definition>> {
        self.definitions.read().get(name).cloned()
    }

    /// Returns this node's definition names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.definitions.read().keys().cloned().collect()
    }

    /// Resolves `name` on behalf of this node's own identity.
    pub async fn get(self: &Arc<Self>, name: &str) -> DaedalusResult<Instance> {
        let ctx = ResolveContext::new(self.requester());
        self.compile(name, &ctx).await
    }

    /// Resolves `name` on behalf of this node's own identity and downcasts it.
    pub async fn get_as<T: Any + Send + Sync>(self: &Arc<Self>, name: &str) -> DaedalusResult<Arc<T>> {
        self.get(name).await?.downcast::<T>().map_err(|_| {
            DaedalusError::argument_resolution(
                name,
                self.label.clone(),
                format!("expected {}", type_name::<T>()),
            )
        })
    }

    /// Resolves `name`, building it at its owning node if needed.
    ///
    /// # Errors
    ///
    /// - `DefinitionNotFound` if no node in the visible chain owns `name`
    /// - `SharingPermission` if only the shared pool owns it and the
    ///   requester is not allow-listed
    /// - `CircularDependency` if `name` is already under construction in
    ///   this resolution path
    /// - `EmptyService` if the factory produced nothing
    /// - any error raised while resolving parameters or running the factory
    pub fn compile<'a>(
        self: &'a Arc<Self>,
        name: &'a str,
        ctx: &'a ResolveContext,
    ) -> BoxFuture<'a, DaedalusResult<Instance>> {
        Box::pin(async move {
            let (owner, definition) = self.locate(name, ctx.requester())?;

            if let Some(instance) = owner.cached(name) {
                tracing::trace!(node = %owner.label, definition = name, "cache hit");
                return Ok(instance);
            }

            let key = format!("{}/{}", owner.label, name);
            if ctx.is_constructing(&key) {
                let mut path = ctx.path().to_vec();
                path.push(key);
                tracing::warn!(path = ?path, "circular dependency detected");
                return Err(DaedalusError::circular_dependency(path));
            }
            let ctx = ctx.descend(key);

            if !definition.is_cached() {
                return owner.construct(&definition, &ctx).await;
            }

            let cell = owner.cell(name);
            let instance = cell
                .get_or_try_init(|| owner.construct(&definition, &ctx))
                .await?;
            Ok(instance.clone())
        })
    }

    /// Finds the node owning `name` in search order.
    fn locate(
        self: &Arc<Self>,
        name: &str,
        requester: &Requester,
    ) -> DaedalusResult<(Arc<CompilerNode>, Arc<Definition>)> {
        if let Some(definition) = self.definition(name) {
            return Ok((self.clone(), definition));
        }
        for node in self.links() {
            if let Some(definition) = node.definition(name) {
                return Ok((node, definition));
            }
        }

        if let Some(pool) = &self.shared {
            if let Some(definition) = pool.definition(name) {
                if let Some(policy) = definition.shared() {
                    let Some(permission) = policy.permission_for(requester) else {
                        tracing::debug!(
                            definition = name,
                            requester = %requester,
                            "shared definition denied"
                        );
                        return Err(DaedalusError::sharing_permission(name, requester.clone()));
                    };
                    tracing::trace!(definition = name, permission = ?permission, "shared definition granted");
                }
                return Ok((pool.clone(), definition));
            }
        }

        Err(DaedalusError::definition_not_found(name, requester.to_string()))
    }

    /// Builds one instance of `definition` at this node.
    async fn construct(
        self: &Arc<Self>,
        definition: &Definition,
        ctx: &ResolveContext,
    ) -> DaedalusResult<Instance> {
        let context = format!("definition '{}' in {}", definition.name(), self.label);

        let built = match definition.factory() {
            Factory::Sync(factory) => {
                let args = ArgumentResolver::resolve(
                    definition.params(),
                    self,
                    ctx,
                    &Bindings::none(),
                    &context,
                )
                .await?;
                factory(&args)?
            }
            Factory::Async(factory) => {
                let signal = Arc::new(Signal::<Construction>::new());
                let bindings = Bindings::none().with_continuation(Continuation::new(signal.clone()));
                let args =
                    ArgumentResolver::resolve(definition.params(), self, ctx, &bindings, &context)
                        .await?;
                factory(args).await?;
                let thunk = synchronize(&signal).await?;
                thunk()
            }
        };
        let instance = built.ok_or_else(|| DaedalusError::empty_service(definition.name()))?;

        if let Some(pass) = definition.compiler_pass() {
            let mut custom = CustomArgs::new();
            custom.insert(
                pass.property_or(definition.name()).to_string(),
                instance.clone(),
            );
            let args = ArgumentResolver::resolve(
                pass.params(),
                self,
                ctx,
                &Bindings::none().with_custom(&custom),
                &format!("compiler pass of {context}"),
            )
            .await?;
            pass.apply(&args)?;
        }

        counter!(
            "daedalus_definitions_constructed_total",
            "node" => self.kind.as_str(),
            "factory" => if definition.is_async() { "async" } else { "sync" }
        )
        .increment(1);
        tracing::debug!(
            node = %self.label,
            definition = definition.name(),
            cached = definition.is_cached(),
            "definition constructed"
        );

        Ok(instance)
    }

    fn links(&self) -> impl Iterator<Item = Arc<CompilerNode>> + '_ {
        self.parent
            .iter()
            .chain(self.root.iter())
            .cloned()
            .chain(self.upstream.get().and_then(Weak::upgrade))
    }

    fn cached(&self, name: &str) -> Option<Instance> {
        self.cache
            .lock()
            .get(name)
            .and_then(|cell| cell.get().cloned())
    }

    fn cell(&self, name: &str) -> Arc<OnceCell<Instance>> {
        self.cache
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

impl fmt::Debug for CompilerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerNode")
            .field("label", &self.label)
            .field("definitions", &self.names())
            .field("parent", &self.parent.as_ref().map(|node| node.label()))
            .field("root", &self.root.as_ref().map(|node| node.label()))
            .field("upstream", &self.upstream.get().is_some())
            .field("shared", &self.shared.is_some())
            .finish()
    }
}

fn flatten(mut definition: Definition, out: &mut Vec<Definition>) {
    let nested = std::mem::take(definition.dependencies_mut());
    out.push(definition);
    for dependency in nested {
        flatten(dependency, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{CompilerPass, Scope, SharedPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Repo;

    struct Service {
        repo: Arc<Repo>,
    }

    struct Tree {
        root: Arc<CompilerNode>,
        shared: Arc<CompilerNode>,
    }

    impl Tree {
        fn new() -> Self {
            let shared = CompilerNode::builder(NodeKind::Shared).build();
            let root = CompilerNode::builder(NodeKind::Root)
                .shared(shared.clone())
                .build();
            shared.link_root(&root);
            Self { root, shared }
        }

        fn plugin(&self, name: &str) -> Arc<CompilerNode> {
            CompilerNode::builder(NodeKind::plugin(name))
                .root(self.root.clone())
                .shared(self.shared.clone())
                .build()
        }

        fn module(&self, name: &str, plugin: Option<&Arc<CompilerNode>>) -> Arc<CompilerNode> {
            let plugin_name = plugin.and_then(|node| match node.kind() {
                NodeKind::Plugin { name } => Some(name.clone()),
                _ => None,
            });
            let mut builder = CompilerNode::builder(NodeKind::module(name, plugin_name))
                .root(self.root.clone())
                .shared(self.shared.clone());
            if let Some(plugin) = plugin {
                builder = builder.parent(plugin.clone());
            }
            builder.build()
        }
    }

    fn counted(name: &str, counter: &Arc<AtomicUsize>) -> Definition {
        let counter = counter.clone();
        Definition::builder(name)
            .factory(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Repo)
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_singleton_per_node() {
        let tree = Tree::new();
        let module = tree.module("users", None);
        let builds = Arc::new(AtomicUsize::new(0));

        module.add(counted("repo", &builds)).unwrap();
        module
            .add(
                Definition::builder("service")
                    .params(&["repo"])
                    .factory(|args| Ok(Service { repo: args.get::<Repo>("repo")? }))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let service = module.get_as::<Service>("service").await.unwrap();
        let repo = module.get_as::<Repo>("repo").await.unwrap();

        assert!(Arc::ptr_eq(&service.repo, &repo));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(module.is_resolved("repo"));
    }

    #[tokio::test]
    async fn test_uncached_definition_builds_every_time() {
        let tree = Tree::new();
        let module = tree.module("users", None);
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();

        module
            .add(
                Definition::builder("request_id")
                    .factory(move |_| Ok(counter.fetch_add(1, Ordering::SeqCst)))
                    .cache(false)
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let first = module.get_as::<usize>("request_id").await.unwrap();
        let second = module.get_as::<usize>("request_id").await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert!(!module.is_resolved("request_id"));
    }

    #[tokio::test]
    async fn test_module_scope_is_private() {
        let tree = Tree::new();
        let a = tree.module("a", None);
        let b = tree.module("b", None);
        a.add(Definition::builder("secret").factory(|_| Ok(Repo)).build().unwrap())
            .unwrap();

        assert!(a.get("secret").await.is_ok());
        let err = b.get("secret").await.unwrap_err();
        assert!(matches!(err, DaedalusError::DefinitionNotFound { .. }));
        assert!(err.to_string().contains("module 'b'"));
    }

    #[tokio::test]
    async fn test_public_definition_is_shared_by_all_modules() {
        let tree = Tree::new();
        let a = tree.module("a", None);
        let b = tree.module("b", None);
        tree.root
            .add(
                Definition::builder("clock")
                    .factory(|_| Ok(Repo))
                    .scope(Scope::Public)
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let from_a = a.get("clock").await.unwrap();
        let from_b = b.get("clock").await.unwrap();
        assert!(Arc::ptr_eq(&from_a, &from_b));
        assert!(tree.root.is_resolved("clock"));
        assert!(!a.has_own("clock"));
        assert!(a.has("clock"));
    }

    #[tokio::test]
    async fn test_plugin_scope_visible_to_members_only() {
        let tree = Tree::new();
        let billing = tree.plugin("billing");
        let invoices = tree.module("invoices", Some(&billing));
        let outsider = tree.module("outsider", None);

        billing
            .add(
                Definition::builder("ledger")
                    .factory(|_| Ok(Repo))
                    .scope(Scope::Plugin)
                    .build()
                    .unwrap(),
            )
            .unwrap();

        assert!(invoices.get("ledger").await.is_ok());
        assert!(billing.is_resolved("ledger"));
        assert!(matches!(
            outsider.get("ledger").await,
            Err(DaedalusError::DefinitionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_shared_permission() {
        let tree = Tree::new();
        tree.shared
            .add(
                Definition::builder("mailer")
                    .factory(|_| Ok(Repo))
                    .shared(SharedPolicy::new().with_module("A"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let a = tree.module("A", None);
        let b = tree.module("B", None);

        assert!(a.get("mailer").await.is_ok());

        // Cached instances are still guarded.
        assert!(b.is_resolved("mailer"));
        match b.get("mailer").await.unwrap_err() {
            DaedalusError::SharingPermission { name, requester } => {
                assert_eq!(name, "mailer");
                assert_eq!(requester.module_name(), Some("B"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shared_permission_by_plugin() {
        let tree = Tree::new();
        tree.shared
            .add(
                Definition::builder("gateway")
                    .factory(|_| Ok(Repo))
                    .shared(SharedPolicy::new().with_plugin("payments"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let payments = tree.plugin("payments");
        let member = tree.module("refunds", Some(&payments));
        let other = tree.module("refunds", None);

        assert!(member.get("gateway").await.is_ok());
        assert!(payments.get("gateway").await.is_ok());
        assert!(other.get("gateway").await.is_err());
    }

    #[tokio::test]
    async fn test_shared_pool_and_root_resolve_through_each_other() {
        let tree = Tree::new();
        tree.root
            .add(
                Definition::builder("repo")
                    .scope(Scope::Public)
                    .factory(|_| Ok(Repo))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        tree.shared
            .add(
                Definition::builder("service")
                    .params(&["repo"])
                    .factory(|args| Ok(Service { repo: args.get::<Repo>("repo")? }))
                    .shared(SharedPolicy::new().with_module("A"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        tree.root
            .add(
                Definition::builder("facade")
                    .scope(Scope::Public)
                    .params(&["service"])
                    .factory(|args| Ok(args.get::<Service>("service")?))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        // Root definitions reach the pool on behalf of the original requester.
        let b = tree.module("B", None);
        let err = b.get("facade").await.unwrap_err();
        assert!(matches!(err, DaedalusError::SharingPermission { .. }));

        let a = tree.module("A", None);
        let service = a.get_as::<Service>("service").await.unwrap();
        let repo = tree.root.get_as::<Repo>("repo").await.unwrap();
        assert!(Arc::ptr_eq(&service.repo, &repo));

        let facade = a.get_as::<Arc<Service>>("facade").await.unwrap();
        assert!(Arc::ptr_eq(&*facade, &service));
    }

    #[test]
    fn test_pool_link_does_not_keep_root_alive() {
        let Tree { root, shared } = Tree::new();
        root.add(
            Definition::builder("repo")
                .scope(Scope::Public)
                .factory(|_| Ok(Repo))
                .build()
                .unwrap(),
        )
        .unwrap();
        assert!(shared.has("repo"));

        drop(root);
        assert!(!shared.has("repo"));
    }

    #[tokio::test]
    async fn test_empty_service() {
        let tree = Tree::new();
        let module = tree.module("users", None);
        module
            .add(
                Definition::builder("nothing")
                    .optional_factory(|_| Ok(None::<Repo>))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let err = module.get("nothing").await.unwrap_err();
        assert!(matches!(err, DaedalusError::EmptyService { name } if name == "nothing"));
        assert!(!module.is_resolved("nothing"));
    }

    #[tokio::test]
    async fn test_missing_dependency_is_argument_error() {
        let tree = Tree::new();
        let module = tree.module("users", None);
        module
            .add(
                Definition::builder("service")
                    .params(&["repo"])
                    .factory(|args| Ok(Service { repo: args.get::<Repo>("repo")? }))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let err = module.get("service").await.unwrap_err();
        match err {
            DaedalusError::ArgumentResolution {
                identifier,
                context,
                reason,
            } => {
                assert_eq!(identifier, "repo");
                assert!(context.contains("service"));
                assert!(reason.contains("module:users"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_circular_dependency() {
        let tree = Tree::new();
        let module = tree.module("x", None);
        module
            .add(
                Definition::builder("a")
                    .params(&["b"])
                    .factory(|_| Ok(Repo))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        module
            .add(
                Definition::builder("b")
                    .params(&["a"])
                    .factory(|_| Ok(Repo))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        match module.get("a").await.unwrap_err() {
            DaedalusError::CircularDependency { path } => {
                assert_eq!(path, vec!["module:x/a", "module:x/b", "module:x/a"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!module.is_resolved("a"));
    }

    #[tokio::test]
    async fn test_async_factory_builds_once_under_concurrency() {
        let tree = Tree::new();
        let module = tree.module("users", None);
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();

        module
            .add(
                Definition::builder("db")
                    .params(&["next"])
                    .async_factory(move |args| {
                        let counter = counter.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            let next = args.continuation()?;
                            tokio::spawn(async move {
                                tokio::time::sleep(Duration::from_millis(10)).await;
                                let _ = next.resolve(|| Repo);
                            });
                            Ok(())
                        }
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let (first, second) = tokio::join!(module.get("db"), module.get("db"));
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_factory_reject() {
        let tree = Tree::new();
        let module = tree.module("users", None);
        module
            .add(
                Definition::builder("db")
                    .params(&["next"])
                    .async_factory(|args| async move {
                        args.continuation()?.reject(DaedalusError::msg("offline"))
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let err = module.get("db").await.unwrap_err();
        assert_eq!(err.to_string(), "offline");
    }

    #[tokio::test]
    async fn test_compiler_pass_sees_new_instance() {
        let tree = Tree::new();
        let module = tree.module("users", None);
        let seen = Arc::new(AtomicUsize::new(0));
        let observed = seen.clone();

        module
            .add(
                Definition::builder("routes")
                    .factory(|_| Ok(vec!["/users"]))
                    .compiler_pass(
                        CompilerPass::new(&["table"], move |args| {
                            let table = args.get::<Vec<&'static str>>("table")?;
                            observed.store(table.len(), Ordering::SeqCst);
                            Ok(())
                        })
                        .property("table"),
                    )
                    .build()
                    .unwrap(),
            )
            .unwrap();

        module.get("routes").await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_compiler_pass_is_not_cached() {
        let tree = Tree::new();
        let module = tree.module("users", None);
        module
            .add(
                Definition::builder("routes")
                    .factory(|_| Ok(Repo))
                    .compiler_pass(CompilerPass::new(&[], |_| Err(DaedalusError::msg("no routes"))))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        assert!(module.get("routes").await.is_err());
        assert!(!module.is_resolved("routes"));
    }

    #[tokio::test]
    async fn test_duplicate_and_replace() {
        let tree = Tree::new();
        let module = tree.module("users", None);
        module
            .add(Definition::builder("repo").factory(|_| Ok(1_u32)).build().unwrap())
            .unwrap();

        let err = module
            .add(Definition::builder("repo").factory(|_| Ok(2_u32)).build().unwrap())
            .unwrap_err();
        assert!(matches!(err, DaedalusError::DuplicateDefinition { .. }));

        assert_eq!(*module.get_as::<u32>("repo").await.unwrap(), 1);

        module.replace(Definition::builder("repo").factory(|_| Ok(2_u32)).build().unwrap());
        assert!(!module.is_resolved("repo"));
        assert_eq!(*module.get_as::<u32>("repo").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_nested_dependencies_registered_together() {
        let tree = Tree::new();
        let module = tree.module("users", None);
        let service = Definition::builder("service")
            .params(&["repo"])
            .factory(|args| Ok(Service { repo: args.get::<Repo>("repo")? }))
            .dependency(Definition::builder("repo").factory(|_| Ok(Repo)).build().unwrap())
            .build()
            .unwrap();

        module.add(service).unwrap();
        assert_eq!(module.names(), vec!["service", "repo"]);
        assert!(module.get("service").await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_add_leaves_node_untouched() {
        let tree = Tree::new();
        let module = tree.module("users", None);
        module
            .add(Definition::builder("repo").factory(|_| Ok(Repo)).build().unwrap())
            .unwrap();

        let service = Definition::builder("service")
            .factory(|_| Ok(Repo))
            .dependency(Definition::builder("repo").factory(|_| Ok(Repo)).build().unwrap())
            .build()
            .unwrap();

        assert!(module.add(service).is_err());
        assert!(!module.has_own("service"));
    }

    #[test]
    fn test_labels() {
        assert_eq!(NodeKind::Root.label(), "root");
        assert_eq!(NodeKind::module("x", None).label(), "module:x");
        assert_eq!(
            NodeKind::module("x", Some("p".to_string())).label(),
            "plugin:p/module:x"
        );
        assert_eq!(NodeKind::plugin("p").requester(), Requester::plugin("p"));
    }
}
