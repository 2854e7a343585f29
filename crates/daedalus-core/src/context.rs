//! Run context types.
//!
//! A run threads three pieces of per-run data through dependency resolution
//! and middleware invocation:
//!
//! - [`RunId`] - UUID v7 identifier used for log correlation
//! - [`StateHandle`] - the mutable Run State injected as `state`
//! - [`HttpContext`] - the opaque transport context injected as `http`
//!
//! [`ResolveContext`] bundles them together with the [`Requester`] identity
//! that shared-permission checks are evaluated against.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A unique identifier for each run, using UUID v7.
///
/// # Example
///
/// ```
/// use daedalus_core::RunId;
///
/// let id = RunId::new();
/// assert_ne!(id, RunId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a new unique run ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the scope asking for a definition.
///
/// Shared-pool permissions are granted by module and plugin name, so every
/// resolution carries the requesting module (if any) and its plugin (if any).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Requester {
    module: Option<String>,
    plugin: Option<String>,
}

impl Requester {
    /// A module, optionally nested in a plugin.
    #[must_use]
    pub fn module(name: impl Into<String>, plugin: Option<String>) -> Self {
        Self {
            module: Some(name.into()),
            plugin,
        }
    }

    /// A plugin acting on its own behalf.
    #[must_use]
    pub fn plugin(name: impl Into<String>) -> Self {
        Self {
            module: None,
            plugin: Some(name.into()),
        }
    }

    /// The application itself (root or shared pool).
    #[must_use]
    pub fn application() -> Self {
        Self::default()
    }

    /// Returns the module name, if any.
    #[must_use]
    pub fn module_name(&self) -> Option<&str> {
        self.module.as_deref()
    }

    /// Returns the plugin name, if any.
    #[must_use]
    pub fn plugin_name(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    /// Returns true when the requester belongs to a plugin.
    #[must_use]
    pub fn is_plugin_member(&self) -> bool {
        self.plugin.is_some()
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.module, &self.plugin) {
            (Some(module), Some(plugin)) => write!(f, "module '{module}' of plugin '{plugin}'"),
            (Some(module), None) => write!(f, "module '{module}'"),
            (None, Some(plugin)) => write!(f, "plugin '{plugin}'"),
            (None, None) => write!(f, "application"),
        }
    }
}

/// Shared handle to the mutable Run State.
///
/// The state is a JSON value so that the run result can be returned as an
/// independent deep copy via [`StateHandle::snapshot`].
///
/// # Example
///
/// ```
/// use daedalus_core::StateHandle;
/// use serde_json::json;
///
/// let state = StateHandle::new(json!({}));
/// state.insert("ok", json!(true));
/// assert_eq!(state.snapshot(), json!({ "ok": true }));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StateHandle(Arc<parking_lot::Mutex<Value>>);

impl StateHandle {
    /// Creates a state handle from an initial value.
    #[must_use]
    pub fn new(initial: Value) -> Self {
        Self(Arc::new(parking_lot::Mutex::new(initial)))
    }

    /// Runs a closure with mutable access to the state.
    pub fn update<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        f(&mut self.0.lock())
    }

    /// Runs a closure with read access to the state.
    pub fn read<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.0.lock())
    }

    /// Sets a top-level key. A non-object state is replaced by an object.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.update(|state| {
            if !state.is_object() {
                *state = Value::Object(serde_json::Map::new());
            }
            if let Value::Object(map) = state {
                map.insert(key.into(), value);
            }
        });
    }

    /// Returns a copy of a top-level key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read(|state| state.get(key).cloned())
    }

    /// Returns a deep copy of the whole state.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.read(Clone::clone)
    }
}

/// Opaque transport context supplied by the HTTP adapter.
///
/// The core never inspects it; middleware downcasts it to the adapter's
/// concrete request/response type.
#[derive(Clone)]
pub struct HttpContext(Arc<dyn Any + Send + Sync>);

impl HttpContext {
    /// Wraps a transport value.
    #[must_use]
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Returns the transport value if it has type `T`.
    #[must_use]
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.0.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpContext").finish_non_exhaustive()
    }
}

/// Everything a resolution needs besides the node it runs against.
///
/// The context is cloned as resolution descends into dependencies; `path`
/// grows by one entry per definition under construction.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    run_id: Option<RunId>,
    requester: Requester,
    state: Option<StateHandle>,
    http: Option<HttpContext>,
    path: Vec<String>,
}

impl ResolveContext {
    /// Creates a context for the given requester with no run data.
    #[must_use]
    pub fn new(requester: Requester) -> Self {
        Self {
            requester,
            ..Self::default()
        }
    }

    /// Attaches a run ID.
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Attaches the Run State.
    #[must_use]
    pub fn with_state(mut self, state: StateHandle) -> Self {
        self.state = Some(state);
        self
    }

    /// Attaches the transport context.
    #[must_use]
    pub fn with_http(mut self, http: HttpContext) -> Self {
        self.http = Some(http);
        self
    }

    /// Returns the run ID, if this resolution is part of a run.
    #[must_use]
    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    /// Returns the requester identity.
    #[must_use]
    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    /// Returns the Run State, if any.
    #[must_use]
    pub fn state(&self) -> Option<&StateHandle> {
        self.state.as_ref()
    }

    /// Returns the transport context, if any.
    #[must_use]
    pub fn http(&self) -> Option<&HttpContext> {
        self.http.as_ref()
    }

    /// Returns the chain of definitions currently under construction.
    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Returns true if `key` is already under construction in this chain.
    #[must_use]
    pub fn is_constructing(&self, key: &str) -> bool {
        self.path.iter().any(|entry| entry == key)
    }

    /// Returns a child context one level deeper in the resolution path.
    #[must_use]
    pub fn descend(&self, key: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.path.push(key.into());
        child
    }
}
