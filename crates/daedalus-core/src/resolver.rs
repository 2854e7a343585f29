//! Argument resolution.
//!
//! [`ArgumentResolver`] turns a callable's declared [`ParamList`] into an
//! ordered [`Arguments`] list. For each parameter, in declaration order:
//!
//! 1. reserved parameters (`state`, `http`, `compiler`, control primitives,
//!    continuation) are taken from the [`ResolveContext`] and [`Bindings`];
//! 2. a dependency name present in the custom-argument map is taken from it;
//! 3. any other dependency name is compiled against the current node.

use crate::context::{HttpContext, ResolveContext, StateHandle};
use crate::definition::Instance;
use crate::error::{DaedalusError, DaedalusResult};
use crate::node::CompilerNode;
use crate::param::{Param, ParamList};
use crate::signal::{Continuation, Control};
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Caller-supplied values that take precedence over dependency resolution.
pub type CustomArgs = HashMap<String, Instance>;

/// Handles bound to one invocation.
#[derive(Debug, Clone, Default)]
pub struct Bindings<'a> {
    control: Option<Control>,
    continuation: Option<Continuation>,
    custom: Option<&'a CustomArgs>,
}

impl<'a> Bindings<'a> {
    /// No handles, no custom values.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Binds the middleware control primitives.
    #[must_use]
    pub fn with_control(mut self, control: Control) -> Self {
        self.control = Some(control);
        self
    }

    /// Binds an async factory continuation.
    #[must_use]
    pub fn with_continuation(mut self, continuation: Continuation) -> Self {
        self.continuation = Some(continuation);
        self
    }

    /// Supplies custom argument values.
    #[must_use]
    pub fn with_custom(mut self, custom: &'a CustomArgs) -> Self {
        self.custom = Some(custom);
        self
    }
}

/// Read-only resolution access, injected as `compiler`.
#[derive(Clone)]
pub struct CompilerHandle {
    node: Arc<CompilerNode>,
    ctx: ResolveContext,
}

impl CompilerHandle {
    /// Creates a handle resolving against `node` on behalf of `ctx`.
    #[must_use]
    pub fn new(node: Arc<CompilerNode>, ctx: ResolveContext) -> Self {
        Self { node, ctx }
    }

    /// Returns true if `name` exists anywhere in the visible chain.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.node.has(name)
    }

    /// Returns true if `name` is already built somewhere in the visible chain.
    #[must_use]
    pub fn is_resolved(&self, name: &str) -> bool {
        self.node.is_resolved(name)
    }

    /// Resolves `name`, building it if needed.
    pub async fn get(&self, name: &str) -> DaedalusResult<Instance> {
        self.node.compile(name, &self.ctx).await
    }

    /// Resolves `name` and downcasts it.
    pub async fn get_as<T: Any + Send + Sync>(&self, name: &str) -> DaedalusResult<Arc<T>> {
        let instance = self.get(name).await?;
        downcast(instance, name, &self.ctx.requester().to_string())
    }
}

impl fmt::Debug for CompilerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerHandle")
            .field("node", &self.node.label())
            .field("requester", self.ctx.requester())
            .finish()
    }
}

/// One resolved argument.
#[derive(Clone)]
pub enum Argument {
    /// A dependency or custom value.
    Instance(Instance),
    /// The Run State.
    State(StateHandle),
    /// The transport context.
    Http(HttpContext),
    /// The control primitives of the current step.
    Control(Control),
    /// The continuation of the current async construction.
    Continuation(Continuation),
    /// Ad hoc resolution access.
    Compiler(CompilerHandle),
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("Instance"),
            Self::State(state) => f.debug_tuple("State").field(state).finish(),
            Self::Http(http) => f.debug_tuple("Http").field(http).finish(),
            Self::Control(control) => f.debug_tuple("Control").field(control).finish(),
            Self::Continuation(next) => f.debug_tuple("Continuation").field(next).finish(),
            Self::Compiler(handle) => f.debug_tuple("Compiler").field(handle).finish(),
        }
    }
}

/// The ordered argument list handed to a callable.
///
/// # Example
///
/// ```
/// use daedalus_core::{Argument, Arguments};
/// use std::sync::Arc;
///
/// let args = Arguments::new("example")
///     .with("greeting", Argument::Instance(Arc::new(String::from("hi"))));
///
/// assert_eq!(args.get::<String>("greeting").unwrap().as_str(), "hi");
/// assert!(args.get::<u32>("greeting").is_err());
/// assert!(args.state().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Arguments {
    context: String,
    entries: Vec<(String, Argument)>,
}

impl Arguments {
    /// Creates an empty list for the given callable context.
    #[must_use]
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            entries: Vec::new(),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn with(mut self, identifier: impl Into<String>, argument: Argument) -> Self {
        self.entries.push((identifier.into(), argument));
        self
    }

    /// Returns the callable context used in error messages.
    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Returns the number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates the identifiers in declaration order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(identifier, _)| identifier.as_str())
    }

    /// Returns the argument at `index`.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&Argument> {
        self.entries.get(index).map(|(_, argument)| argument)
    }

    /// Returns the argument injected under `identifier`.
    #[must_use]
    pub fn argument(&self, identifier: &str) -> Option<&Argument> {
        self.entries
            .iter()
            .find(|(name, _)| name == identifier)
            .map(|(_, argument)| argument)
    }

    /// Returns the type-erased instance injected under `identifier`.
    pub fn instance(&self, identifier: &str) -> DaedalusResult<Instance> {
        match self.argument(identifier) {
            Some(Argument::Instance(instance)) => Ok(instance.clone()),
            Some(_) => Err(self.error(identifier, "not a dependency")),
            None => Err(self.error(identifier, "not declared")),
        }
    }

    /// Returns the instance injected under `identifier` as `T`.
    pub fn get<T: Any + Send + Sync>(&self, identifier: &str) -> DaedalusResult<Arc<T>> {
        downcast(self.instance(identifier)?, identifier, &self.context)
    }

    /// Returns the Run State.
    pub fn state(&self) -> DaedalusResult<StateHandle> {
        self.entries
            .iter()
            .find_map(|(_, argument)| match argument {
                Argument::State(state) => Some(state.clone()),
                _ => None,
            })
            .ok_or_else(|| self.error("state", "not declared"))
    }

    /// Returns the transport context as `T`.
    pub fn http<T: Send + Sync + 'static>(&self) -> DaedalusResult<Arc<T>> {
        self.entries
            .iter()
            .find_map(|(_, argument)| match argument {
                Argument::Http(http) => Some(http),
                _ => None,
            })
            .ok_or_else(|| self.error("http", "not declared"))?
            .downcast::<T>()
            .ok_or_else(|| self.error("http", format!("expected {}", type_name::<T>())))
    }

    /// Returns the control primitives of the current step.
    pub fn control(&self) -> DaedalusResult<Control> {
        self.entries
            .iter()
            .find_map(|(_, argument)| match argument {
                Argument::Control(control) => Some(control.clone()),
                _ => None,
            })
            .ok_or_else(|| self.error("next", "no control primitive declared"))
    }

    /// Returns the async factory continuation.
    pub fn continuation(&self) -> DaedalusResult<Continuation> {
        self.entries
            .iter()
            .find_map(|(_, argument)| match argument {
                Argument::Continuation(next) => Some(next.clone()),
                _ => None,
            })
            .ok_or_else(|| self.error("next", "no continuation declared"))
    }

    /// Returns the ad hoc resolution handle.
    pub fn compiler(&self) -> DaedalusResult<CompilerHandle> {
        self.entries
            .iter()
            .find_map(|(_, argument)| match argument {
                Argument::Compiler(handle) => Some(handle.clone()),
                _ => None,
            })
            .ok_or_else(|| self.error("compiler", "not declared"))
    }

    fn error(&self, identifier: &str, reason: impl Into<String>) -> DaedalusError {
        DaedalusError::argument_resolution(identifier, &self.context, reason)
    }
}

fn downcast<T: Any + Send + Sync>(
    instance: Instance,
    identifier: &str,
    context: &str,
) -> DaedalusResult<Arc<T>> {
    instance.downcast::<T>().map_err(|_| {
        DaedalusError::argument_resolution(
            identifier,
            context,
            format!("expected {}", type_name::<T>()),
        )
    })
}

/// Builds argument lists from declared parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgumentResolver;

impl ArgumentResolver {
    /// Resolves `params` against `node` on behalf of `ctx`.
    ///
    /// `context` names the callable in error messages.
    ///
    /// # Errors
    ///
    /// - `ArgumentResolution` if a reserved parameter has no value in this
    ///   position, or a dependency name is not reachable
    /// - any error raised while building a dependency
    pub async fn resolve(
        params: &ParamList,
        node: &Arc<CompilerNode>,
        ctx: &ResolveContext,
        bindings: &Bindings<'_>,
        context: &str,
    ) -> DaedalusResult<Arguments> {
        let mut args = Arguments::new(context);

        for param in params {
            let identifier = param.identifier();
            let missing =
                |reason: &str| DaedalusError::argument_resolution(identifier, context, reason);

            let argument = match param {
                Param::State => Argument::State(
                    ctx.state()
                        .cloned()
                        .ok_or_else(|| missing("no run state in this context"))?,
                ),
                Param::Http => Argument::Http(
                    ctx.http()
                        .cloned()
                        .ok_or_else(|| missing("no http context in this run"))?,
                ),
                Param::Control(_) => Argument::Control(
                    bindings
                        .control
                        .clone()
                        .ok_or_else(|| missing("control primitives are only bound to middleware"))?,
                ),
                Param::Continuation => Argument::Continuation(
                    bindings
                        .continuation
                        .clone()
                        .ok_or_else(|| missing("continuation is only bound to async factories"))?,
                ),
                Param::Compiler => {
                    Argument::Compiler(CompilerHandle::new(node.clone(), ctx.clone()))
                }
                Param::Dependency(name) => {
                    if let Some(value) = bindings.custom.and_then(|custom| custom.get(name)) {
                        Argument::Instance(value.clone())
                    } else {
                        match node.compile(name, ctx).await {
                            Ok(instance) => Argument::Instance(instance),
                            Err(DaedalusError::DefinitionNotFound { .. }) => {
                                return Err(missing(&format!(
                                    "no definition is reachable from {}",
                                    node.label()
                                )));
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }
            };

            args.entries.push((identifier.to_string(), argument));
        }

        Ok(args)
    }
}
