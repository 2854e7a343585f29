//! Declared parameter lists.
//!
//! Every callable the core invokes (definition factories, middleware, error
//! handlers, event listeners) declares the ordered list of identifiers it
//! wants injected. Reserved identifiers map to run data or control handles;
//! every other identifier names a dependency.
//!
//! | Identifier | Middleware | Factory |
//! |------------|------------|---------|
//! | `state` | [`Param::State`] | [`Param::State`] |
//! | `http` | [`Param::Http`] | [`Param::Http`] |
//! | `compiler` | [`Param::Compiler`] | [`Param::Compiler`] |
//! | `next` | [`ControlKind::Next`] | [`Param::Continuation`] |
//! | `skip`, `done`, `throwException` | control primitives | dependency names |
//! | anything else | dependency | dependency |

use std::fmt;

/// The four middleware control primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    /// `next` - continue.
    Next,
    /// `skip` - abandon this callable's effect and continue.
    Skip,
    /// `done` - end the run successfully.
    Done,
    /// `throwException` - fail the run.
    ThrowException,
}

impl ControlKind {
    /// Returns the reserved identifier of this primitive.
    #[must_use]
    pub const fn identifier(self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Skip => "skip",
            Self::Done => "done",
            Self::ThrowException => "throwException",
        }
    }

    /// Parses a reserved identifier.
    #[must_use]
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        match identifier {
            "next" => Some(Self::Next),
            "skip" => Some(Self::Skip),
            "done" => Some(Self::Done),
            "throwException" => Some(Self::ThrowException),
            _ => None,
        }
    }

    /// Returns all primitives.
    #[must_use]
    pub const fn all() -> [ControlKind; 4] {
        [Self::Next, Self::Skip, Self::Done, Self::ThrowException]
    }
}

/// A single declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Param {
    /// A named dependency (or custom argument).
    Dependency(String),
    /// The Run State.
    State,
    /// The transport context.
    Http,
    /// A middleware control primitive.
    Control(ControlKind),
    /// The async factory continuation.
    Continuation,
    /// Read-only access to the current compiler node.
    Compiler,
}

impl Param {
    /// Creates a dependency parameter.
    #[must_use]
    pub fn dependency(name: impl Into<String>) -> Self {
        Self::Dependency(name.into())
    }

    /// Returns the identifier this parameter is injected under.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::Dependency(name) => name,
            Self::State => "state",
            Self::Http => "http",
            Self::Control(kind) => kind.identifier(),
            Self::Continuation => "next",
            Self::Compiler => "compiler",
        }
    }

    fn reserved(identifier: &str) -> Option<Self> {
        match identifier {
            "state" => Some(Self::State),
            "http" => Some(Self::Http),
            "compiler" => Some(Self::Compiler),
            _ => None,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// An ordered list of declared parameters.
///
/// # Example
///
/// ```
/// use daedalus_core::{ControlKind, Param, ParamList};
///
/// let params = ParamList::for_middleware(&["service", "state", "next"]);
/// assert_eq!(params.len(), 3);
/// assert!(params.declares_control());
/// assert_eq!(params.get(2), Some(&Param::Control(ControlKind::Next)));
///
/// let factory = ParamList::for_factory(&["repo", "next"]);
/// assert!(factory.declares_continuation());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamList {
    params: Vec<Param>,
}

impl ParamList {
    /// An empty list.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a list from explicit parameters.
    #[must_use]
    pub fn from_params(params: Vec<Param>) -> Self {
        Self { params }
    }

    /// Parses identifiers as seen by middleware, error handlers and listeners.
    #[must_use]
    pub fn for_middleware(identifiers: &[&str]) -> Self {
        let params = identifiers
            .iter()
            .map(|identifier| {
                Param::reserved(identifier)
                    .or_else(|| ControlKind::from_identifier(identifier).map(Param::Control))
                    .unwrap_or_else(|| Param::dependency(*identifier))
            })
            .collect();
        Self { params }
    }

    /// Parses identifiers as seen by definition factories.
    ///
    /// `next` is the continuation; the other control primitive names are
    /// ordinary dependency names in this position.
    #[must_use]
    pub fn for_factory(identifiers: &[&str]) -> Self {
        let params = identifiers
            .iter()
            .map(|identifier| match *identifier {
                "next" => Param::Continuation,
                other => Param::reserved(other).unwrap_or_else(|| Param::dependency(other)),
            })
            .collect();
        Self { params }
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Returns the parameter at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Param> {
        self.params.get(index)
    }

    /// Iterates the parameters in declaration order.
    pub fn iter(&self) -> std::slice::Iter<'_, Param> {
        self.params.iter()
    }

    /// Returns true if any control primitive is declared.
    #[must_use]
    pub fn declares_control(&self) -> bool {
        self.params
            .iter()
            .any(|param| matches!(param, Param::Control(_)))
    }

    /// Returns true if the continuation is declared.
    #[must_use]
    pub fn declares_continuation(&self) -> bool {
        self.params.contains(&Param::Continuation)
    }

    /// Iterates the declared dependency names.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.params.iter().filter_map(|param| match param {
            Param::Dependency(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Returns the first identifier declared more than once, if any.
    #[must_use]
    pub fn first_duplicate(&self) -> Option<&str> {
        self.params.iter().enumerate().find_map(|(i, param)| {
            self.params[..i]
                .contains(param)
                .then(|| param.identifier())
        })
    }
}

impl<'a> IntoIterator for &'a ParamList {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middleware_reserved_names() {
        let params =
            ParamList::for_middleware(&["state", "http", "compiler", "next", "skip", "done", "throwException", "repo"]);

        assert_eq!(params.get(0), Some(&Param::State));
        assert_eq!(params.get(1), Some(&Param::Http));
        assert_eq!(params.get(2), Some(&Param::Compiler));
        assert_eq!(params.get(3), Some(&Param::Control(ControlKind::Next)));
        assert_eq!(params.get(4), Some(&Param::Control(ControlKind::Skip)));
        assert_eq!(params.get(5), Some(&Param::Control(ControlKind::Done)));
        assert_eq!(
            params.get(6),
            Some(&Param::Control(ControlKind::ThrowException))
        );
        assert_eq!(params.get(7), Some(&Param::dependency("repo")));
        assert!(!params.declares_continuation());
    }

    #[test]
    fn test_factory_names() {
        let params = ParamList::for_factory(&["next", "skip", "state"]);

        assert_eq!(params.get(0), Some(&Param::Continuation));
        assert_eq!(params.get(1), Some(&Param::dependency("skip")));
        assert_eq!(params.get(2), Some(&Param::State));
        assert!(!params.declares_control());
        assert_eq!(params.dependencies().collect::<Vec<_>>(), vec!["skip"]);
    }

    #[test]
    fn test_sync_callable_has_no_control() {
        let params = ParamList::for_middleware(&["service", "state"]);
        assert!(!params.declares_control());
        assert!(ParamList::empty().is_empty());
    }

    #[test]
    fn test_first_duplicate() {
        assert_eq!(
            ParamList::for_middleware(&["a", "b", "a"]).first_duplicate(),
            Some("a")
        );
        assert_eq!(ParamList::for_middleware(&["a", "b"]).first_duplicate(), None);
    }

    #[test]
    fn test_identifier_round_trip() {
        for kind in ControlKind::all() {
            assert_eq!(ControlKind::from_identifier(kind.identifier()), Some(kind));
        }
        assert_eq!(Param::Continuation.to_string(), "next");
    }
}
