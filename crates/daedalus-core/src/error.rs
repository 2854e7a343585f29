//! Error types for Daedalus.
//!
//! This module provides the [`DaedalusError`] type, which is the standard error
//! type used throughout the Daedalus execution core.
//!
//! # Categories
//!
//! Every variant belongs to an [`ErrorCategory`]:
//!
//! | `ErrorCategory` | Variants | Surfaces |
//! |---|---|---|
//! | `Definition` | `DuplicateDefinition`, `DuplicateComponent`, `InvalidDefinition`, `InvalidAsyncDefinition` | immediately, at registration |
//! | `Resolution` | `DefinitionNotFound`, `EmptyService`, `ArgumentResolution`, `CircularDependency` | during a run |
//! | `Permission` | `SharingPermission` | during a run |
//! | `Contract` | `ContractViolation` | during a run |
//! | `Application` | `Thrown` | during a run |
//!
//! Runtime errors unwind to the nearest error boundary before reaching the
//! caller of a run.

use crate::context::Requester;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias using [`DaedalusError`].
pub type DaedalusResult<T> = Result<T, DaedalusError>;

/// Categories of errors for classification and handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed or conflicting definitions.
    Definition,
    /// A dependency could not be located or built.
    Resolution,
    /// A shared definition was requested without permission.
    Permission,
    /// A signal or middleware protocol was violated.
    Contract,
    /// An error raised by user code.
    Application,
}

impl ErrorCategory {
    /// Returns the category name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::Resolution => "resolution",
            Self::Permission => "permission",
            Self::Contract => "contract",
            Self::Application => "application",
        }
    }
}

/// Standard error type for Daedalus.
///
/// The error is `Clone` so that a failed run can hand the same value to an
/// error handler and, if the handler does not recover, to the caller.
///
/// # Example
///
/// ```
/// use daedalus_core::{DaedalusError, ErrorCategory};
///
/// let err = DaedalusError::definition_not_found("repo", "module 'users'");
/// assert_eq!(err.category(), ErrorCategory::Resolution);
/// assert!(err.to_string().contains("repo"));
/// ```
#[derive(Error, Debug, Clone)]
pub enum DaedalusError {
    /// A definition name is already registered at the target node.
    #[error("Duplicate definition: '{name}' is already defined in {scope}")]
    DuplicateDefinition {
        /// The conflicting definition name.
        name: String,
        /// Label of the node that already owns the name.
        scope: String,
    },

    /// A module or plugin name is already registered in the application.
    #[error("Duplicate {kind}: '{name}' is already registered")]
    DuplicateComponent {
        /// Either "module" or "plugin".
        kind: &'static str,
        /// The conflicting name.
        name: String,
    },

    /// No node in the visible chain owns the requested definition.
    #[error("Definition not found: '{name}' is not reachable from {requester}")]
    DefinitionNotFound {
        /// The requested definition name.
        name: String,
        /// Label of the requesting scope.
        requester: String,
    },

    /// A shared definition exists but the requester is not allow-listed.
    #[error("Sharing permission denied: {requester} may not resolve shared definition '{name}'")]
    SharingPermission {
        /// The shared definition name.
        name: String,
        /// The module (and plugin, if any) that asked for it.
        requester: Requester,
    },

    /// An async definition does not declare the continuation parameter.
    #[error("Invalid async definition '{name}': {reason}")]
    InvalidAsyncDefinition {
        /// The definition name.
        name: String,
        /// What is wrong with the definition.
        reason: String,
    },

    /// A definition is malformed (for example both a scope and a shared policy).
    #[error("Invalid definition '{name}': {reason}")]
    InvalidDefinition {
        /// The definition name.
        name: String,
        /// What is wrong with the definition.
        reason: String,
    },

    /// A factory returned no instance.
    #[error("Empty service: factory for '{name}' produced no instance")]
    EmptyService {
        /// The definition name.
        name: String,
    },

    /// A declared parameter could not be turned into an argument.
    #[error("Cannot resolve argument '{identifier}' for {context}: {reason}")]
    ArgumentResolution {
        /// The declared parameter identifier.
        identifier: String,
        /// The callable's context (module, plugin or definition).
        context: String,
        /// Why resolution failed.
        reason: String,
    },

    /// A definition transitively depends on itself.
    #[error("Circular dependency: {}", .path.join(" -> "))]
    CircularDependency {
        /// The resolution path, ending with the repeated entry.
        path: Vec<String>,
    },

    /// A signal was settled twice, or a callable broke the middleware protocol.
    #[error("Contract violation: {message}")]
    ContractViolation {
        /// Description of the violation.
        message: String,
    },

    /// An error raised by user code (middleware, factories, handlers).
    #[error("{0}")]
    Thrown(Arc<anyhow::Error>),
}

impl DaedalusError {
    /// Creates a duplicate definition error.
    #[must_use]
    pub fn duplicate_definition(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self::DuplicateDefinition {
            name: name.into(),
            scope: scope.into(),
        }
    }

    /// Creates a duplicate module/plugin error.
    #[must_use]
    pub fn duplicate_component(kind: &'static str, name: impl Into<String>) -> Self {
        Self::DuplicateComponent {
            kind,
            name: name.into(),
        }
    }

    /// Creates a definition not found error.
    #[must_use]
    pub fn definition_not_found(name: impl Into<String>, requester: impl Into<String>) -> Self {
        Self::DefinitionNotFound {
            name: name.into(),
            requester: requester.into(),
        }
    }

    /// Creates a sharing permission error.
    #[must_use]
    pub fn sharing_permission(name: impl Into<String>, requester: Requester) -> Self {
        Self::SharingPermission {
            name: name.into(),
            requester,
        }
    }

    /// Creates an invalid async definition error.
    #[must_use]
    pub fn invalid_async(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAsyncDefinition {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid definition error.
    #[must_use]
    pub fn invalid_definition(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an empty service error.
    #[must_use]
    pub fn empty_service(name: impl Into<String>) -> Self {
        Self::EmptyService { name: name.into() }
    }

    /// Creates an argument resolution error.
    #[must_use]
    pub fn argument_resolution(
        identifier: impl Into<String>,
        context: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ArgumentResolution {
            identifier: identifier.into(),
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Creates a circular dependency error from the resolution path.
    #[must_use]
    pub fn circular_dependency(path: Vec<String>) -> Self {
        Self::CircularDependency { path }
    }

    /// Creates a contract violation error.
    #[must_use]
    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self::ContractViolation {
            message: message.into(),
        }
    }

    /// Wraps an error raised by user code.
    ///
    /// # Example
    ///
    /// ```
    /// use daedalus_core::DaedalusError;
    ///
    /// let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
    /// let err = DaedalusError::thrown(io);
    /// assert_eq!(err.to_string(), "disk on fire");
    /// assert!(err.downcast_ref::<std::io::Error>().is_some());
    /// ```
    #[must_use]
    pub fn thrown(error: impl Into<anyhow::Error>) -> Self {
        Self::Thrown(Arc::new(error.into()))
    }

    /// Wraps a plain message as a user error.
    #[must_use]
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Thrown(Arc::new(anyhow::Error::msg(message)))
    }

    /// Returns the category of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::DuplicateDefinition { .. }
            | Self::DuplicateComponent { .. }
            | Self::InvalidAsyncDefinition { .. }
            | Self::InvalidDefinition { .. } => ErrorCategory::Definition,
            Self::DefinitionNotFound { .. }
            | Self::EmptyService { .. }
            | Self::ArgumentResolution { .. }
            | Self::CircularDependency { .. } => ErrorCategory::Resolution,
            Self::SharingPermission { .. } => ErrorCategory::Permission,
            Self::ContractViolation { .. } => ErrorCategory::Contract,
            Self::Thrown(_) => ErrorCategory::Application,
        }
    }

    /// Returns true for errors that are raised when definitions are added
    /// or built, never during a run.
    #[must_use]
    pub const fn is_definition_time(&self) -> bool {
        matches!(self.category(), ErrorCategory::Definition)
    }

    /// Attempts to downcast a user error to a concrete type.
    ///
    /// Returns `None` for framework errors.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::Thrown(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for DaedalusError {
    fn from(error: anyhow::Error) -> Self {
        Self::Thrown(Arc::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Boom;

    impl std::fmt::Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for Boom {}

    #[test]
    fn test_error_categories() {
        assert_eq!(
            DaedalusError::duplicate_definition("a", "module 'x'").category(),
            ErrorCategory::Definition
        );
        assert_eq!(
            DaedalusError::empty_service("a").category(),
            ErrorCategory::Resolution
        );
        assert_eq!(
            DaedalusError::sharing_permission("a", Requester::module("m", None)).category(),
            ErrorCategory::Permission
        );
        assert_eq!(
            DaedalusError::contract_violation("twice").category(),
            ErrorCategory::Contract
        );
        assert_eq!(DaedalusError::msg("x").category(), ErrorCategory::Application);
    }

    #[test]
    fn test_definition_time() {
        assert!(DaedalusError::invalid_async("db", "missing continuation").is_definition_time());
        assert!(!DaedalusError::definition_not_found("db", "module 'x'").is_definition_time());
    }

    #[test]
    fn test_sharing_permission_display() {
        let err = DaedalusError::sharing_permission(
            "mailer",
            Requester::module("billing", Some("payments".to_string())),
        );
        let msg = err.to_string();
        assert!(msg.contains("mailer"));
        assert!(msg.contains("billing"));
        assert!(msg.contains("payments"));
    }

    #[test]
    fn test_circular_dependency_display() {
        let err = DaedalusError::circular_dependency(vec![
            "module:x/a".to_string(),
            "module:x/b".to_string(),
            "module:x/a".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Circular dependency: module:x/a -> module:x/b -> module:x/a"
        );
    }

    #[test]
    fn test_thrown_downcast() {
        let err = DaedalusError::thrown(Boom);
        assert_eq!(err.to_string(), "boom");
        assert!(err.downcast_ref::<Boom>().is_some());

        let cloned = err.clone();
        assert!(cloned.downcast_ref::<Boom>().is_some());
        assert!(DaedalusError::empty_service("x").downcast_ref::<Boom>().is_none());
    }
}
