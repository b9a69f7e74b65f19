//! Error types for dependency injection and dispatch

use crate::key::ServiceKey;
use thiserror::Error;

/// Boxed error used for business failures inside handlers and disposers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while registering, resolving, dispatching or
/// disposing services.
#[derive(Error, Debug)]
pub enum DiError {
    /// Nothing is registered for the requested key
    #[error("Could not resolve type '{type_name}'")]
    NotFound { type_name: &'static str },

    /// Circular dependency detected during resolution
    #[error("Circular dependency detected while resolving {type_name} (path: {path})")]
    CircularDependency {
        type_name: &'static str,
        path: String,
    },

    /// Building an implementation failed somewhere in its dependency tree
    #[error("Could not resolve all dependency tree for type '{type_name}'")]
    DependencyResolution {
        type_name: &'static str,
        #[source]
        source: Box<DiError>,
    },

    /// Attempted to register duplicate service
    #[error("Service already registered: {type_name}")]
    AlreadyRegistered { type_name: &'static str },

    /// An implementation declared no constructor to build it with
    #[error("No constructor declared for {type_name}")]
    NoConstructor { type_name: &'static str },

    /// A scoped service was requested without a request scope
    #[error("Scoped service {type_name} cannot be resolved outside of a request scope")]
    ScopeRequired { type_name: &'static str },

    /// The value stored under a key does not provide the requested capability
    #[error("Value registered for {type_name} does not provide the requested capability")]
    MalformedService { type_name: &'static str },

    /// An open generic definition cannot serve the closed type it was asked for
    #[error("Open generic definition {definition} cannot serve {type_name}: {reason}")]
    OpenGenericMismatch {
        definition: &'static str,
        type_name: &'static str,
        reason: String,
    },

    /// The caller lacks every role the handler requires
    #[error("Caller is not authorized to handle {request} (requires one of: {})", .required.join(", "))]
    Unauthorized {
        request: &'static str,
        required: Vec<String>,
    },

    /// A handler reported a business failure
    #[error("Handler for {request} failed: {source}")]
    Handler {
        request: &'static str,
        #[source]
        source: BoxError,
    },

    /// Container is locked and cannot be modified
    #[error("Container is locked - cannot register new services")]
    Locked,

    /// Container or scope has been disposed
    #[error("Container has been disposed")]
    Disposed,

    /// A weak container reference outlived its container
    #[error("Container has been dropped")]
    ContainerDropped,

    /// One or more disposers failed
    #[error("Disposal failed for {} service(s): {}", .failures.len(), .failures.join("; "))]
    DisposalFailed { failures: Vec<String> },

    /// Internal error
    #[error("Internal DI error: {0}")]
    Internal(String),
}

/// Coarse classification of [`DiError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Fatal wiring problem, surfaced at bootstrap or first resolution
    Configuration,
    /// A dependency of some implementation could not be built
    DependencyResolution,
    /// The requested service is not registered
    NotFound,
    /// Authorization was denied
    Unauthorized,
    /// A handler failed while handling a request
    Handler,
    /// Misuse of a container's lifecycle (locked, disposed, dropped)
    Lifecycle,
}

impl DiError {
    /// Create a NotFound error for a type
    #[inline]
    pub fn not_found<T: ?Sized + 'static>() -> Self {
        Self::not_found_key(ServiceKey::of::<T>())
    }

    /// Create a NotFound error for a key
    #[inline]
    pub fn not_found_key(key: ServiceKey) -> Self {
        Self::NotFound {
            type_name: key.type_name(),
        }
    }

    /// Create an AlreadyRegistered error
    #[inline]
    pub fn already_registered(key: ServiceKey) -> Self {
        Self::AlreadyRegistered {
            type_name: key.type_name(),
        }
    }

    /// Create a MalformedService error
    #[inline]
    pub fn malformed<T: ?Sized + 'static>() -> Self {
        Self::MalformedService {
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Wrap a failure raised while building `type_name`
    #[inline]
    pub fn dependency(type_name: &'static str, source: DiError) -> Self {
        Self::DependencyResolution {
            type_name,
            source: Box::new(source),
        }
    }

    /// Wrap a business failure raised by the handler for `R`
    pub fn handler<R: ?Sized + 'static>(source: impl Into<BoxError>) -> Self {
        Self::Handler {
            request: std::any::type_name::<R>(),
            source: source.into(),
        }
    }

    /// The innermost error of a `DependencyResolution` chain.
    pub fn root_cause(&self) -> &DiError {
        let mut current = self;
        while let Self::DependencyResolution { source, .. } = current {
            current = source;
        }
        current
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DependencyResolution { .. } => ErrorKind::DependencyResolution,
            Self::CircularDependency { .. }
            | Self::AlreadyRegistered { .. }
            | Self::NoConstructor { .. }
            | Self::ScopeRequired { .. }
            | Self::MalformedService { .. }
            | Self::OpenGenericMismatch { .. }
            | Self::Internal(_) => ErrorKind::Configuration,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Handler { .. } => ErrorKind::Handler,
            Self::Locked | Self::Disposed | Self::ContainerDropped | Self::DisposalFailed { .. } => {
                ErrorKind::Lifecycle
            }
        }
    }

    /// Whether this error is a fatal wiring problem.
    ///
    /// A dependency failure whose root cause is a missing registration
    /// counts: a constructor parameter nobody registered is a
    /// configuration mistake, unlike a top-level lookup that finds nothing.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::DependencyResolution { .. } => matches!(
                self.root_cause().kind(),
                ErrorKind::Configuration | ErrorKind::NotFound
            ),
            other => other.kind() == ErrorKind::Configuration,
        }
    }
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Missing;

    #[test]
    fn test_root_cause_walks_wrap_chain() {
        let err = DiError::dependency(
            "Outer",
            DiError::dependency("Inner", DiError::not_found::<Missing>()),
        );

        assert!(matches!(err.root_cause(), DiError::NotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::DependencyResolution);
        assert!(err.is_configuration());
    }

    #[test]
    fn test_top_level_not_found_is_not_configuration() {
        let err = DiError::not_found::<Missing>();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_messages() {
        let err = DiError::Unauthorized {
            request: "GetReport",
            required: vec!["Admin".into(), "Auditor".into()],
        };
        assert_eq!(
            err.to_string(),
            "Caller is not authorized to handle GetReport (requires one of: Admin, Auditor)"
        );

        let err = DiError::DisposalFailed {
            failures: vec!["a: boom".into()],
        };
        assert_eq!(err.to_string(), "Disposal failed for 1 service(s): a: boom");
    }

    #[test]
    fn test_handler_error_keeps_source() {
        let err = DiError::handler::<Missing>("database offline");
        assert_eq!(err.kind(), ErrorKind::Handler);
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("database offline"));
    }
}
