//! Provider traits for dependency injection
//!
//! These traits define what types can be injected and how they behave.

use crate::error::BoxError;

/// Marker trait for types that can be stored in and resolved from the
/// container.
///
/// This is automatically implemented for every `Send + Sync + 'static`
/// type, sized or not, so trait objects such as `dyn Greeter` are
/// injectable as long as the trait has `Send + Sync` supertraits.
///
/// # Examples
///
/// ```rust
/// use dispatch_injector::Injectable;
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// fn assert_injectable<T: ?Sized + Injectable>() {}
/// assert_injectable::<dyn Greeter>();
/// assert_injectable::<String>();
/// ```
pub trait Injectable: Send + Sync + 'static {}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: ?Sized + Send + Sync + 'static> Injectable for T {}

/// Service lifetime specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifetime {
    /// One instance per container tree, created lazily on first access
    #[default]
    Singleton,

    /// One instance per request scope, disposed when the scope ends
    Scoped,
}

impl Lifetime {
    /// Name used in log output
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifetime::Singleton => "singleton",
            Lifetime::Scoped => "scoped",
        }
    }
}

impl std::fmt::Display for Lifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disposal capability for services that hold resources.
///
/// Attach it to a registration with
/// [`RegistrationHandle::disposable`](crate::RegistrationHandle::disposable).
/// The owning container or scope calls it exactly once, and only for
/// instances it actually created.
pub trait Dispose: Send + Sync {
    /// Release the resources held by this service.
    fn dispose(&self) -> Result<(), BoxError>;
}
