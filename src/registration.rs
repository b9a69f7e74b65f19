//! Registration records
//!
//! A [`Registration`] binds a service key to the factory that builds it, its
//! lifetime, the decorators layered over it and an optional disposer. The
//! typed [`RegistrationHandle`] returned by `register` is how callers attach
//! decorators and disposal after the fact.

use crate::error::{BoxError, DiError, Result};
use crate::factory::{
    AnyInstance, Decorator, ErasedDecorator, ErasedDisposer, ErasedFactory, Implementation,
    downcast,
};
use crate::key::ServiceKey;
use crate::provider::{Dispose, Injectable, Lifetime};
use crate::resolver::Resolver;
use crate::storage::{read, write};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

#[cfg(feature = "logging")]
use tracing::debug;

/// How one service key is satisfied.
pub struct Registration {
    key: ServiceKey,
    implementation: &'static str,
    lifetime: Lifetime,
    factory: ErasedFactory,
    decorators: RwLock<Vec<(&'static str, ErasedDecorator)>>,
    disposer: RwLock<Option<ErasedDisposer>>,
}

impl Registration {
    pub(crate) fn new<S: ?Sized + Injectable>(
        implementation: Implementation<S>,
        lifetime: Lifetime,
    ) -> Result<Self> {
        let (name, factory) = implementation.into_erased()?;
        Ok(Self {
            key: ServiceKey::of::<S>(),
            implementation: name,
            lifetime,
            factory,
            decorators: RwLock::new(Vec::new()),
            disposer: RwLock::new(None),
        })
    }

    #[inline]
    pub fn key(&self) -> ServiceKey {
        self.key
    }

    /// Name of the type (or factory) that builds the base instance.
    #[inline]
    pub fn implementation(&self) -> &'static str {
        self.implementation
    }

    #[inline]
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Decorator names, innermost first.
    pub fn decorator_names(&self) -> Vec<&'static str> {
        read(&self.decorators).iter().map(|(name, _)| *name).collect()
    }

    pub fn has_disposer(&self) -> bool {
        read(&self.disposer).is_some()
    }

    pub(crate) fn push_decorator(&self, name: &'static str, decorator: ErasedDecorator) {
        write(&self.decorators).push((name, decorator));
    }

    pub(crate) fn set_disposer(&self, disposer: ErasedDisposer) {
        *write(&self.disposer) = Some(disposer);
    }

    /// Build the base instance, then apply every decorator in order.
    pub(crate) fn realize(&self, resolver: &Resolver<'_>) -> Result<Realized> {
        let base = (self.factory)(resolver)
            .map_err(|source| DiError::dependency(self.implementation, source))?;

        let decorators: Vec<(&'static str, ErasedDecorator)> = read(&self.decorators).clone();
        let mut instance = Arc::clone(&base);
        for (name, decorator) in decorators {
            instance = decorator(instance, resolver)
                .map_err(|source| DiError::dependency(name, source))?;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            service = self.key.type_name(),
            implementation = self.implementation,
            lifetime = self.lifetime.as_str(),
            decorators = read(&self.decorators).len(),
            "Realized service instance"
        );

        let teardown = read(&self.disposer).clone().map(|disposer| Teardown {
            name: self.implementation,
            base,
            disposer,
        });

        Ok(Realized { instance, teardown })
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("implementation", &self.implementation)
            .field("lifetime", &self.lifetime)
            .field("decorators", &self.decorator_names())
            .field("disposable", &self.has_disposer())
            .finish()
    }
}

/// A freshly built instance, plus what is needed to dispose it later.
pub(crate) struct Realized {
    pub(crate) instance: AnyInstance,
    pub(crate) teardown: Option<Teardown>,
}

/// Disposal bound to the undecorated instance it was realized with.
pub(crate) struct Teardown {
    name: &'static str,
    base: AnyInstance,
    disposer: ErasedDisposer,
}

impl Teardown {
    #[inline]
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub(crate) fn run(&self) -> std::result::Result<(), BoxError> {
        (self.disposer)(&self.base)
    }
}

/// Typed view over a registration, returned by `register`.
///
/// # Examples
///
/// ```rust
/// use dispatch_injector::{Container, Decorator, Lifetime};
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// struct Plain;
/// impl Greeter for Plain {
///     fn greet(&self) -> String { "hello".into() }
/// }
///
/// struct Shouting(Arc<dyn Greeter>);
/// impl Greeter for Shouting {
///     fn greet(&self) -> String { self.0.greet().to_uppercase() }
/// }
///
/// let container = Container::new();
/// container
///     .register_factory::<dyn Greeter, _>(Lifetime::Singleton, |_| Ok(Arc::new(Plain)))
///     .unwrap()
///     .decorate_with(Decorator::new(|inner: Arc<dyn Greeter>, ()| {
///         Arc::new(Shouting(inner)) as Arc<dyn Greeter>
///     }));
///
/// assert_eq!(container.resolve::<dyn Greeter>().unwrap().greet(), "HELLO");
/// ```
pub struct RegistrationHandle<S: ?Sized> {
    registration: Arc<Registration>,
    locked: Arc<AtomicBool>,
    _service: PhantomData<fn() -> Arc<S>>,
}

impl<S: ?Sized + Injectable> RegistrationHandle<S> {
    pub(crate) fn new(registration: Arc<Registration>, locked: Arc<AtomicBool>) -> Self {
        Self {
            registration,
            locked,
            _service: PhantomData,
        }
    }

    /// Append a decorator. The last one appended is the outermost.
    ///
    /// Instances already realized keep the chain they were built with.
    ///
    /// # Panics
    ///
    /// Panics if the container is locked.
    pub fn decorate_with(self, decorator: Decorator<S>) -> Self {
        match self.try_decorate_with(decorator) {
            Ok(handle) => handle,
            Err(_) => panic!("Cannot register services: container is locked"),
        }
    }

    /// Append a decorator, failing with [`DiError::Locked`] if the
    /// container is locked.
    pub fn try_decorate_with(self, decorator: Decorator<S>) -> Result<Self> {
        if self.locked.load(Ordering::Acquire) {
            return Err(DiError::Locked);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            service = self.registration.key().type_name(),
            decorator = decorator.name(),
            position = read(&self.registration.decorators).len(),
            "Adding decorator"
        );

        self.registration
            .push_decorator(decorator.name(), decorator.into_erased());
        Ok(self)
    }

    /// Dispose realized instances with `disposer`.
    pub fn dispose_with<F>(self, disposer: F) -> Self
    where
        F: Fn(&S) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.registration
            .set_disposer(Arc::new(move |instance: &AnyInstance| {
                let instance = downcast::<S>(instance)?;
                disposer(&instance)
            }));
        self
    }

    #[inline]
    pub fn key(&self) -> ServiceKey {
        self.registration.key()
    }

    #[inline]
    pub fn lifetime(&self) -> Lifetime {
        self.registration.lifetime()
    }

    pub fn decorator_names(&self) -> Vec<&'static str> {
        self.registration.decorator_names()
    }
}

impl<S: ?Sized + Injectable + Dispose> RegistrationHandle<S> {
    /// Dispose realized instances through their [`Dispose`] impl.
    pub fn disposable(self) -> Self {
        self.dispose_with(|instance: &S| instance.dispose())
    }
}

impl<S: ?Sized> std::fmt::Debug for RegistrationHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RegistrationHandle")
            .field(&self.registration)
            .finish()
    }
}
