//! Dependency injection container
//!
//! The `Container` is the root of the DI system. It owns the registrations,
//! the singleton instances and the table of open request scopes.

use crate::error::{DiError, Result};
use crate::factory::{Construct, Implementation};
use crate::generic::OpenGeneric;
use crate::key::ServiceKey;
use crate::provider::{Injectable, Lifetime};
use crate::registration::{Registration, RegistrationHandle};
use crate::resolver::{Resolve, Resolver};
use crate::scope::{RequestId, ScopedContainer};
use crate::storage::{InstanceCache, ServiceStorage, disposal_result, new_map};
use ahash::RandomState;
use dashmap::DashMap;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::debug;

/// State shared by every handle to one container.
pub(crate) struct RootState {
    pub(crate) registrations: ServiceStorage,
    pub(crate) singletons: InstanceCache,
    requests: DashMap<RequestId, ScopedContainer, RandomState>,
    locked: Arc<AtomicBool>,
    disposed: AtomicBool,
}

impl RootState {
    #[inline]
    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(DiError::Disposed);
        }
        Ok(())
    }

    #[inline]
    fn ensure_writable(&self) -> Result<()> {
        self.ensure_active()?;
        if self.locked.load(Ordering::Acquire) {
            return Err(DiError::Locked);
        }
        Ok(())
    }
}

/// The root dependency injection container.
///
/// Cloning is cheap and yields another handle to the same container.
///
/// # Examples
///
/// ```rust
/// use dispatch_injector::{Container, Lifetime};
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// struct English;
/// impl Greeter for English {
///     fn greet(&self) -> String { "hello".into() }
/// }
///
/// let container = Container::new();
/// container
///     .register_factory::<dyn Greeter, _>(Lifetime::Singleton, |_| Ok(Arc::new(English)))
///     .unwrap();
///
/// let greeter = container.resolve::<dyn Greeter>().unwrap();
/// assert_eq!(greeter.greet(), "hello");
/// ```
#[derive(Clone)]
pub struct Container {
    root: Arc<RootState>,
}

impl Container {
    /// Create a new empty container.
    #[inline]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a container sized for about `capacity` registrations.
    pub fn with_capacity(capacity: usize) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            capacity,
            "Creating new root DI container"
        );

        Self {
            root: Arc::new(RootState {
                registrations: ServiceStorage::with_capacity(capacity),
                singletons: InstanceCache::with_capacity(capacity),
                requests: new_map(0),
                locked: Arc::new(AtomicBool::new(false)),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    #[inline]
    pub(crate) fn from_root(root: Arc<RootState>) -> Self {
        Self { root }
    }

    #[inline]
    pub(crate) fn downgrade(&self) -> Weak<RootState> {
        Arc::downgrade(&self.root)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register how `S` is built and how long instances live.
    ///
    /// Fails with `AlreadyRegistered` if `S` already has a registration.
    pub fn register<S: ?Sized + Injectable>(
        &self,
        implementation: impl Into<Implementation<S>>,
        lifetime: Lifetime,
    ) -> Result<RegistrationHandle<S>> {
        self.root.ensure_writable()?;

        let registration = Arc::new(Registration::new(implementation.into(), lifetime)?);
        self.root.registrations.insert(Arc::clone(&registration))?;

        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            service = registration.key().type_name(),
            implementation = registration.implementation(),
            lifetime = lifetime.as_str(),
            total_services = self.root.registrations.len(),
            "Registered service"
        );

        Ok(RegistrationHandle::new(
            registration,
            Arc::clone(&self.root.locked),
        ))
    }

    /// Register `T` under its own type, built by its widest constructor.
    #[inline]
    pub fn register_type<T: Construct>(&self, lifetime: Lifetime) -> Result<RegistrationHandle<T>> {
        self.register::<T>(T::constructors(), lifetime)
    }

    /// Register `I` as the provider of capability `S`.
    ///
    /// ```rust
    /// use dispatch_injector::{Construct, Constructors, Container, Lifetime};
    /// use std::sync::Arc;
    ///
    /// trait Clock: Send + Sync {}
    /// struct SystemClock;
    /// impl Clock for SystemClock {}
    /// impl Construct for SystemClock {
    ///     fn constructors() -> Constructors<Self> {
    ///         Constructors::new().with(|()| SystemClock)
    ///     }
    /// }
    ///
    /// let container = Container::new();
    /// container
    ///     .register_as::<dyn Clock, SystemClock, _>(Lifetime::Singleton, |c| c as Arc<dyn Clock>)
    ///     .unwrap();
    /// assert!(container.resolve::<dyn Clock>().is_ok());
    /// ```
    pub fn register_as<S, I, F>(&self, lifetime: Lifetime, cast: F) -> Result<RegistrationHandle<S>>
    where
        S: ?Sized + Injectable,
        I: Construct,
        F: Fn(Arc<I>) -> Arc<S> + Send + Sync + 'static,
    {
        self.register::<S>(I::constructors().map(cast), lifetime)
    }

    /// Register `S` with an explicit factory.
    pub fn register_factory<S, F>(&self, lifetime: Lifetime, factory: F) -> Result<RegistrationHandle<S>>
    where
        S: ?Sized + Injectable,
        F: Fn(&Resolver<'_>) -> Result<Arc<S>> + Send + Sync + 'static,
    {
        self.register::<S>(Implementation::factory(factory), lifetime)
    }

    /// Register a pre-built singleton value.
    #[inline]
    pub fn singleton<T: Injectable>(&self, value: T) -> Result<RegistrationHandle<T>> {
        self.register::<T>(Implementation::instance(Arc::new(value)), Lifetime::Singleton)
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve `S` outside of any request scope.
    ///
    /// Scoped services fail with `ScopeRequired`.
    pub fn resolve<S: ?Sized + Injectable>(&self) -> Result<Arc<S>> {
        self.with_resolver(|resolver| resolver.resolve::<S>())
    }

    /// Resolve `S`, returning `None` if nothing provides it.
    pub fn try_resolve<S: ?Sized + Injectable>(&self) -> Result<Option<Arc<S>>> {
        self.with_resolver(|resolver| resolver.try_resolve::<S>())
    }

    /// Resolve `S` with open generic fallback.
    pub fn resolve_generic<S: ?Sized + OpenGeneric>(&self) -> Result<Arc<S>> {
        self.with_resolver(|resolver| resolver.resolve_generic::<S>())
    }

    /// Check if `S` is registered.
    #[inline]
    pub fn contains<S: ?Sized + Injectable>(&self) -> bool {
        self.root.registrations.contains(&ServiceKey::of::<S>())
    }

    /// Check if a singleton instance of `S` has been created.
    #[inline]
    pub fn is_realized<S: ?Sized + Injectable>(&self) -> bool {
        self.root.singletons.is_realized(&ServiceKey::of::<S>())
    }

    /// Number of registrations.
    #[inline]
    pub fn len(&self) -> usize {
        self.root.registrations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of every registration.
    pub fn registered_keys(&self) -> Vec<ServiceKey> {
        self.root.registrations.keys()
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    /// Open an anonymous scope. The caller owns and disposes it.
    pub fn create_scope(&self) -> Result<ScopedContainer> {
        self.root.ensure_active()?;
        Ok(ScopedContainer::new(Arc::clone(&self.root), None))
    }

    /// The scope for `request`, created on first use.
    ///
    /// Every call with the same id returns a handle to the same scope until
    /// [`end_request`](Self::end_request) is called.
    pub fn scope_for(&self, request: RequestId) -> Result<ScopedContainer> {
        self.root.ensure_active()?;
        let scope = self
            .root
            .requests
            .entry(request)
            .or_insert_with(|| ScopedContainer::new(Arc::clone(&self.root), Some(request)))
            .clone();
        Ok(scope)
    }

    /// End `request`, disposing its scope. Unknown ids are ignored.
    pub fn end_request(&self, request: RequestId) -> Result<()> {
        match self.root.requests.remove(&request) {
            Some((_, scope)) => {
                #[cfg(feature = "logging")]
                debug!(
                    target: crate::logging::TARGET,
                    request = request.id(),
                    scope_id = scope.scope().id(),
                    "Ending request"
                );
                scope.dispose()
            }
            None => Ok(()),
        }
    }

    /// Number of request scopes currently open.
    #[inline]
    pub fn open_requests(&self) -> usize {
        self.root.requests.len()
    }

    // =========================================================================
    // Lifecycle Methods
    // =========================================================================

    /// Lock the container to prevent further registrations.
    #[inline]
    pub fn lock(&self) {
        self.root.locked.store(true, Ordering::Release);

        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            service_count = self.root.registrations.len(),
            "Container locked - no further registrations allowed"
        );
    }

    /// Check if the container is locked.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.root.locked.load(Ordering::Acquire)
    }

    /// Dispose the container.
    ///
    /// Ends every open request, then disposes realized singletons in reverse
    /// creation order. Every disposer runs even if some fail; the failures
    /// are reported together. A second call does nothing.
    pub fn dispose(&self) -> Result<()> {
        if self.root.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut failures = Vec::new();

        let requests: Vec<RequestId> = self
            .root
            .requests
            .iter()
            .map(|entry| *entry.key())
            .collect();
        for request in requests {
            if let Some((_, scope)) = self.root.requests.remove(&request) {
                failures.extend(scope.teardown());
            }
        }

        failures.extend(self.root.singletons.dispose());

        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            failures = failures.len(),
            "Container disposed"
        );

        disposal_result(failures)
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.root.disposed.load(Ordering::Acquire)
    }
}

impl Resolve for Container {
    fn with_resolver<T>(&self, f: impl FnOnce(&Resolver<'_>) -> T) -> T {
        let path = RefCell::new(Vec::new());
        f(&Resolver::new(&self.root, None, &path))
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("service_count", &self.len())
            .field("open_requests", &self.open_requests())
            .field("locked", &self.is_locked())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
