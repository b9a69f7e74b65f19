//! Request scopes
//!
//! A [`ScopedContainer`] is a resolution context tied to one unit of work,
//! typically one incoming request. Scoped services are created at most once
//! per scope and disposed when the scope ends. Values the host knows about
//! the request (the caller, say) can be provided directly to the scope.

use crate::container::{Container, RootState};
use crate::error::{DiError, Result};
use crate::factory::{AnyInstance, erase};
use crate::generic::OpenGeneric;
use crate::key::ServiceKey;
use crate::provider::Injectable;
use crate::resolver::{Resolve, Resolver};
use crate::storage::{InstanceCache, disposal_result, new_map};
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::cell::RefCell;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::debug;

/// Unique scope identifier.
///
/// Each scope gets a unique ID for tracking and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope(u64);

impl Scope {
    /// Generate a new unique scope ID.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Host-assigned identity of a request.
///
/// [`Container::scope_for`] maps each id to exactly one open scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request-{}", self.0)
    }
}

pub(crate) struct ScopeState {
    scope: Scope,
    request: Option<RequestId>,
    root: Arc<RootState>,
    locals: DashMap<ServiceKey, AnyInstance, RandomState>,
    pub(crate) instances: InstanceCache,
    disposed: AtomicBool,
}

impl ScopeState {
    #[inline]
    pub(crate) fn scope(&self) -> Scope {
        self.scope
    }

    #[inline]
    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(DiError::Disposed);
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn local(&self, key: &ServiceKey) -> Option<AnyInstance> {
        self.locals.get(key).map(|entry| Arc::clone(entry.value()))
    }

    #[inline]
    pub(crate) fn provides(&self, key: &ServiceKey) -> bool {
        self.locals.contains_key(key)
    }
}

/// Handle to a scope that does not keep it alive.
///
/// Held by scoped instances, which the scope itself caches.
#[derive(Clone)]
pub(crate) struct WeakScope(Weak<ScopeState>);

impl WeakScope {
    pub(crate) fn new(state: &Arc<ScopeState>) -> Self {
        Self(Arc::downgrade(state))
    }

    /// The scope, or `Disposed` once every handle to it is gone.
    pub(crate) fn upgrade(&self) -> Result<ScopedContainer> {
        self.0
            .upgrade()
            .map(|state| ScopedContainer { state })
            .ok_or(DiError::Disposed)
    }
}

/// A resolution context for one request.
///
/// Cloning yields another handle to the same scope.
///
/// # Examples
///
/// ```rust
/// use dispatch_injector::{Constructors, Container, Lifetime};
/// use std::sync::Arc;
///
/// struct UnitOfWork;
///
/// let container = Container::new();
/// container
///     .register::<UnitOfWork>(Constructors::new().with(|()| UnitOfWork), Lifetime::Scoped)
///     .unwrap();
///
/// let first = container.create_scope().unwrap();
/// let second = container.create_scope().unwrap();
///
/// let a = first.resolve::<UnitOfWork>().unwrap();
/// assert!(Arc::ptr_eq(&a, &first.resolve::<UnitOfWork>().unwrap()));
/// assert!(!Arc::ptr_eq(&a, &second.resolve::<UnitOfWork>().unwrap()));
/// ```
#[derive(Clone)]
pub struct ScopedContainer {
    state: Arc<ScopeState>,
}

impl ScopedContainer {
    pub(crate) fn new(root: Arc<RootState>, request: Option<RequestId>) -> Self {
        let scope = Scope::new();

        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            scope_id = scope.id(),
            request = request.map(|r| r.id()),
            "Creating request scope"
        );

        Self {
            state: Arc::new(ScopeState {
                scope,
                request,
                root,
                locals: new_map(0),
                instances: InstanceCache::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Get the scope identifier.
    #[inline]
    pub fn scope(&self) -> Scope {
        self.state.scope
    }

    /// The request this scope belongs to, if it was opened with
    /// [`Container::scope_for`].
    #[inline]
    pub fn request(&self) -> Option<RequestId> {
        self.state.request
    }

    /// Provide a value for this scope only.
    ///
    /// Provided values take precedence over container registrations and are
    /// never disposed by the scope.
    #[inline]
    pub fn provide<T: Injectable>(&self, value: T) -> Result<()> {
        self.provide_arc(Arc::new(value))
    }

    /// Provide a shared value, possibly as a trait object, for this scope only.
    pub fn provide_arc<S: ?Sized + Injectable>(&self, value: Arc<S>) -> Result<()> {
        self.state.ensure_active()?;
        let key = ServiceKey::of::<S>();
        match self.state.locals.entry(key) {
            Entry::Occupied(_) => Err(DiError::already_registered(key)),
            Entry::Vacant(slot) => {
                #[cfg(feature = "logging")]
                debug!(
                    target: crate::logging::TARGET,
                    scope_id = self.state.scope.id(),
                    service = key.type_name(),
                    "Providing scope-local value"
                );

                slot.insert(erase(value));
                Ok(())
            }
        }
    }

    /// Resolve a service from this scope.
    pub fn resolve<S: ?Sized + Injectable>(&self) -> Result<Arc<S>> {
        self.with_resolver(|resolver| resolver.resolve::<S>())
    }

    /// Try to resolve a service, returning None if nothing provides it.
    pub fn try_resolve<S: ?Sized + Injectable>(&self) -> Result<Option<Arc<S>>> {
        self.with_resolver(|resolver| resolver.try_resolve::<S>())
    }

    /// Resolve with open generic fallback.
    pub fn resolve_generic<S: ?Sized + OpenGeneric>(&self) -> Result<Arc<S>> {
        self.with_resolver(|resolver| resolver.resolve_generic::<S>())
    }

    /// Check if `S` is provided to this scope or registered in the container.
    #[inline]
    pub fn contains<S: ?Sized + Injectable>(&self) -> bool {
        self.with_resolver(|resolver| resolver.contains::<S>())
    }

    /// Check if a scoped instance of `S` has been created in this scope.
    #[inline]
    pub fn is_realized<S: ?Sized + Injectable>(&self) -> bool {
        self.state.instances.is_realized(&ServiceKey::of::<S>())
    }

    /// Get the container this scope belongs to.
    #[inline]
    pub fn container(&self) -> Container {
        Container::from_root(Arc::clone(&self.state.root))
    }

    /// Dispose every scoped instance created in this scope, in reverse
    /// creation order. A second call does nothing.
    pub fn dispose(&self) -> Result<()> {
        disposal_result(self.teardown())
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn teardown(&self) -> Vec<String> {
        if self.state.disposed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }

        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            scope_id = self.state.scope.id(),
            realized = self.state.instances.len(),
            "Disposing request scope"
        );

        self.state.locals.clear();
        self.state.instances.dispose()
    }
}

impl Resolve for ScopedContainer {
    fn with_resolver<T>(&self, f: impl FnOnce(&Resolver<'_>) -> T) -> T {
        let path = RefCell::new(Vec::new());
        f(&Resolver::new(&self.state.root, Some(&self.state), &path))
    }
}

impl std::fmt::Debug for ScopedContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedContainer")
            .field("scope", &self.state.scope)
            .field("request", &self.state.request)
            .field("provided", &self.state.locals.len())
            .field("realized", &self.state.instances.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
