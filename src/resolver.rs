//! Resolution context
//!
//! A [`Resolver`] is what factories, constructors and decorators see while
//! an instance is being built. It knows which scope (if any) the resolution
//! runs in and which keys are already on the current resolution path.

use crate::container::{Container, RootState};
use crate::error::{DiError, Result};
use crate::factory::{AnyInstance, downcast};
use crate::generic::OpenGeneric;
use crate::key::ServiceKey;
use crate::provider::{Injectable, Lifetime};
use crate::registration::Registration;
use crate::scope::{Scope, ScopeState, WeakScope};
use crate::storage::InstanceCache;
use std::cell::RefCell;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Resolution context handed to factories and decorators.
///
/// Lookup order for a key:
/// 1. a value provided directly to the current scope;
/// 2. the container registration: singletons are built once in the root,
///    scoped services once per scope;
/// 3. nothing, which is `NotFound` for [`resolve`](Self::resolve) and
///    `None` for [`try_resolve`](Self::try_resolve).
pub struct Resolver<'a> {
    root: &'a Arc<RootState>,
    scope: Option<&'a Arc<ScopeState>>,
    path: &'a RefCell<Vec<ServiceKey>>,
}

impl<'a> Resolver<'a> {
    #[inline]
    pub(crate) fn new(
        root: &'a Arc<RootState>,
        scope: Option<&'a Arc<ScopeState>>,
        path: &'a RefCell<Vec<ServiceKey>>,
    ) -> Self {
        Self { root, scope, path }
    }

    /// Resolve `S`, failing with `NotFound` if nothing provides it.
    pub fn resolve<S: ?Sized + Injectable>(&self) -> Result<Arc<S>> {
        let key = ServiceKey::of::<S>();
        match self.resolve_key(key)? {
            Some(instance) => downcast::<S>(&instance),
            None => Err(DiError::not_found_key(key)),
        }
    }

    /// Resolve `S`, returning `None` if nothing provides it.
    ///
    /// Failures other than a missing registration are still returned.
    pub fn try_resolve<S: ?Sized + Injectable>(&self) -> Result<Option<Arc<S>>> {
        self.resolve_key(ServiceKey::of::<S>())?
            .map(|instance| downcast::<S>(&instance))
            .transpose()
    }

    /// Resolve `S`, falling back to its open generic definition when no
    /// exact registration exists.
    ///
    /// Closed instances are built per call and are not cached; caching
    /// follows the lifetime of the definition itself.
    pub fn resolve_generic<S: ?Sized + OpenGeneric>(&self) -> Result<Arc<S>> {
        if let Some(instance) = self.resolve_key(ServiceKey::of::<S>())? {
            return downcast::<S>(&instance);
        }

        let Some(definition) = self.try_resolve::<S::Definition>()? else {
            return Err(DiError::not_found::<S>());
        };

        #[cfg(feature = "logging")]
        trace!(
            target: crate::logging::TARGET,
            service = std::any::type_name::<S>(),
            definition = std::any::type_name::<S::Definition>(),
            "Closing open generic definition"
        );

        S::close(definition, self)
    }

    /// Whether `S` can be resolved here without building anything.
    pub fn contains<S: ?Sized + Injectable>(&self) -> bool {
        let key = ServiceKey::of::<S>();
        self.scope.is_some_and(|scope| scope.provides(&key))
            || self.root.registrations.contains(&key)
    }

    /// The scope this resolution runs in, if any.
    ///
    /// Singletons are always built outside of any scope.
    #[inline]
    pub fn scope(&self) -> Option<Scope> {
        self.scope.map(|scope| scope.scope())
    }

    /// Non-owning handle to the current scope, for instances that read
    /// from it after they were built.
    pub(crate) fn weak_scope(&self) -> Option<WeakScope> {
        self.scope.map(WeakScope::new)
    }

    /// Handle to the container this resolution runs against.
    #[inline]
    pub fn container(&self) -> Container {
        Container::from_root(Arc::clone(self.root))
    }

    pub(crate) fn resolve_key(&self, key: ServiceKey) -> Result<Option<AnyInstance>> {
        if let Some(scope) = self.scope {
            scope.ensure_active()?;
            if let Some(instance) = scope.local(&key) {
                return Ok(Some(instance));
            }
        }
        self.root.ensure_active()?;

        let Some(registration) = self.root.registrations.get(&key) else {
            #[cfg(feature = "logging")]
            trace!(
                target: crate::logging::TARGET,
                service = key.type_name(),
                "No registration found"
            );
            return Ok(None);
        };

        match registration.lifetime() {
            Lifetime::Singleton => {
                if let Some(instance) = self.root.singletons.get(&key) {
                    return Ok(Some(instance));
                }
                // Singletons never see the scope that first asked for them.
                let unscoped = Resolver::new(self.root, None, self.path);
                unscoped
                    .realize(&registration, &self.root.singletons)
                    .map(Some)
            }
            Lifetime::Scoped => {
                let Some(scope) = self.scope else {
                    return Err(DiError::ScopeRequired {
                        type_name: key.type_name(),
                    });
                };
                if let Some(instance) = scope.instances.get(&key) {
                    return Ok(Some(instance));
                }
                self.realize(&registration, &scope.instances).map(Some)
            }
        }
    }

    /// The path only covers this call. Two threads building singletons that
    /// need each other wait on each other's cell instead of failing with
    /// `CircularDependency`.
    fn realize(&self, registration: &Registration, cache: &InstanceCache) -> Result<AnyInstance> {
        let key = registration.key();
        let _guard = PathGuard::enter(self.path, key)?;
        cache.get_or_realize(key, || registration.realize(self))
    }
}

impl std::fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("scope", &self.scope())
            .field("path", &*self.path.borrow())
            .finish()
    }
}

/// Keeps `key` on the resolution path for as long as it is alive.
struct PathGuard<'p> {
    path: &'p RefCell<Vec<ServiceKey>>,
}

impl<'p> PathGuard<'p> {
    fn enter(path: &'p RefCell<Vec<ServiceKey>>, key: ServiceKey) -> Result<Self> {
        let mut stack = path.borrow_mut();
        if stack.contains(&key) {
            let chain = stack
                .iter()
                .chain(std::iter::once(&key))
                .map(ServiceKey::short_name)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(DiError::CircularDependency {
                type_name: key.type_name(),
                path: chain,
            });
        }
        stack.push(key);
        Ok(Self { path })
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        self.path.borrow_mut().pop();
    }
}

/// Anything that can open a resolution context: the root container or a
/// request scope.
pub trait Resolve {
    /// Run `f` with a fresh resolution context.
    fn with_resolver<T>(&self, f: impl FnOnce(&Resolver<'_>) -> T) -> T;
}
