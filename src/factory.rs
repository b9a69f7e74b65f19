//! Implementation sources for registrations
//!
//! A registration is built from one of three sources: a set of candidate
//! constructors over typed dependency tuples, an explicit factory closure,
//! or a pre-built instance. Decorators are described here too, since they
//! are constructors that additionally receive the instance they wrap.
//!
//! Everything is type-erased to `Arc<dyn Any>` (holding an `Arc<S>`) before
//! it reaches storage, so `S` may be a trait object.

use crate::error::{BoxError, DiError, Result};
use crate::key::ServiceKey;
use crate::provider::Injectable;
use crate::resolver::Resolver;
use std::any::Any;
use std::sync::Arc;

/// Type-erased instance as stored in caches. Always wraps an `Arc<S>`.
pub(crate) type AnyInstance = Arc<dyn Any + Send + Sync>;

/// Typed build function shared by constructors and factories.
pub(crate) type BuildFn<S> = Arc<dyn Fn(&Resolver<'_>) -> Result<Arc<S>> + Send + Sync>;

pub(crate) type ErasedFactory = Arc<dyn Fn(&Resolver<'_>) -> Result<AnyInstance> + Send + Sync>;
pub(crate) type ErasedDecorator =
    Arc<dyn Fn(AnyInstance, &Resolver<'_>) -> Result<AnyInstance> + Send + Sync>;
pub(crate) type ErasedDisposer =
    Arc<dyn Fn(&AnyInstance) -> std::result::Result<(), BoxError> + Send + Sync>;

#[inline]
pub(crate) fn erase<S: ?Sized + Injectable>(instance: Arc<S>) -> AnyInstance {
    Arc::new(instance)
}

#[inline]
pub(crate) fn downcast<S: ?Sized + Injectable>(instance: &AnyInstance) -> Result<Arc<S>> {
    instance
        .downcast_ref::<Arc<S>>()
        .cloned()
        .ok_or_else(DiError::malformed::<S>)
}

// =============================================================================
// Dependencies
// =============================================================================

/// A single constructor parameter.
///
/// - `Arc<T>` is required: a missing registration fails the construction.
/// - `Option<Arc<T>>` is optional: a missing registration yields `None`.
pub trait Dependency: Sized {
    /// Key of the service this parameter asks for.
    fn key() -> ServiceKey;

    /// Resolve this parameter.
    fn resolve(resolver: &Resolver<'_>) -> Result<Self>;
}

impl<T: ?Sized + Injectable> Dependency for Arc<T> {
    #[inline]
    fn key() -> ServiceKey {
        ServiceKey::of::<T>()
    }

    #[inline]
    fn resolve(resolver: &Resolver<'_>) -> Result<Self> {
        resolver.resolve::<T>()
    }
}

impl<T: ?Sized + Injectable> Dependency for Option<Arc<T>> {
    #[inline]
    fn key() -> ServiceKey {
        ServiceKey::of::<T>()
    }

    #[inline]
    fn resolve(resolver: &Resolver<'_>) -> Result<Self> {
        resolver.try_resolve::<T>()
    }
}

/// The full parameter list of a constructor.
///
/// Implemented for:
/// - `()` - no parameters
/// - `Arc<T>` / `Option<Arc<T>>` - one parameter
/// - tuples of [`Dependency`] values, up to eight
pub trait Dependencies: Sized {
    /// Keys of every parameter, in declaration order.
    fn parameters() -> Vec<ServiceKey>;

    /// Resolve every parameter.
    fn resolve(resolver: &Resolver<'_>) -> Result<Self>;
}

impl Dependencies for () {
    #[inline]
    fn parameters() -> Vec<ServiceKey> {
        Vec::new()
    }

    #[inline]
    fn resolve(_resolver: &Resolver<'_>) -> Result<Self> {
        Ok(())
    }
}

impl<T: ?Sized + Injectable> Dependencies for Arc<T> {
    fn parameters() -> Vec<ServiceKey> {
        vec![<Self as Dependency>::key()]
    }

    #[inline]
    fn resolve(resolver: &Resolver<'_>) -> Result<Self> {
        <Self as Dependency>::resolve(resolver)
    }
}

impl<T: ?Sized + Injectable> Dependencies for Option<Arc<T>> {
    fn parameters() -> Vec<ServiceKey> {
        vec![<Self as Dependency>::key()]
    }

    #[inline]
    fn resolve(resolver: &Resolver<'_>) -> Result<Self> {
        <Self as Dependency>::resolve(resolver)
    }
}

macro_rules! impl_dependencies_tuple {
    ($($name:ident),+) => {
        impl<$($name: Dependency),+> Dependencies for ($($name,)+) {
            fn parameters() -> Vec<ServiceKey> {
                vec![$(<$name as Dependency>::key()),+]
            }

            #[inline]
            fn resolve(resolver: &Resolver<'_>) -> Result<Self> {
                Ok(($(<$name as Dependency>::resolve(resolver)?,)+))
            }
        }
    };
}

impl_dependencies_tuple!(A);
impl_dependencies_tuple!(A, B);
impl_dependencies_tuple!(A, B, C);
impl_dependencies_tuple!(A, B, C, D);
impl_dependencies_tuple!(A, B, C, D, E);
impl_dependencies_tuple!(A, B, C, D, E, F);
impl_dependencies_tuple!(A, B, C, D, E, F, G);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H);

// =============================================================================
// Constructors
// =============================================================================

/// One way of building `S` from a typed parameter list.
pub struct Constructor<S: ?Sized> {
    parameters: Vec<ServiceKey>,
    build: BuildFn<S>,
}

impl<T: Injectable> Constructor<T> {
    /// Create a constructor from a closure over its dependencies.
    ///
    /// The parameter list is taken from the closure's argument type.
    pub fn new<D, F>(constructor: F) -> Self
    where
        D: Dependencies,
        F: Fn(D) -> T + Send + Sync + 'static,
    {
        Self {
            parameters: D::parameters(),
            build: Arc::new(move |resolver: &Resolver<'_>| {
                Ok(Arc::new(constructor(D::resolve(resolver)?)))
            }),
        }
    }
}

impl<S: ?Sized + Injectable> Constructor<S> {
    /// Number of parameters.
    #[inline]
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// Keys of the parameters, in declaration order.
    #[inline]
    pub fn parameters(&self) -> &[ServiceKey] {
        &self.parameters
    }

    /// Expose the constructed value as another capability.
    pub fn map<U, F>(self, cast: F) -> Constructor<U>
    where
        U: ?Sized + Injectable,
        F: Fn(Arc<S>) -> Arc<U> + Send + Sync + 'static,
    {
        let build = self.build;
        Constructor {
            parameters: self.parameters,
            build: Arc::new(move |resolver: &Resolver<'_>| build(resolver).map(&cast)),
        }
    }
}

impl<S: ?Sized> Clone for Constructor<S> {
    fn clone(&self) -> Self {
        Self {
            parameters: self.parameters.clone(),
            build: Arc::clone(&self.build),
        }
    }
}

/// The candidate constructors of one implementation type.
///
/// When the registration is created, the candidate with the most
/// parameters is selected. Ties go to the one declared first.
///
/// # Examples
///
/// ```rust
/// use dispatch_injector::{Constructors, Container, Lifetime};
/// use std::sync::Arc;
///
/// struct Clock;
/// struct Report {
///     clock: Option<Arc<Clock>>,
/// }
///
/// let container = Container::new();
/// container.singleton(Clock).unwrap();
/// container
///     .register::<Report>(
///         Constructors::new()
///             .with(|()| Report { clock: None })
///             .with(|clock: Arc<Clock>| Report { clock: Some(clock) }),
///         Lifetime::Singleton,
///     )
///     .unwrap();
///
/// assert!(container.resolve::<Report>().unwrap().clock.is_some());
/// ```
pub struct Constructors<S: ?Sized> {
    implementation: &'static str,
    candidates: Vec<Constructor<S>>,
}

impl<T: Injectable> Constructors<T> {
    /// Start an empty candidate set for `T`.
    pub fn new() -> Self {
        Self {
            implementation: std::any::type_name::<T>(),
            candidates: Vec::new(),
        }
    }

    /// Add a candidate constructor.
    pub fn with<D, F>(mut self, constructor: F) -> Self
    where
        D: Dependencies,
        F: Fn(D) -> T + Send + Sync + 'static,
    {
        self.candidates.push(Constructor::new(constructor));
        self
    }
}

impl<T: Injectable> Default for Constructors<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized + Injectable> Constructors<S> {
    /// Name of the implementation type the candidates build.
    #[inline]
    pub fn implementation(&self) -> &'static str {
        self.implementation
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// The candidate that would be selected: most parameters, first on ties.
    pub fn widest(&self) -> Option<&Constructor<S>> {
        let mut best: Option<&Constructor<S>> = None;
        for candidate in &self.candidates {
            if best.is_none_or(|b| candidate.arity() > b.arity()) {
                best = Some(candidate);
            }
        }
        best
    }

    /// Expose every candidate as another capability.
    pub fn map<U, F>(self, cast: F) -> Constructors<U>
    where
        U: ?Sized + Injectable,
        F: Fn(Arc<S>) -> Arc<U> + Send + Sync + 'static,
    {
        let cast = Arc::new(cast);
        Constructors {
            implementation: self.implementation,
            candidates: self
                .candidates
                .into_iter()
                .map(|candidate| {
                    let cast = Arc::clone(&cast);
                    candidate.map(move |instance| cast(instance))
                })
                .collect(),
        }
    }

    fn into_build(self) -> Result<BuildFn<S>> {
        let selected = self.widest().cloned().ok_or(DiError::NoConstructor {
            type_name: self.implementation,
        })?;

        #[cfg(feature = "logging")]
        tracing::trace!(
            target: crate::logging::TARGET,
            implementation = self.implementation,
            candidates = self.candidates.len(),
            arity = selected.arity(),
            "Selected widest constructor"
        );

        Ok(selected.build)
    }
}

/// Types that declare how the container may construct them.
///
/// # Examples
///
/// ```rust
/// use dispatch_injector::{Construct, Constructors, Container, Lifetime};
/// use std::sync::Arc;
///
/// struct Database;
/// struct UserRepository {
///     db: Arc<Database>,
/// }
///
/// impl Construct for UserRepository {
///     fn constructors() -> Constructors<Self> {
///         Constructors::new().with(|db: Arc<Database>| UserRepository { db })
///     }
/// }
///
/// let container = Container::new();
/// container.singleton(Database).unwrap();
/// container.register_type::<UserRepository>(Lifetime::Singleton).unwrap();
/// let repo = container.resolve::<UserRepository>().unwrap();
/// ```
pub trait Construct: Injectable + Sized {
    fn constructors() -> Constructors<Self>;
}

// =============================================================================
// Implementation
// =============================================================================

/// Where the instances of a registration come from.
pub enum Implementation<S: ?Sized> {
    /// Build through the widest of a set of constructors
    Constructors(Constructors<S>),
    /// Build through an explicit factory
    Factory {
        name: &'static str,
        build: BuildFn<S>,
    },
}

impl<S: ?Sized + Injectable> Implementation<S> {
    /// An explicit factory. It may resolve whatever it needs.
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&Resolver<'_>) -> Result<Arc<S>> + Send + Sync + 'static,
    {
        Self::Factory {
            name: std::any::type_name::<S>(),
            build: Arc::new(factory),
        }
    }

    /// A value built ahead of time.
    pub fn instance(instance: Arc<S>) -> Self {
        Self::Factory {
            name: std::any::type_name::<S>(),
            build: Arc::new(move |_: &Resolver<'_>| Ok(Arc::clone(&instance))),
        }
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Constructors(constructors) => constructors.implementation(),
            Self::Factory { name, .. } => *name,
        }
    }

    pub(crate) fn into_erased(self) -> Result<(&'static str, ErasedFactory)> {
        let name = self.name();
        let build = match self {
            Self::Constructors(constructors) => constructors.into_build()?,
            Self::Factory { build, .. } => build,
        };
        let factory: ErasedFactory =
            Arc::new(move |resolver: &Resolver<'_>| build(resolver).map(erase::<S>));
        Ok((name, factory))
    }
}

impl<S: ?Sized + Injectable> From<Constructors<S>> for Implementation<S> {
    fn from(constructors: Constructors<S>) -> Self {
        Self::Constructors(constructors)
    }
}

// =============================================================================
// Decorators
// =============================================================================

/// Wraps an instance of `S` in another `S`.
///
/// The decorator closure receives the inner instance ("decoree") followed
/// by its own dependencies, which are resolved like constructor parameters.
pub struct Decorator<S: ?Sized> {
    name: &'static str,
    parameters: Vec<ServiceKey>,
    apply: Arc<dyn Fn(Arc<S>, &Resolver<'_>) -> Result<Arc<S>> + Send + Sync>,
}

impl<S: ?Sized + Injectable> Decorator<S> {
    pub fn new<D, F>(decorate: F) -> Self
    where
        D: Dependencies,
        F: Fn(Arc<S>, D) -> Arc<S> + Send + Sync + 'static,
    {
        Self {
            name: std::any::type_name::<F>(),
            parameters: D::parameters(),
            apply: Arc::new(move |inner: Arc<S>, resolver: &Resolver<'_>| {
                Ok(decorate(inner, D::resolve(resolver)?))
            }),
        }
    }

    /// A decorator built from the resolution context itself, for wrappers
    /// that need more than a fixed set of dependencies or can refuse the
    /// registration they are attached to.
    pub fn from_resolver<F>(decorate: F) -> Self
    where
        F: Fn(Arc<S>, &Resolver<'_>) -> Result<Arc<S>> + Send + Sync + 'static,
    {
        Self {
            name: std::any::type_name::<F>(),
            parameters: Vec::new(),
            apply: Arc::new(decorate),
        }
    }

    /// Give the decorator a readable name for diagnostics.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Keys of the decorator's own dependencies (the inner instance excluded).
    #[inline]
    pub fn parameters(&self) -> &[ServiceKey] {
        &self.parameters
    }

    pub(crate) fn into_erased(self) -> ErasedDecorator {
        let apply = self.apply;
        Arc::new(move |inner: AnyInstance, resolver: &Resolver<'_>| {
            let inner = downcast::<S>(&inner)?;
            apply(inner, resolver).map(erase::<S>)
        })
    }
}
