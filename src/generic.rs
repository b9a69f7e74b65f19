//! Open generic services
//!
//! An open generic definition serves a whole family of closed service keys,
//! such as every `dyn AsyncRequestHandler<R>`, with a single registration.
//! When no exact registration exists for a closed key, the definition is
//! resolved (with its own lifetime and decorators) and closed over the
//! requested type.

use crate::error::{DiError, Result};
use crate::key::ServiceKey;
use crate::mediator::{AsyncRequest, AsyncRequestHandler};
use crate::provider::Injectable;
use crate::resolver::Resolver;
use ahash::RandomState;
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// A service family that can be served by an open definition.
pub trait OpenGeneric: Injectable {
    /// The service key the open definition is registered under.
    type Definition: ?Sized + Injectable;

    /// Adapt the definition to this closed type.
    fn close(definition: Arc<Self::Definition>, resolver: &Resolver<'_>) -> Result<Arc<Self>>;
}

/// Type-erased response produced by an open handler.
pub type AnyResponse = Box<dyn Any + Send>;

/// A request of any type, tagged with its request and response types.
pub struct AnyRequest {
    value: Box<dyn Any + Send>,
    request: ServiceKey,
    response: ServiceKey,
}

impl AnyRequest {
    pub fn new<R: AsyncRequest>(request: R) -> Self {
        Self {
            value: Box::new(request),
            request: ServiceKey::of::<R>(),
            response: ServiceKey::of::<R::Response>(),
        }
    }

    #[inline]
    pub fn request_type(&self) -> ServiceKey {
        self.request
    }

    /// The response type the caller expects back.
    #[inline]
    pub fn response_type(&self) -> ServiceKey {
        self.response
    }

    /// Recover the typed request.
    pub fn downcast<R: AsyncRequest>(self) -> std::result::Result<R, Self> {
        match self.value.downcast::<R>() {
            Ok(request) => Ok(*request),
            Err(value) => Err(Self { value, ..self }),
        }
    }
}

impl std::fmt::Debug for AnyRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyRequest")
            .field("request", &self.request)
            .field("response", &self.response)
            .finish()
    }
}

/// Open definition serving `dyn AsyncRequestHandler<R>` for every `R`.
///
/// The response must be an `R::Response` boxed as [`AnyResponse`]; anything
/// else fails the call with `OpenGenericMismatch`.
#[async_trait]
pub trait OpenAsyncHandler: Send + Sync {
    async fn handle(&self, request: AnyRequest) -> Result<AnyResponse>;

    /// The definition this one wraps, if it is a decorator.
    fn inner_handler(&self) -> Option<&dyn OpenAsyncHandler> {
        None
    }

    /// Name used in diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// An open definition closed over one request type.
pub struct ClosedHandler<R> {
    definition: Arc<dyn OpenAsyncHandler>,
    _request: PhantomData<fn(R)>,
}

impl<R: AsyncRequest> ClosedHandler<R> {
    pub fn new(definition: Arc<dyn OpenAsyncHandler>) -> Self {
        Self {
            definition,
            _request: PhantomData,
        }
    }
}

#[async_trait]
impl<R: AsyncRequest> AsyncRequestHandler<R> for ClosedHandler<R> {
    async fn handle(&self, request: R) -> Result<R::Response> {
        let response = self.definition.handle(AnyRequest::new(request)).await?;
        match response.downcast::<R::Response>() {
            Ok(response) => Ok(*response),
            Err(_) => Err(DiError::OpenGenericMismatch {
                definition: self.definition.name(),
                type_name: std::any::type_name::<R>(),
                reason: format!(
                    "expected a response of type {}",
                    std::any::type_name::<R::Response>()
                ),
            }),
        }
    }
}

impl<R: AsyncRequest> OpenGeneric for dyn AsyncRequestHandler<R> {
    type Definition = dyn OpenAsyncHandler;

    fn close(definition: Arc<Self::Definition>, _resolver: &Resolver<'_>) -> Result<Arc<Self>> {
        Ok(Arc::new(ClosedHandler::<R>::new(definition)))
    }
}

/// The catch-all handler: answers every request with the default value of
/// its response type.
///
/// Response types must be listed up front with [`with`](Self::with).
///
/// # Examples
///
/// ```rust
/// use dispatch_injector::{
///     AsyncRequest, Container, DefaultResponses, Lifetime, Mediator, OpenAsyncHandler,
/// };
/// use std::sync::Arc;
///
/// struct CountUsers;
/// impl AsyncRequest for CountUsers {
///     type Response = u64;
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let container = Container::new();
/// container
///     .register_factory::<dyn OpenAsyncHandler, _>(Lifetime::Singleton, |_| {
///         Ok(Arc::new(DefaultResponses::new().with::<u64>()))
///     })
///     .unwrap();
///
/// let scope = container.create_scope().unwrap();
/// assert_eq!(Mediator.handle_async(&scope, CountUsers).await.unwrap(), 0);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct DefaultResponses {
    defaults: HashMap<TypeId, fn() -> AnyResponse, RandomState>,
}

fn default_response<T: Default + Send + 'static>() -> AnyResponse {
    Box::new(T::default())
}

impl DefaultResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests whose response type is `T` with `T::default()`.
    pub fn with<T: Default + Send + 'static>(mut self) -> Self {
        self.defaults.insert(TypeId::of::<T>(), default_response::<T>);
        self
    }

    pub fn len(&self) -> usize {
        self.defaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty()
    }
}

impl std::fmt::Debug for DefaultResponses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultResponses")
            .field("response_types", &self.defaults.len())
            .finish()
    }
}

#[async_trait]
impl OpenAsyncHandler for DefaultResponses {
    async fn handle(&self, request: AnyRequest) -> Result<AnyResponse> {
        let response = request.response_type();
        match self.defaults.get(&response.type_id()) {
            Some(default) => Ok(default()),
            None => Err(DiError::OpenGenericMismatch {
                definition: self.name(),
                type_name: request.request_type().type_name(),
                reason: format!("no default value known for {}", response.type_name()),
            }),
        }
    }
}
