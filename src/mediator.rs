//! Request/response dispatch
//!
//! A request type names its response type. Handlers are ordinary container
//! services registered under `dyn RequestHandler<R>` or
//! `dyn AsyncRequestHandler<R>`, so they get constructor injection, lifetimes
//! and decorators like any other service. The [`Mediator`] only looks the
//! handler up in the scope it is given and invokes it.

use crate::decorators::Authorization;
use crate::error::Result;
use crate::key::ServiceKey;
use crate::resolver::Resolve;
use async_trait::async_trait;

#[cfg(feature = "logging")]
use tracing::debug;

/// A request handled synchronously.
pub trait Request: Send + 'static {
    type Response: Send + 'static;
}

/// A request handled asynchronously.
pub trait AsyncRequest: Send + 'static {
    type Response: Send + 'static;
}

/// The response of commands, which report completion rather than data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Unit {
    /// Identity of whatever the command created, if it wants to say.
    pub id: Option<u64>,
}

/// A synchronous request answered with [`Unit`].
pub trait Command: Request<Response = Unit> {}

impl<T: Request<Response = Unit>> Command for T {}

/// An asynchronous request answered with [`Unit`].
pub trait AsyncCommand: AsyncRequest<Response = Unit> {}

impl<T: AsyncRequest<Response = Unit>> AsyncCommand for T {}

/// Handles requests of type `R` synchronously.
pub trait RequestHandler<R: Request>: Send + Sync {
    fn handle(&self, request: R) -> Result<R::Response>;
}

/// Handles requests of type `R` asynchronously.
///
/// Decorators implement this trait too and expose the link they wrap
/// through [`inner_handler`](Self::inner_handler), so the chain can be
/// walked down to the handler that does the actual work.
#[async_trait]
pub trait AsyncRequestHandler<R: AsyncRequest>: Send + Sync {
    async fn handle(&self, request: R) -> Result<R::Response>;

    /// The handler this one wraps, if it is a decorator.
    fn inner_handler(&self) -> Option<&dyn AsyncRequestHandler<R>> {
        None
    }

    /// Roles the caller must hold for this handler to run.
    fn authorization(&self) -> Option<Authorization> {
        None
    }
}

/// Handler shape for synchronous commands.
pub trait CommandHandler<C: Command>: RequestHandler<C> {}

impl<C: Command, H: RequestHandler<C> + ?Sized> CommandHandler<C> for H {}

/// Handler shape for asynchronous commands.
pub trait AsyncCommandHandler<C: AsyncCommand>: AsyncRequestHandler<C> {}

impl<C: AsyncCommand, H: AsyncRequestHandler<C> + ?Sized> AsyncCommandHandler<C> for H {}

/// Identity of the handler for one request/response pair.
///
/// The response is determined by the request type, so each pair maps onto
/// exactly one service key. Dispatch looks handlers up by that
/// [`service`](Self::service) key directly; this type only labels the
/// mediator's log events and is there for hosts that want to report on
/// handlers the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    request: ServiceKey,
    response: ServiceKey,
    service: ServiceKey,
}

impl HandlerKey {
    /// Key of the asynchronous handler for `R`.
    pub fn of<R: AsyncRequest>() -> Self {
        Self {
            request: ServiceKey::of::<R>(),
            response: ServiceKey::of::<R::Response>(),
            service: ServiceKey::of::<dyn AsyncRequestHandler<R>>(),
        }
    }

    /// Key of the synchronous handler for `R`.
    pub fn of_sync<R: Request>() -> Self {
        Self {
            request: ServiceKey::of::<R>(),
            response: ServiceKey::of::<R::Response>(),
            service: ServiceKey::of::<dyn RequestHandler<R>>(),
        }
    }

    #[inline]
    pub fn request(&self) -> ServiceKey {
        self.request
    }

    #[inline]
    pub fn response(&self) -> ServiceKey {
        self.response
    }

    /// The container key the handler is registered under.
    #[inline]
    pub fn service(&self) -> ServiceKey {
        self.service
    }
}

impl std::fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.request.short_name(),
            self.response.short_name()
        )
    }
}

/// Dispatches requests to the handler registered for them.
///
/// The mediator is stateless: the scope to resolve handlers from is passed
/// with every call, so one instance serves every request.
///
/// # Examples
///
/// ```rust
/// use dispatch_injector::{
///     AsyncRequest, AsyncRequestHandler, Container, Lifetime, Mediator, Result,
/// };
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// struct Ping;
/// impl AsyncRequest for Ping {
///     type Response = &'static str;
/// }
///
/// struct PingHandler;
///
/// #[async_trait]
/// impl AsyncRequestHandler<Ping> for PingHandler {
///     async fn handle(&self, _request: Ping) -> Result<&'static str> {
///         Ok("pong")
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let container = Container::new();
/// container
///     .register_factory::<dyn AsyncRequestHandler<Ping>, _>(Lifetime::Scoped, |_| {
///         Ok(Arc::new(PingHandler))
///     })
///     .unwrap();
///
/// let scope = container.create_scope().unwrap();
/// let answer = Mediator.handle_async(&scope, Ping).await.unwrap();
/// assert_eq!(answer, "pong");
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Mediator;

impl Mediator {
    #[inline]
    pub fn new() -> Self {
        Self
    }

    /// Handle a synchronous request.
    pub fn handle<R, C>(&self, scope: &C, request: R) -> Result<R::Response>
    where
        R: Request,
        C: Resolve,
    {
        let handler = scope.with_resolver(|resolver| resolver.resolve::<dyn RequestHandler<R>>())?;

        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            handler = %HandlerKey::of_sync::<R>(),
            "Dispatching request"
        );

        handler.handle(request)
    }

    /// Handle an asynchronous request.
    ///
    /// Falls back to the open generic handler definition when no handler is
    /// registered for `R` itself. Resolution failures are reported through
    /// the returned future like any other failure.
    pub async fn handle_async<R, C>(&self, scope: &C, request: R) -> Result<R::Response>
    where
        R: AsyncRequest,
        C: Resolve + Sync,
    {
        let handler = scope
            .with_resolver(|resolver| resolver.resolve_generic::<dyn AsyncRequestHandler<R>>())?;

        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            handler = %HandlerKey::of::<R>(),
            "Dispatching async request"
        );

        handler.handle(request).await
    }

    /// Whether a handler for `R`, or an open generic definition, is
    /// available in `scope`.
    pub fn can_handle<R, C>(&self, scope: &C) -> bool
    where
        R: AsyncRequest,
        C: Resolve,
    {
        scope.with_resolver(|resolver| {
            resolver.contains::<dyn AsyncRequestHandler<R>>()
                || resolver.contains::<dyn crate::generic::OpenAsyncHandler>()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::error::DiError;
    use crate::factory::{Construct, Constructors};
    use crate::provider::Lifetime;
    use crate::resolver::Resolver;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Add(i32, i32);

    impl Request for Add {
        type Response = i32;
    }

    struct AddHandler;

    impl RequestHandler<Add> for AddHandler {
        fn handle(&self, request: Add) -> Result<i32> {
            Ok(request.0 + request.1)
        }
    }

    struct Greet {
        name: String,
    }

    impl AsyncRequest for Greet {
        type Response = String;
    }

    trait Salutation: Send + Sync {
        fn word(&self) -> &'static str;
    }

    struct Hello;

    impl Salutation for Hello {
        fn word(&self) -> &'static str {
            "hello"
        }
    }

    struct GreetHandler {
        salutation: Arc<dyn Salutation>,
    }

    impl Construct for GreetHandler {
        fn constructors() -> Constructors<Self> {
            Constructors::new().with(|salutation: Arc<dyn Salutation>| GreetHandler { salutation })
        }
    }

    #[async_trait]
    impl AsyncRequestHandler<Greet> for GreetHandler {
        async fn handle(&self, request: Greet) -> Result<String> {
            Ok(format!("{} {}", self.salutation.word(), request.name))
        }
    }

    struct Flush;

    impl AsyncRequest for Flush {
        type Response = Unit;
    }

    struct FlushHandler {
        flushed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AsyncRequestHandler<Flush> for FlushHandler {
        async fn handle(&self, _request: Flush) -> Result<Unit> {
            self.flushed.fetch_add(1, Ordering::SeqCst);
            Err(DiError::handler::<Flush>("disk full"))
        }
    }

    fn assert_async_command<C: AsyncCommand>() {}

    #[test]
    fn test_sync_dispatch() {
        let container = Container::new();
        container
            .register_factory::<dyn RequestHandler<Add>, _>(Lifetime::Singleton, |_: &Resolver<'_>| {
                Ok(Arc::new(AddHandler) as Arc<dyn RequestHandler<Add>>)
            })
            .unwrap();

        let scope = container.create_scope().unwrap();
        assert_eq!(Mediator.handle(&scope, Add(2, 3)).unwrap(), 5);
        assert_eq!(Mediator::new().handle(&container, Add(1, 1)).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_async_dispatch_with_injected_dependency() {
        let container = Container::new();
        container
            .register_factory::<dyn Salutation, _>(Lifetime::Singleton, |_: &Resolver<'_>| {
                Ok(Arc::new(Hello) as Arc<dyn Salutation>)
            })
            .unwrap();
        container
            .register_as::<dyn AsyncRequestHandler<Greet>, GreetHandler, _>(Lifetime::Scoped, |h| {
                h as Arc<dyn AsyncRequestHandler<Greet>>
            })
            .unwrap();

        let scope = container.create_scope().unwrap();
        let mediator = Mediator::new();
        assert!(mediator.can_handle::<Greet, _>(&scope));

        let answer = mediator
            .handle_async(
                &scope,
                Greet {
                    name: "world".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(answer, "hello world");
    }

    #[tokio::test]
    async fn test_unregistered_request_is_not_found() {
        let container = Container::new();
        let scope = container.create_scope().unwrap();

        assert!(!Mediator.can_handle::<Greet, _>(&scope));
        let err = Mediator
            .handle_async(
                &scope,
                Greet {
                    name: "nobody".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DiError::NotFound { .. }));

        assert!(matches!(
            Mediator.handle(&scope, Add(1, 2)),
            Err(DiError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_command_failure_surfaces_through_future() {
        assert_async_command::<Flush>();

        let flushed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&flushed);

        let container = Container::new();
        container
            .register_factory::<dyn AsyncRequestHandler<Flush>, _>(Lifetime::Scoped, move |_: &Resolver<'_>| {
                Ok(Arc::new(FlushHandler {
                    flushed: Arc::clone(&counter),
                }) as Arc<dyn AsyncRequestHandler<Flush>>)
            })
            .unwrap();

        let scope = container.create_scope().unwrap();
        let err = Mediator.handle_async(&scope, Flush).await.unwrap_err();

        assert_eq!(flushed.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), crate::error::ErrorKind::Handler);
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_handler_key() {
        let key = HandlerKey::of::<Greet>();
        assert_eq!(key.request(), ServiceKey::of::<Greet>());
        assert_eq!(key.response(), ServiceKey::of::<String>());
        assert_eq!(key.service(), ServiceKey::of::<dyn AsyncRequestHandler<Greet>>());
        assert_eq!(key.to_string(), "Greet -> String");
        assert_ne!(key, HandlerKey::of_sync::<Add>());
    }
}
