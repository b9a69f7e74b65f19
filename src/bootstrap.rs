//! Declarative application wiring
//!
//! Handlers declare the decorators they want through [`HandlerMarkers`]
//! instead of attributes, and a [`Bootstrap`] turns those markers into
//! decorator registrations:
//!
//! ```rust
//! use async_trait::async_trait;
//! use dispatch_injector::{
//!     AsyncRequest, AsyncRequestHandler, Bootstrap, Construct, Constructors, HandlerMarkers,
//!     LogSink, Marker, Mediator, Result,
//! };
//!
//! struct Ping;
//! impl AsyncRequest for Ping {
//!     type Response = &'static str;
//! }
//!
//! struct PingHandler;
//! impl Construct for PingHandler {
//!     fn constructors() -> Constructors<Self> {
//!         Constructors::new().with(|()| PingHandler)
//!     }
//! }
//! impl HandlerMarkers for PingHandler {
//!     const MARKERS: &'static [Marker] = &[Marker::Log];
//! }
//!
//! #[async_trait]
//! impl AsyncRequestHandler<Ping> for PingHandler {
//!     async fn handle(&self, _request: Ping) -> Result<&'static str> {
//!         Ok("pong")
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let container = Bootstrap::new()
//!     .core(LogSink::discard())
//!     .unwrap()
//!     .handler::<Ping, PingHandler>()
//!     .unwrap()
//!     .build();
//!
//! let scope = container.create_scope().unwrap();
//! assert_eq!(Mediator.handle_async(&scope, Ping).await.unwrap(), "pong");
//! # }
//! ```

use crate::container::{Container, RootState};
use crate::decorators::{Authorization, LogSink, authorization_with, logging, open_logging};
use crate::error::{DiError, Result};
use crate::factory::Construct;
use crate::generic::OpenAsyncHandler;
use crate::mediator::{AsyncRequest, AsyncRequestHandler, Mediator, Request, RequestHandler};
use crate::provider::Lifetime;
use crate::registration::RegistrationHandle;
use crate::resolver::Resolver;
use crate::scope::{RequestId, ScopedContainer};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::debug;

/// A decorator a handler asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Wrap the handler in a [`LoggingDecorator`](crate::LoggingDecorator).
    Log,
    /// Require the caller to hold one of these roles.
    Authorize(&'static [&'static str]),
}

/// Decorators a handler wants, applied in order: the first marker wraps the
/// handler itself and the last one is what callers reach first.
pub trait HandlerMarkers {
    const MARKERS: &'static [Marker] = &[];
}

/// Handle to the container that does not keep it alive.
///
/// Registered as a singleton by [`Bootstrap::core`] so services can open
/// fresh scopes without owning the container that owns them.
#[derive(Clone)]
pub struct ContainerRef {
    root: Weak<RootState>,
}

impl ContainerRef {
    pub fn new(container: &Container) -> Self {
        Self {
            root: container.downgrade(),
        }
    }

    /// The container, if it is still alive.
    pub fn upgrade(&self) -> Result<Container> {
        self.root
            .upgrade()
            .map(Container::from_root)
            .ok_or(DiError::ContainerDropped)
    }

    pub fn create_scope(&self) -> Result<ScopedContainer> {
        self.upgrade()?.create_scope()
    }

    pub fn scope_for(&self, request: RequestId) -> Result<ScopedContainer> {
        self.upgrade()?.scope_for(request)
    }
}

impl std::fmt::Debug for ContainerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRef")
            .field("alive", &(self.root.strong_count() > 0))
            .finish()
    }
}

/// One unit of wiring, listed up front where other ecosystems would scan
/// assemblies.
#[derive(Clone, Copy)]
pub struct Component {
    name: &'static str,
    register: fn(&Container) -> Result<()>,
}

impl Component {
    /// Async handler `H` for `R`, decorated per its markers.
    pub fn handler<R, H>() -> Self
    where
        R: AsyncRequest,
        H: AsyncRequestHandler<R> + Construct + HandlerMarkers,
    {
        Self {
            name: std::any::type_name::<H>(),
            register: |container: &Container| register_handler::<R, H>(container).map(drop),
        }
    }

    /// Synchronous handler `H` for `R`.
    pub fn request_handler<R, H>() -> Self
    where
        R: Request,
        H: RequestHandler<R> + Construct,
    {
        Self {
            name: std::any::type_name::<H>(),
            register: register_request_handler::<R, H>,
        }
    }

    /// A controller or other request-bound endpoint.
    pub fn endpoint<T: Construct>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            register: register_endpoint::<T>,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn register(&self, container: &Container) -> Result<()> {
        (self.register)(container)
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Component").field(&self.name).finish()
    }
}

/// Build a [`Component`].
///
/// ```rust,ignore
/// bootstrap.components(&[
///     component!(handler GetAboutMessage => GetAboutMessageHandler),
///     component!(sync GetVersion => GetVersionHandler),
///     component!(endpoint HomeController),
/// ])?;
/// ```
#[macro_export]
macro_rules! component {
    (handler $request:ty => $handler:ty) => {
        $crate::Component::handler::<$request, $handler>()
    };
    (sync $request:ty => $handler:ty) => {
        $crate::Component::request_handler::<$request, $handler>()
    };
    (endpoint $endpoint:ty) => {
        $crate::Component::endpoint::<$endpoint>()
    };
}

fn register_handler<R, H>(
    container: &Container,
) -> Result<RegistrationHandle<dyn AsyncRequestHandler<R>>>
where
    R: AsyncRequest,
    H: AsyncRequestHandler<R> + Construct + HandlerMarkers,
{
    let mut handle = container.register_as::<dyn AsyncRequestHandler<R>, H, _>(
        Lifetime::Scoped,
        |handler| handler as Arc<dyn AsyncRequestHandler<R>>,
    )?;

    for marker in H::MARKERS {
        let decorator = match *marker {
            Marker::Log => logging::<R>(),
            Marker::Authorize(roles) => {
                authorization_with::<R>(Some(Authorization::roles(roles)))
            }
        };
        handle = handle.try_decorate_with(decorator)?;
    }

    #[cfg(feature = "logging")]
    debug!(
        target: crate::logging::TARGET,
        request = std::any::type_name::<R>(),
        handler = std::any::type_name::<H>(),
        decorators = ?handle.decorator_names(),
        "Wired handler"
    );

    Ok(handle)
}

fn register_request_handler<R, H>(container: &Container) -> Result<()>
where
    R: Request,
    H: RequestHandler<R> + Construct,
{
    container.register_as::<dyn RequestHandler<R>, H, _>(Lifetime::Scoped, |handler| {
        handler as Arc<dyn RequestHandler<R>>
    })?;
    Ok(())
}

fn register_endpoint<T: Construct>(container: &Container) -> Result<()> {
    container.register_type::<T>(Lifetime::Scoped)?;
    Ok(())
}

/// Builder wiring the mediator, handlers and endpoints into a container.
pub struct Bootstrap {
    container: Container,
}

impl Bootstrap {
    pub fn new() -> Self {
        Self::with_container(Container::new())
    }

    /// Wire into an existing container.
    pub fn with_container(container: Container) -> Self {
        Self { container }
    }

    /// Register the pieces every application needs: a [`ContainerRef`],
    /// the [`Mediator`] and the decorators' [`LogSink`].
    pub fn core(self, sink: LogSink) -> Result<Self> {
        self.container.singleton(ContainerRef::new(&self.container))?;
        self.container.singleton(Mediator::new())?;
        self.container.singleton(sink)?;
        Ok(self)
    }

    /// Register `H` as the scoped handler for `R`, decorated per its markers.
    pub fn handler<R, H>(self) -> Result<Self>
    where
        R: AsyncRequest,
        H: AsyncRequestHandler<R> + Construct + HandlerMarkers,
    {
        register_handler::<R, H>(&self.container)?;
        Ok(self)
    }

    /// Register `H` as the scoped synchronous handler for `R`.
    pub fn request_handler<R, H>(self) -> Result<Self>
    where
        R: Request,
        H: RequestHandler<R> + Construct,
    {
        register_request_handler::<R, H>(&self.container)?;
        Ok(self)
    }

    /// Register `definition` as the handler of last resort for every async
    /// request without a handler of its own.
    ///
    /// Only [`Marker::Log`] applies to open definitions; an authorization
    /// requirement needs a concrete request type to check against.
    pub fn open_handler<D>(self, definition: D, markers: &[Marker]) -> Result<Self>
    where
        D: OpenAsyncHandler + 'static,
    {
        let definition: Arc<dyn OpenAsyncHandler> = Arc::new(definition);
        let mut handle = self.container.register_factory::<dyn OpenAsyncHandler, _>(
            Lifetime::Singleton,
            move |_: &Resolver<'_>| Ok(Arc::clone(&definition)),
        )?;

        for marker in markers {
            match marker {
                Marker::Log => handle = handle.try_decorate_with(open_logging())?,
                Marker::Authorize(_) => {
                    return Err(DiError::OpenGenericMismatch {
                        definition: std::any::type_name::<D>(),
                        type_name: "dyn OpenAsyncHandler",
                        reason: "authorization markers need a concrete request type".into(),
                    });
                }
            }
        }
        Ok(self)
    }

    /// Register `T` scoped, to be resolved once per request.
    pub fn endpoint<T: Construct>(self) -> Result<Self> {
        register_endpoint::<T>(&self.container)?;
        Ok(self)
    }

    /// Register every component, in order.
    pub fn components(self, components: &[Component]) -> Result<Self> {
        for component in components {
            component.register(&self.container)?;

            #[cfg(feature = "logging")]
            debug!(
                target: crate::logging::TARGET,
                component = component.name(),
                "Registered component"
            );
        }
        Ok(self)
    }

    /// The container being wired, for registrations the builder has no
    /// shorthand for.
    #[inline]
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Lock the container and hand it over.
    pub fn build(self) -> Container {
        self.container.lock();
        self.container
    }
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("container", &self.container)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::factory::{Constructors, Decorator};
    use crate::decorators::Principal;
    use crate::generic::DefaultResponses;
    use crate::mediator::Unit;
    use crate::provider::Dispose;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Lines = Arc<Mutex<Vec<String>>>;

    fn capturing_sink() -> (LogSink, Lines) {
        let lines: Lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = Arc::clone(&lines);
        let sink = LogSink::new(move |line: &str| sink_lines.lock().unwrap().push(line.to_string()));
        (sink, lines)
    }

    // The about page: controller -> mediator -> handler -> service.

    trait MessageService: Dispose {
        fn say_something(&self) -> String;
    }

    struct Service {
        sink: Arc<LogSink>,
    }

    impl MessageService for Service {
        fn say_something(&self) -> String {
            "hello".to_string()
        }
    }

    impl Dispose for Service {
        fn dispose(&self) -> std::result::Result<(), BoxError> {
            self.sink.log("currently being disposed!");
            Ok(())
        }
    }

    impl Construct for Service {
        fn constructors() -> Constructors<Self> {
            Constructors::new().with(|sink: Arc<LogSink>| Service { sink })
        }
    }

    struct GetAboutMessageCommand;

    impl AsyncRequest for GetAboutMessageCommand {
        type Response = String;
    }

    struct GetAboutMessageCommandHandler {
        service: Arc<dyn MessageService>,
    }

    impl Construct for GetAboutMessageCommandHandler {
        fn constructors() -> Constructors<Self> {
            Constructors::new()
                .with(|service: Arc<dyn MessageService>| GetAboutMessageCommandHandler { service })
        }
    }

    impl HandlerMarkers for GetAboutMessageCommandHandler {
        const MARKERS: &'static [Marker] = &[Marker::Log];
    }

    #[async_trait]
    impl AsyncRequestHandler<GetAboutMessageCommand> for GetAboutMessageCommandHandler {
        async fn handle(&self, _request: GetAboutMessageCommand) -> Result<String> {
            Ok(self.service.say_something())
        }
    }

    struct HomeController {
        mediator: Arc<Mediator>,
    }

    impl HomeController {
        async fn about(&self, scope: &ScopedContainer) -> Result<String> {
            self.mediator.handle_async(scope, GetAboutMessageCommand).await
        }
    }

    impl Construct for HomeController {
        fn constructors() -> Constructors<Self> {
            Constructors::new().with(|mediator: Arc<Mediator>| HomeController { mediator })
        }
    }

    fn about_app(sink: LogSink) -> Container {
        let bootstrap = Bootstrap::new()
            .core(sink)
            .unwrap()
            .components(&[
                component!(handler GetAboutMessageCommand => GetAboutMessageCommandHandler),
                component!(endpoint HomeController),
            ])
            .unwrap();
        bootstrap
            .container()
            .register_as::<dyn MessageService, Service, _>(Lifetime::Scoped, |s| {
                s as Arc<dyn MessageService>
            })
            .unwrap()
            .disposable();
        bootstrap.build()
    }

    #[tokio::test]
    async fn test_about_page_end_to_end() {
        let (sink, lines) = capturing_sink();
        let container = about_app(sink);
        assert!(container.is_locked());

        let request = RequestId::new(1);
        let scope = container.scope_for(request).unwrap();
        let controller = scope.resolve::<HomeController>().unwrap();

        assert_eq!(controller.about(&scope).await.unwrap(), "hello");
        assert_eq!(
            *lines.lock().unwrap(),
            vec![
                "entering GetAboutMessageCommand",
                "completed GetAboutMessageCommand"
            ]
        );

        container.end_request(request).unwrap();
        assert_eq!(
            lines.lock().unwrap().last().map(String::as_str),
            Some("currently being disposed!")
        );
    }

    #[tokio::test]
    async fn test_each_request_gets_its_own_handler() {
        let (sink, _lines) = capturing_sink();
        let container = about_app(sink);

        let first = container.create_scope().unwrap();
        let second = container.create_scope().unwrap();
        let a = first
            .resolve::<dyn AsyncRequestHandler<GetAboutMessageCommand>>()
            .unwrap();
        let b = second
            .resolve::<dyn AsyncRequestHandler<GetAboutMessageCommand>>()
            .unwrap();
        let again = first
            .resolve::<dyn AsyncRequestHandler<GetAboutMessageCommand>>()
            .unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &again));
        // mediator and sink are shared
        assert!(Arc::ptr_eq(
            &first.resolve::<Mediator>().unwrap(),
            &second.resolve::<Mediator>().unwrap()
        ));
    }

    // Authorization driven by a marker.

    struct DeleteEverything;

    impl AsyncRequest for DeleteEverything {
        type Response = Unit;
    }

    struct DeleteEverythingHandler {
        deleted: Arc<AtomicUsize>,
    }

    impl Construct for DeleteEverythingHandler {
        fn constructors() -> Constructors<Self> {
            Constructors::new().with(|deleted: Arc<AtomicUsize>| DeleteEverythingHandler { deleted })
        }
    }

    impl HandlerMarkers for DeleteEverythingHandler {
        const MARKERS: &'static [Marker] = &[Marker::Log, Marker::Authorize(&["Admin"])];
    }

    #[async_trait]
    impl AsyncRequestHandler<DeleteEverything> for DeleteEverythingHandler {
        async fn handle(&self, _request: DeleteEverything) -> Result<Unit> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(Unit::default())
        }
    }

    fn guarded_app() -> (Container, Arc<AtomicUsize>, Lines) {
        let (sink, lines) = capturing_sink();
        let bootstrap = Bootstrap::new()
            .core(sink)
            .unwrap()
            .handler::<DeleteEverything, DeleteEverythingHandler>()
            .unwrap();
        bootstrap.container().singleton(AtomicUsize::new(0)).unwrap();
        let container = bootstrap.build();
        let deleted = container.resolve::<AtomicUsize>().unwrap();
        (container, deleted, lines)
    }

    #[tokio::test]
    async fn test_caller_without_roles_is_denied() {
        let (container, deleted, lines) = guarded_app();
        let scope = container.create_scope().unwrap();
        scope.provide(Principal::authenticated("eve")).unwrap();

        let err = Mediator.handle_async(&scope, DeleteEverything).await.unwrap_err();
        assert!(matches!(err, DiError::Unauthorized { .. }));
        assert_eq!(deleted.load(Ordering::SeqCst), 0);
        // authorization is outermost, so logging never saw the request
        assert!(lines.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admin_is_let_through() {
        let (container, deleted, lines) = guarded_app();
        let scope = container.create_scope().unwrap();
        scope
            .provide(Principal::authenticated("root").with_role("Admin"))
            .unwrap();

        Mediator.handle_async(&scope, DeleteEverything).await.unwrap();
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
        assert_eq!(lines.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_markers_become_decorators_in_order() {
        let container = Container::new();
        let handle = register_handler::<DeleteEverything, DeleteEverythingHandler>(&container).unwrap();
        assert_eq!(handle.lifetime(), Lifetime::Scoped);
        assert_eq!(handle.decorator_names(), vec!["logging", "authorization"]);

        let again = register_handler::<DeleteEverything, DeleteEverythingHandler>(&container);
        assert!(matches!(again, Err(DiError::AlreadyRegistered { .. })));
    }

    // Decorator nesting, pinned with enter/exit markers.

    struct Trace;

    impl AsyncRequest for Trace {
        type Response = ();
    }

    struct Traced {
        events: Lines,
    }

    #[async_trait]
    impl AsyncRequestHandler<Trace> for Traced {
        async fn handle(&self, _request: Trace) -> Result<()> {
            self.events.lock().unwrap().push("H".to_string());
            Ok(())
        }
    }

    struct Around {
        label: &'static str,
        inner: Arc<dyn AsyncRequestHandler<Trace>>,
        events: Lines,
    }

    #[async_trait]
    impl AsyncRequestHandler<Trace> for Around {
        async fn handle(&self, request: Trace) -> Result<()> {
            self.events.lock().unwrap().push(format!("{}-enter", self.label));
            self.inner.handle(request).await?;
            self.events.lock().unwrap().push(format!("{}-exit", self.label));
            Ok(())
        }

        fn inner_handler(&self) -> Option<&dyn AsyncRequestHandler<Trace>> {
            Some(self.inner.as_ref())
        }
    }

    fn around(label: &'static str, events: &Lines) -> Decorator<dyn AsyncRequestHandler<Trace>> {
        let events = Arc::clone(events);
        Decorator::new(move |inner: Arc<dyn AsyncRequestHandler<Trace>>, ()| {
            Arc::new(Around {
                label,
                inner,
                events: Arc::clone(&events),
            }) as Arc<dyn AsyncRequestHandler<Trace>>
        })
        .named(label)
    }

    #[tokio::test]
    async fn test_later_decorators_wrap_earlier_ones() {
        let events: Lines = Arc::new(Mutex::new(Vec::new()));
        let container = Container::new();
        let handler_events = Arc::clone(&events);
        container
            .register_factory::<dyn AsyncRequestHandler<Trace>, _>(
                Lifetime::Scoped,
                move |_: &Resolver<'_>| {
                    Ok(Arc::new(Traced {
                        events: Arc::clone(&handler_events),
                    }) as Arc<dyn AsyncRequestHandler<Trace>>)
                },
            )
            .unwrap()
            .decorate_with(around("A", &events))
            .decorate_with(around("B", &events));

        let scope = container.create_scope().unwrap();
        Mediator.handle_async(&scope, Trace).await.unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec!["B-enter", "A-enter", "H", "A-exit", "B-exit"]
        );
    }

    // Disposal at request end.

    struct X {
        disposed: Arc<AtomicUsize>,
    }

    struct Y {
        disposed: Arc<AtomicUsize>,
    }

    #[tokio::test]
    async fn test_only_realized_scoped_services_are_disposed() {
        let x_disposed = Arc::new(AtomicUsize::new(0));
        let y_disposed = Arc::new(AtomicUsize::new(0));
        let container = Container::new();

        let counter = Arc::clone(&x_disposed);
        container
            .register_factory::<X, _>(Lifetime::Scoped, move |_: &Resolver<'_>| {
                Ok(Arc::new(X {
                    disposed: Arc::clone(&counter),
                }))
            })
            .unwrap()
            .dispose_with(|x: &X| {
                x.disposed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        let counter = Arc::clone(&y_disposed);
        container
            .register_factory::<Y, _>(Lifetime::Scoped, move |_: &Resolver<'_>| {
                Ok(Arc::new(Y {
                    disposed: Arc::clone(&counter),
                }))
            })
            .unwrap()
            .dispose_with(|y: &Y| {
                y.disposed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        let request = RequestId::new(9);
        let scope = container.scope_for(request).unwrap();
        scope.resolve::<Y>().unwrap();
        drop(scope);

        container.end_request(request).unwrap();
        assert_eq!(x_disposed.load(Ordering::SeqCst), 0);
        assert_eq!(y_disposed.load(Ordering::SeqCst), 1);
        assert_eq!(container.open_requests(), 0);
    }

    #[test]
    fn test_container_ref_does_not_keep_container_alive() {
        let container = Bootstrap::new().core(LogSink::discard()).unwrap().build();
        let handle = container.resolve::<ContainerRef>().unwrap();

        let scope = handle.create_scope().unwrap();
        assert!(scope.resolve::<Mediator>().is_ok());
        drop(scope);

        drop(container);
        assert!(matches!(handle.upgrade(), Err(DiError::ContainerDropped)));
        assert!(matches!(handle.create_scope(), Err(DiError::ContainerDropped)));
    }

    #[tokio::test]
    async fn test_open_handler_with_logging() {
        let (sink, lines) = capturing_sink();
        let container = Bootstrap::new()
            .core(sink)
            .unwrap()
            .open_handler(DefaultResponses::new().with::<Unit>(), &[Marker::Log])
            .unwrap()
            .build();

        let scope = container.create_scope().unwrap();
        assert_eq!(
            Mediator.handle_async(&scope, DeleteEverything).await.unwrap(),
            Unit::default()
        );
        assert_eq!(
            *lines.lock().unwrap(),
            vec!["entering DeleteEverything", "completed DeleteEverything"]
        );
    }

    #[test]
    fn test_open_handler_rejects_authorization_marker() {
        let result = Bootstrap::new().open_handler(
            DefaultResponses::new(),
            &[Marker::Authorize(&["Admin"])],
        );
        assert!(matches!(result, Err(DiError::OpenGenericMismatch { .. })));
    }

    #[test]
    fn test_component_names() {
        let component = component!(endpoint HomeController);
        assert!(component.name().ends_with("HomeController"));
        assert!(format!("{component:?}").contains("HomeController"));
    }
}
