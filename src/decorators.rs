//! Cross-cutting handler decorators
//!
//! - [`LoggingDecorator`] writes an entry line before and a completion line
//!   after the wrapped handler runs.
//! - [`AuthorizationDecorator`] checks the caller's roles against what the
//!   innermost handler requires before letting the request through.
//!
//! Both wrap `dyn AsyncRequestHandler<R>` and are attached with
//! [`RegistrationHandle::decorate_with`](crate::RegistrationHandle::decorate_with),
//! usually by the bootstrap from a handler's markers.

use crate::bootstrap::Marker;
use crate::error::{DiError, Result};
use crate::factory::Decorator;
use crate::generic::{AnyRequest, AnyResponse, OpenAsyncHandler};
use crate::key::short_type_name;
use crate::mediator::{AsyncRequest, AsyncRequestHandler};
use crate::resolver::Resolver;
use crate::scope::WeakScope;
use ahash::RandomState;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Destination for the lines written by [`LoggingDecorator`].
///
/// Register one as a singleton to capture request logs; without one the
/// decorator falls back to [`LogSink::tracing`].
#[derive(Clone)]
pub struct LogSink(Arc<dyn Fn(&str) + Send + Sync>);

impl LogSink {
    pub fn new(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(sink))
    }

    /// Emit every line as a `tracing` event.
    pub fn tracing() -> Self {
        Self::new(|_line: &str| {
            #[cfg(feature = "logging")]
            tracing::info!(target: crate::logging::REQUEST_TARGET, "{}", _line);
        })
    }

    /// Drop every line.
    pub fn discard() -> Self {
        Self::new(|_: &str| {})
    }

    #[inline]
    pub fn log(&self, line: &str) {
        (self.0)(line)
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::tracing()
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LogSink")
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logs `entering <Request>` and `completed <Request>` around a handler.
///
/// A failing handler propagates its error without the completion line.
pub struct LoggingDecorator<R: AsyncRequest> {
    inner: Arc<dyn AsyncRequestHandler<R>>,
    sink: LogSink,
}

impl<R: AsyncRequest> LoggingDecorator<R> {
    pub fn new(inner: Arc<dyn AsyncRequestHandler<R>>, sink: LogSink) -> Self {
        Self { inner, sink }
    }
}

#[async_trait]
impl<R: AsyncRequest> AsyncRequestHandler<R> for LoggingDecorator<R> {
    async fn handle(&self, request: R) -> Result<R::Response> {
        let name = short_type_name(std::any::type_name::<R>());
        self.sink.log(&format!("entering {name}"));
        let response = self.inner.handle(request).await?;
        self.sink.log(&format!("completed {name}"));
        Ok(response)
    }

    fn inner_handler(&self) -> Option<&dyn AsyncRequestHandler<R>> {
        Some(self.inner.as_ref())
    }
}

/// Decorator that wraps the handler for `R` in a [`LoggingDecorator`].
///
/// The sink is the registered [`LogSink`], or `tracing` if there is none.
pub fn logging<R: AsyncRequest>() -> Decorator<dyn AsyncRequestHandler<R>> {
    Decorator::new(
        |inner: Arc<dyn AsyncRequestHandler<R>>, sink: Option<Arc<LogSink>>| {
            let sink = sink.map(|s| (*s).clone()).unwrap_or_default();
            Arc::new(LoggingDecorator::new(inner, sink)) as Arc<dyn AsyncRequestHandler<R>>
        },
    )
    .named("logging")
}

struct OpenLoggingDecorator {
    inner: Arc<dyn OpenAsyncHandler>,
    sink: LogSink,
}

#[async_trait]
impl OpenAsyncHandler for OpenLoggingDecorator {
    async fn handle(&self, request: AnyRequest) -> Result<AnyResponse> {
        let name = request.request_type().short_name();
        self.sink.log(&format!("entering {name}"));
        let response = self.inner.handle(request).await?;
        self.sink.log(&format!("completed {name}"));
        Ok(response)
    }

    fn inner_handler(&self) -> Option<&dyn OpenAsyncHandler> {
        Some(self.inner.as_ref())
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Logging for the open generic handler definition.
pub fn open_logging() -> Decorator<dyn OpenAsyncHandler> {
    Decorator::new(
        |inner: Arc<dyn OpenAsyncHandler>, sink: Option<Arc<LogSink>>| {
            let sink = sink.map(|s| (*s).clone()).unwrap_or_default();
            Arc::new(OpenLoggingDecorator { inner, sink }) as Arc<dyn OpenAsyncHandler>
        },
    )
    .named("open-logging")
}

// =============================================================================
// Authorization
// =============================================================================

/// The caller of the current request.
///
/// Provide one to each request scope, or register it as a scoped service; a
/// scope without one is treated as anonymous. It is looked up each time an
/// authorized request is handled, so it may be provided after the handler
/// was built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    name: Option<String>,
    roles: HashSet<String, RandomState>,
}

impl Principal {
    /// A caller nobody has authenticated.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            roles: HashSet::default(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.name.is_some()
    }

    #[inline]
    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Roles a handler requires. Holding any one of them is enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorization {
    roles: &'static [&'static str],
}

impl Authorization {
    pub const fn roles(roles: &'static [&'static str]) -> Self {
        Self { roles }
    }

    /// The requirement declared by the first `Authorize` marker, if any.
    pub fn from_markers(markers: &[Marker]) -> Option<Self> {
        markers.iter().find_map(|marker| match marker {
            Marker::Authorize(roles) => Some(Self::roles(*roles)),
            Marker::Log => None,
        })
    }

    #[inline]
    pub fn required(&self) -> &'static [&'static str] {
        self.roles
    }

    /// An empty role list admits everyone; otherwise the caller must be
    /// authenticated and hold one of the roles.
    pub fn permits(&self, principal: &Principal) -> bool {
        self.roles.is_empty()
            || (principal.is_authenticated() && self.roles.iter().any(|r| principal.is_in_role(r)))
    }
}

/// The handler at the bottom of a decorator chain.
pub fn innermost<R: AsyncRequest>(
    handler: &dyn AsyncRequestHandler<R>,
) -> &dyn AsyncRequestHandler<R> {
    let mut current = handler;
    while let Some(inner) = current.inner_handler() {
        current = inner;
    }
    current
}

enum Caller {
    Fixed(Option<Arc<Principal>>),
    Scope(WeakScope),
}

/// Rejects callers lacking the roles the innermost handler requires.
///
/// The requirement is the innermost handler's own
/// [`authorization`](AsyncRequestHandler::authorization), or failing that
/// the one this decorator was created with. Rejected requests never reach
/// the wrapped handler.
///
/// Built through [`authorization`], the caller is the [`Principal`] of the
/// scope that built the handler, read when a request is handled.
pub struct AuthorizationDecorator<R: AsyncRequest> {
    inner: Arc<dyn AsyncRequestHandler<R>>,
    caller: Caller,
    declared: Option<Authorization>,
}

impl<R: AsyncRequest> AuthorizationDecorator<R> {
    /// Guard `inner` for a fixed caller; `None` is anonymous.
    pub fn new(
        inner: Arc<dyn AsyncRequestHandler<R>>,
        principal: Option<Arc<Principal>>,
        declared: Option<Authorization>,
    ) -> Self {
        Self {
            inner,
            caller: Caller::Fixed(principal),
            declared,
        }
    }

    fn for_scope(
        inner: Arc<dyn AsyncRequestHandler<R>>,
        scope: WeakScope,
        declared: Option<Authorization>,
    ) -> Self {
        Self {
            inner,
            caller: Caller::Scope(scope),
            declared,
        }
    }

    fn principal(&self) -> Result<Option<Arc<Principal>>> {
        match &self.caller {
            Caller::Fixed(principal) => Ok(principal.clone()),
            Caller::Scope(scope) => scope.upgrade()?.try_resolve::<Principal>(),
        }
    }

    fn check(&self) -> Result<()> {
        let requirement = innermost(self.inner.as_ref())
            .authorization()
            .or(self.declared);
        let Some(requirement) = requirement else {
            return Ok(());
        };

        let caller = self.principal()?;
        let anonymous = Principal::anonymous();
        let principal = caller.as_deref().unwrap_or(&anonymous);
        if requirement.permits(principal) {
            return Ok(());
        }

        #[cfg(feature = "logging")]
        tracing::warn!(
            target: crate::logging::TARGET,
            request = std::any::type_name::<R>(),
            caller = principal.name().unwrap_or("<anonymous>"),
            "Authorization denied"
        );

        Err(DiError::Unauthorized {
            request: std::any::type_name::<R>(),
            required: requirement.required().iter().map(ToString::to_string).collect(),
        })
    }
}

#[async_trait]
impl<R: AsyncRequest> AsyncRequestHandler<R> for AuthorizationDecorator<R> {
    async fn handle(&self, request: R) -> Result<R::Response> {
        self.check()?;
        self.inner.handle(request).await
    }

    fn inner_handler(&self) -> Option<&dyn AsyncRequestHandler<R>> {
        Some(self.inner.as_ref())
    }
}

/// Decorator enforcing whatever the innermost handler for `R` requires.
pub fn authorization<R: AsyncRequest>() -> Decorator<dyn AsyncRequestHandler<R>> {
    authorization_with::<R>(None)
}

/// Like [`authorization`], with a requirement to fall back on when the
/// innermost handler declares none.
///
/// Only scoped handlers can be guarded: built outside a scope there is no
/// caller to check, and realization fails with `ScopeRequired`.
pub fn authorization_with<R: AsyncRequest>(
    declared: Option<Authorization>,
) -> Decorator<dyn AsyncRequestHandler<R>> {
    Decorator::from_resolver(
        move |inner: Arc<dyn AsyncRequestHandler<R>>, resolver: &Resolver<'_>| {
            let Some(scope) = resolver.weak_scope() else {
                return Err(DiError::ScopeRequired {
                    type_name: std::any::type_name::<AuthorizationDecorator<R>>(),
                });
            };
            Ok(Arc::new(AuthorizationDecorator::for_scope(inner, scope, declared))
                as Arc<dyn AsyncRequestHandler<R>>)
        },
    )
    .named("authorization")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::mediator::Mediator;
    use crate::provider::Lifetime;
    use crate::registration::RegistrationHandle;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Report;

    impl AsyncRequest for Report {
        type Response = &'static str;
    }

    struct ReportHandler {
        ran: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AsyncRequestHandler<Report> for ReportHandler {
        async fn handle(&self, _request: Report) -> Result<&'static str> {
            self.ran.store(true, Ordering::SeqCst);
            Ok("report")
        }

        fn authorization(&self) -> Option<Authorization> {
            Some(Authorization::roles(&["Admin"]))
        }
    }

    struct Failing;

    #[async_trait]
    impl AsyncRequestHandler<Report> for Failing {
        async fn handle(&self, _request: Report) -> Result<&'static str> {
            Err(DiError::handler::<Report>("boom"))
        }
    }

    type Lines = Arc<Mutex<Vec<String>>>;

    fn capture(container: &Container) -> Lines {
        let lines: Lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = Arc::clone(&lines);
        container
            .singleton(LogSink::new(move |line: &str| {
                sink_lines.lock().unwrap().push(line.to_string())
            }))
            .unwrap();
        lines
    }

    fn report_handler(
        container: &Container,
        ran: &Arc<AtomicBool>,
    ) -> RegistrationHandle<dyn AsyncRequestHandler<Report>> {
        let ran = Arc::clone(ran);
        container
            .register_factory::<dyn AsyncRequestHandler<Report>, _>(
                Lifetime::Scoped,
                move |_: &Resolver<'_>| {
                    Ok(Arc::new(ReportHandler {
                        ran: Arc::clone(&ran),
                    }) as Arc<dyn AsyncRequestHandler<Report>>)
                },
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_unauthorized_caller_never_reaches_handler() {
        let container = Container::new();
        let ran = Arc::new(AtomicBool::new(false));
        report_handler(&container, &ran).decorate_with(authorization::<Report>());

        let scope = container.create_scope().unwrap();
        scope.provide(Principal::authenticated("mallory")).unwrap();

        let err = Mediator.handle_async(&scope, Report).await.unwrap_err();
        match &err {
            DiError::Unauthorized { required, .. } => {
                assert_eq!(required, &vec!["Admin".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthorized);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_anonymous_caller_rejected() {
        let container = Container::new();
        let ran = Arc::new(AtomicBool::new(false));
        report_handler(&container, &ran).decorate_with(authorization::<Report>());

        let scope = container.create_scope().unwrap();
        let err = Mediator.handle_async(&scope, Report).await.unwrap_err();
        assert!(matches!(err, DiError::Unauthorized { .. }));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_authorized_caller_through_logging_chain() {
        let container = Container::new();
        let lines = capture(&container);
        let ran = Arc::new(AtomicBool::new(false));
        report_handler(&container, &ran)
            .decorate_with(logging::<Report>())
            .decorate_with(authorization::<Report>());

        let scope = container.create_scope().unwrap();
        scope
            .provide(Principal::authenticated("alice").with_role("Admin"))
            .unwrap();

        // authorization walks past the logging link to find the requirement
        assert_eq!(Mediator.handle_async(&scope, Report).await.unwrap(), "report");
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(
            *lines.lock().unwrap(),
            vec!["entering Report", "completed Report"]
        );
    }

    #[tokio::test]
    async fn test_unauthorized_passes_through_outer_logging() {
        let container = Container::new();
        let lines = capture(&container);
        let ran = Arc::new(AtomicBool::new(false));
        report_handler(&container, &ran)
            .decorate_with(authorization::<Report>())
            .decorate_with(logging::<Report>());

        let scope = container.create_scope().unwrap();
        let err = Mediator.handle_async(&scope, Report).await.unwrap_err();
        assert!(matches!(err, DiError::Unauthorized { .. }));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(*lines.lock().unwrap(), vec!["entering Report"]);
    }

    #[tokio::test]
    async fn test_principal_read_when_request_is_handled() {
        let container = Container::new();
        let ran = Arc::new(AtomicBool::new(false));
        report_handler(&container, &ran).decorate_with(authorization::<Report>());

        let scope = container.create_scope().unwrap();
        let err = Mediator.handle_async(&scope, Report).await.unwrap_err();
        assert!(matches!(err, DiError::Unauthorized { .. }));
        assert!(scope.is_realized::<dyn AsyncRequestHandler<Report>>());

        // the cached chain sees a caller provided after it was built
        scope
            .provide(Principal::authenticated("alice").with_role("Admin"))
            .unwrap();
        assert_eq!(Mediator.handle_async(&scope, Report).await.unwrap(), "report");
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_principal_registered_as_scoped_service() {
        let container = Container::new();
        let ran = Arc::new(AtomicBool::new(false));
        report_handler(&container, &ran).decorate_with(authorization::<Report>());
        container
            .register_factory::<Principal, _>(Lifetime::Scoped, |_: &Resolver<'_>| {
                Ok(Arc::new(Principal::authenticated("svc").with_role("Admin")))
            })
            .unwrap();

        let scope = container.create_scope().unwrap();
        assert_eq!(Mediator.handle_async(&scope, Report).await.unwrap(), "report");
    }

    #[tokio::test]
    async fn test_singleton_handler_cannot_be_authorized() {
        let container = Container::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        container
            .register_factory::<dyn AsyncRequestHandler<Report>, _>(
                Lifetime::Singleton,
                move |_: &Resolver<'_>| {
                    Ok(Arc::new(ReportHandler {
                        ran: Arc::clone(&flag),
                    }) as Arc<dyn AsyncRequestHandler<Report>>)
                },
            )
            .unwrap()
            .decorate_with(authorization::<Report>());

        let scope = container.create_scope().unwrap();
        scope
            .provide(Principal::authenticated("root").with_role("Admin"))
            .unwrap();

        // a misconfiguration, not a denial
        let err = Mediator.handle_async(&scope, Report).await.unwrap_err();
        assert!(matches!(err, DiError::DependencyResolution { .. }));
        assert!(matches!(err.root_cause(), DiError::ScopeRequired { .. }));
        assert!(err.is_configuration());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_declared_requirement_used_when_handler_has_none() {
        let container = Container::new();
        container
            .register_factory::<dyn AsyncRequestHandler<Report>, _>(
                Lifetime::Scoped,
                |_: &Resolver<'_>| Ok(Arc::new(Failing) as Arc<dyn AsyncRequestHandler<Report>>),
            )
            .unwrap()
            .decorate_with(authorization_with::<Report>(Some(Authorization::roles(&[
                "Auditor",
            ]))));

        let scope = container.create_scope().unwrap();
        let err = Mediator.handle_async(&scope, Report).await.unwrap_err();
        assert!(matches!(err, DiError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_logging_skips_completion_on_failure() {
        let container = Container::new();
        let lines = capture(&container);
        container
            .register_factory::<dyn AsyncRequestHandler<Report>, _>(
                Lifetime::Scoped,
                |_: &Resolver<'_>| Ok(Arc::new(Failing) as Arc<dyn AsyncRequestHandler<Report>>),
            )
            .unwrap()
            .decorate_with(logging::<Report>());

        let scope = container.create_scope().unwrap();
        let err = Mediator.handle_async(&scope, Report).await.unwrap_err();
        assert!(matches!(err, DiError::Handler { .. }));
        assert_eq!(*lines.lock().unwrap(), vec!["entering Report"]);
    }

    #[test]
    fn test_innermost_walks_chain() {
        let ran = Arc::new(AtomicBool::new(false));
        let base: Arc<dyn AsyncRequestHandler<Report>> = Arc::new(ReportHandler { ran });
        let logged: Arc<dyn AsyncRequestHandler<Report>> =
            Arc::new(LoggingDecorator::new(Arc::clone(&base), LogSink::discard()));
        let guarded = AuthorizationDecorator::new(logged, None, None);

        let bottom = innermost::<Report>(&guarded);
        assert_eq!(bottom.authorization(), Some(Authorization::roles(&["Admin"])));
        assert!(bottom.inner_handler().is_none());
    }

    #[test]
    fn test_permits() {
        let admin = Authorization::roles(&["Admin", "Auditor"]);
        assert!(admin.permits(&Principal::authenticated("a").with_role("Auditor")));
        assert!(!admin.permits(&Principal::authenticated("b").with_role("Guest")));
        // roles without an identity do not count
        assert!(!admin.permits(&Principal::anonymous().with_role("Admin")));
        assert!(Authorization::roles(&[]).permits(&Principal::anonymous()));
    }

    #[test]
    fn test_from_markers() {
        assert_eq!(Authorization::from_markers(&[Marker::Log]), None);
        assert_eq!(
            Authorization::from_markers(&[Marker::Log, Marker::Authorize(&["Admin"])]),
            Some(Authorization::roles(&["Admin"]))
        );
    }
}
