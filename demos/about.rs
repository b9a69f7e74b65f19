//! The about page of a small web app, minus the web framework.
//!
//! A controller asks the mediator for the about message. The handler is
//! logged, depends on a scoped service, and that service is disposed when
//! the request ends. A second request shows the admin-only handler turning
//! away an anonymous caller.
//!
//! ```bash
//! cargo run --example about
//! ```

use dispatch_injector::prelude::*;
use dispatch_injector::{BoxError, ContainerRef};

trait MessageService: Dispose {
    fn say_something(&self) -> String;
}

struct Service {
    sink: Arc<LogSink>,
}

impl Construct for Service {
    fn constructors() -> Constructors<Self> {
        Constructors::new().with(|sink: Arc<LogSink>| Service { sink })
    }
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

struct ResetSiteCommand;

impl AsyncRequest for ResetSiteCommand {
    type Response = Unit;
}

struct ResetSiteCommandHandler;

impl Construct for ResetSiteCommandHandler {
    fn constructors() -> Constructors<Self> {
        Constructors::new().with(|()| ResetSiteCommandHandler)
    }
}

impl HandlerMarkers for ResetSiteCommandHandler {
    const MARKERS: &'static [Marker] = &[Marker::Log, Marker::Authorize(&["Admin"])];
}

#[async_trait]
impl AsyncRequestHandler<ResetSiteCommand> for ResetSiteCommandHandler {
    async fn handle(&self, _request: ResetSiteCommand) -> Result<Unit> {
        Ok(Unit::default())
    }
}

struct HomeController {
    mediator: Arc<Mediator>,
}

impl Construct for HomeController {
    fn constructors() -> Constructors<Self> {
        Constructors::new().with(|mediator: Arc<Mediator>| HomeController { mediator })
    }
}

impl HomeController {
    async fn about(&self, scope: &ScopedContainer) -> Result<String> {
        self.mediator.handle_async(scope, GetAboutMessageCommand).await
    }

    async fn reset(&self, scope: &ScopedContainer) -> Result<Unit> {
        self.mediator.handle_async(scope, ResetSiteCommand).await
    }
}

fn build() -> Result<Container> {
    let bootstrap = Bootstrap::new()
        .core(LogSink::new(|line: &str| println!("  [log] {line}")))?
        .components(&[
            component!(handler GetAboutMessageCommand => GetAboutMessageCommandHandler),
            component!(handler ResetSiteCommand => ResetSiteCommandHandler),
            component!(endpoint HomeController),
        ])?;
    bootstrap
        .container()
        .register_as::<dyn MessageService, Service, _>(Lifetime::Scoped, |s| {
            s as Arc<dyn MessageService>
        })?
        .disposable();
    Ok(bootstrap.build())
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== About Page Demo ===\n");

    let container = build()?;

    // What the host does around each HTTP request.
    let host = container.resolve::<ContainerRef>()?;

    println!("GET /home/about");
    let request = RequestId::new(1);
    let scope = host.scope_for(request)?;
    let controller = scope.resolve::<HomeController>()?;
    println!("  -> {}", controller.about(&scope).await?);
    container.end_request(request)?;

    println!("\nPOST /home/reset (anonymous)");
    let request = RequestId::new(2);
    let scope = host.scope_for(request)?;
    let controller = scope.resolve::<HomeController>()?;
    match controller.reset(&scope).await {
        Ok(_) => println!("  -> reset"),
        Err(err) => println!("  -> refused: {err}"),
    }
    container.end_request(request)?;

    println!("\nPOST /home/reset (admin)");
    let request = RequestId::new(3);
    let scope = host.scope_for(request)?;
    scope.provide(Principal::authenticated("alice").with_role("Admin"))?;
    let controller = scope.resolve::<HomeController>()?;
    controller.reset(&scope).await?;
    println!("  -> reset");
    container.end_request(request)?;

    container.dispose()?;
    println!("\n=== Demo Complete ===");
    Ok(())
}
