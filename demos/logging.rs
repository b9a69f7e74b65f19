//! Container events through `tracing`
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```

use dispatch_injector::prelude::*;
use dispatch_injector::logging;

struct Database {
    url: String,
}

struct UserRepository {
    db: Arc<Database>,
}

impl Construct for UserRepository {
    fn constructors() -> Constructors<Self> {
        Constructors::new().with(|db: Arc<Database>| UserRepository { db })
    }
}

struct CountUsers;

impl AsyncRequest for CountUsers {
    type Response = usize;
}

struct CountUsersHandler {
    users: Arc<UserRepository>,
}

impl Construct for CountUsersHandler {
    fn constructors() -> Constructors<Self> {
        Constructors::new().with(|users: Arc<UserRepository>| CountUsersHandler { users })
    }
}

impl HandlerMarkers for CountUsersHandler {
    const MARKERS: &'static [Marker] = &[Marker::Log];
}

#[async_trait]
impl AsyncRequestHandler<CountUsers> for CountUsersHandler {
    async fn handle(&self, _request: CountUsers) -> Result<usize> {
        Ok(self.users.db.url.len())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // debug events from the container, info lines from decorated requests
    logging::builder().container_only().init();

    println!("=== Dispatch Injector Logging Demo ===\n");

    // Registered service, Adding decorator, Wired handler
    let bootstrap = Bootstrap::new()
        .core(LogSink::tracing())?
        .handler::<CountUsers, CountUsersHandler>()?;
    let container = bootstrap.container();
    container.singleton(Database {
        url: "postgres://localhost/app".into(),
    })?;
    container.register_type::<UserRepository>(Lifetime::Scoped)?;
    let container = bootstrap.build();

    // Creating request scope, Realized service instance, entering/completed
    let request = RequestId::new(1);
    let scope = container.scope_for(request)?;
    let users = Mediator.handle_async(&scope, CountUsers).await?;
    println!("counted {users} users");

    // No registration found
    assert!(scope.try_resolve::<String>()?.is_none());

    // Scoped services cannot be reached from the root
    if let Err(err) = container.resolve::<UserRepository>() {
        println!("as expected: {err}");
    }

    // Ending request, Container disposed
    container.end_request(request)?;
    container.dispose()?;

    println!("\n=== Demo Complete ===");
    println!("Tip: Use --features logging-json for production (JSON output)");
    println!("     Use --features logging-pretty for development (colorful output)");
    Ok(())
}
