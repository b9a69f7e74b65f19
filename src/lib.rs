//! # Dispatch Injector - Scoped DI with a Decorated Mediator
//!
//! An in-process dependency injection container paired with a
//! request/response mediator. Handlers are ordinary services: they get their
//! dependencies through constructor injection, live per request, and can be
//! wrapped in logging and authorization decorators declared next to them.
//!
//! ## Features
//!
//! - **Lock-free** - registrations and instance caches live in `DashMap`s
//! - **Constructor inference** - the widest registered constructor wins
//! - **Lifetimes** - lazy singletons, and scoped instances per request
//! - **Decorators** - ordered wrappers applied when an instance is built
//! - **Open generics** - one definition can serve every request type
//! - **Disposal** - best-effort, in reverse creation order
//! - **Observable** - optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use dispatch_injector::prelude::*;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self, name: &str) -> String;
//! }
//!
//! struct English;
//! impl Greeter for English {
//!     fn greet(&self, name: &str) -> String {
//!         format!("hello {name}")
//!     }
//! }
//! impl Construct for English {
//!     fn constructors() -> Constructors<Self> {
//!         Constructors::new().with(|()| English)
//!     }
//! }
//!
//! struct Greet(String);
//! impl AsyncRequest for Greet {
//!     type Response = String;
//! }
//!
//! struct GreetHandler {
//!     greeter: Arc<dyn Greeter>,
//! }
//! impl Construct for GreetHandler {
//!     fn constructors() -> Constructors<Self> {
//!         Constructors::new().with(|greeter: Arc<dyn Greeter>| GreetHandler { greeter })
//!     }
//! }
//! impl HandlerMarkers for GreetHandler {
//!     const MARKERS: &'static [Marker] = &[Marker::Log];
//! }
//!
//! #[async_trait]
//! impl AsyncRequestHandler<Greet> for GreetHandler {
//!     async fn handle(&self, request: Greet) -> Result<String> {
//!         Ok(self.greeter.greet(&request.0))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let bootstrap = Bootstrap::new()
//!     .core(LogSink::discard())?
//!     .handler::<Greet, GreetHandler>()?;
//! bootstrap
//!     .container()
//!     .register_as::<dyn Greeter, English, _>(Lifetime::Singleton, |g| g as Arc<dyn Greeter>)?;
//! let container = bootstrap.build();
//!
//! let request = RequestId::new(1);
//! let scope = container.scope_for(request)?;
//! let reply = Mediator.handle_async(&scope, Greet("world".into())).await?;
//! assert_eq!(reply, "hello world");
//! container.end_request(request)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Service Lifetimes
//!
//! - [`Lifetime::Singleton`] - built once on first resolution and shared by
//!   every scope.
//! - [`Lifetime::Scoped`] - built once per [`ScopedContainer`]. Resolving a
//!   scoped service from the root container, or from inside a singleton,
//!   fails with [`DiError::ScopeRequired`].
//!
//! ## Scopes
//!
//! A scope is one logical request. Values known only to the request, such
//! as the caller's [`Principal`], are [`provide`](ScopedContainer::provide)d
//! to the scope and take precedence over registrations. Ending the request
//! disposes what the scope built.
//!
//! ```rust
//! use dispatch_injector::{Container, Lifetime, Principal, RequestId};
//!
//! struct Session;
//!
//! let container = Container::new();
//! container
//!     .register_factory::<Session, _>(Lifetime::Scoped, |_| Ok(std::sync::Arc::new(Session)))
//!     .unwrap();
//!
//! let scope = container.scope_for(RequestId::new(7)).unwrap();
//! scope.provide(Principal::authenticated("alice")).unwrap();
//! assert!(scope.resolve::<Session>().is_ok());
//! assert!(container.resolve::<Session>().is_err());
//!
//! container.end_request(RequestId::new(7)).unwrap();
//! ```
//!
//! ## Logging
//!
//! With the default `logging` feature the container emits `tracing` events
//! under the `dispatch_injector` target. See [`logging`](crate::logging) for
//! subscriber setup.

mod bootstrap;
mod container;
mod decorators;
mod error;
mod factory;
mod generic;
mod key;
#[cfg(feature = "logging")]
pub mod logging;
mod mediator;
mod provider;
mod registration;
mod resolver;
mod scope;
mod storage;

pub use bootstrap::*;
pub use container::*;
pub use decorators::*;
pub use error::*;
pub use factory::*;
pub use generic::*;
pub use key::*;
pub use mediator::*;
pub use provider::*;
pub use registration::*;
pub use resolver::*;
pub use scope::*;

pub use async_trait::async_trait;

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AsyncCommand, AsyncRequest, AsyncRequestHandler, Bootstrap, Command, Construct,
        Constructors, Container, DiError, Dispose, HandlerMarkers, Injectable, Lifetime, LogSink,
        Marker, Mediator, Principal, Request, RequestHandler, RequestId, Resolve, Result,
        ScopedContainer, Unit, async_trait, component,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Version;

    impl Request for Version {
        type Response = &'static str;
    }

    struct VersionHandler;

    impl RequestHandler<Version> for VersionHandler {
        fn handle(&self, _request: Version) -> Result<&'static str> {
            Ok("1.0")
        }
    }

    impl Construct for VersionHandler {
        fn constructors() -> Constructors<Self> {
            Constructors::new().with(|()| VersionHandler)
        }
    }

    struct Save;

    impl AsyncRequest for Save {
        type Response = Unit;
    }

    struct SaveHandler {
        saved: Arc<AtomicU32>,
    }

    impl Construct for SaveHandler {
        fn constructors() -> Constructors<Self> {
            Constructors::new().with(|saved: Arc<AtomicU32>| SaveHandler { saved })
        }
    }

    impl HandlerMarkers for SaveHandler {}

    #[async_trait]
    impl AsyncRequestHandler<Save> for SaveHandler {
        async fn handle(&self, _request: Save) -> Result<Unit> {
            let id = self.saved.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Unit {
                id: Some(u64::from(id)),
            })
        }
    }

    fn app() -> Container {
        let bootstrap = Bootstrap::new()
            .core(LogSink::discard())
            .unwrap()
            .components(&[
                component!(sync Version => VersionHandler),
                component!(handler Save => SaveHandler),
            ])
            .unwrap();
        bootstrap.container().singleton(AtomicU32::new(0)).unwrap();
        bootstrap.build()
    }

    #[test]
    fn test_sync_dispatch_through_components() {
        let container = app();
        let scope = container.create_scope().unwrap();
        assert_eq!(Mediator.handle(&scope, Version).unwrap(), "1.0");
    }

    #[tokio::test]
    async fn test_command_reports_created_id() {
        let container = app();
        let scope = container.create_scope().unwrap();

        let first = Mediator.handle_async(&scope, Save).await.unwrap();
        let second = Mediator.handle_async(&scope, Save).await.unwrap();
        assert_eq!(first.id, Some(1));
        assert_eq!(second.id, Some(2));
    }

    #[test]
    fn test_locked_after_build() {
        let container = app();
        assert!(container.is_locked());
        let err = container.singleton(String::from("late")).unwrap_err();
        assert!(matches!(err, DiError::Locked));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_singletons() {
        let container = app();

        let tasks: Vec<_> = (0..8u64)
            .map(|n| {
                let container = container.clone();
                tokio::spawn(async move {
                    let request = RequestId::new(n);
                    let scope = container.scope_for(request).unwrap();
                    let unit = Mediator.handle_async(&scope, Save).await.unwrap();
                    container.end_request(request).unwrap();
                    unit
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.extend(task.await.unwrap().id);
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
        assert_eq!(container.open_requests(), 0);
    }
}
