//! switchyard - HTTP server toolkit built around a table-driven request router
//!
//! Every accepted descriptor carries exactly one request/response exchange.
//! The router matches the request start-line against its tables and hands the
//! socket to exactly one responder:
//!
//! 1. [static routes](StaticRoute): pre-rendered bytes keyed by the exact
//!    start-line, case-sensitive first, then case-insensitive;
//! 2. [dynamic routes](DynamicRoute): compiled [route paths](RoutePath) with
//!    parameters, catch-alls and fragments, run through the
//!    [middleware](Middleware) chain and a [handler](Handler);
//! 3. [route groups](RouteGroup), in registration order;
//! 4. the [not-found responder](NotFoundResponder);
//! 5. the [error responder](ErrorResponder) when any step fails.
//!
//! The descriptor is then shut down and closed exactly once, whichever path
//! was taken.
//!
//! # Route paths
//!
//! | Path | Matches | Parameters |
//! |------|---------|------------|
//! | `users/:id` | `/users/42` | `["42"]` |
//! | `files/**` | `/files/a/b/c` | `["a", "b", "c"]` |
//! | `{name}.zip` | `/archive.zip` | `["archive"]` |
//! | `search?debug` | `/search?page=2&debug` | `[]` |
//!
//! Literal routes always win over parameterized ones: `a/b` is tried before
//! `a/:x`, whatever the registration order.
//!
//! # Examples
//!
//! ```no_run
//! use switchyard::{sync_handler, DynamicRoute, Method, Router, Server, StaticRoute};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Router::builder()
//!         .static_route(
//!             StaticRoute::new(Method::Get, "/html")?
//!                 .content_type("text/html")
//!                 .body("<h1>Hello world!</h1>"),
//!         )
//!         .route(DynamicRoute::parse(
//!             Method::Get,
//!             "users/:id",
//!             sync_handler(|_, resp| {
//!                 let id = resp.param_str(0).unwrap_or_default().to_string();
//!                 resp.body(format!("user #{id}"));
//!                 Ok(())
//!             }),
//!         )?)
//!         .build();
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await?)
//!         .router(router)
//!         .build()
//!         .run_until_signal()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub(crate) mod io {
    pub(crate) mod buffer;
    pub(crate) mod socket;
}
pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod route {
    pub(crate) mod path;
}
pub(crate) mod responder {
    pub(crate) mod dynamic;
    pub(crate) mod fallback;
    pub(crate) mod group;
    pub(crate) mod static_route;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;
pub(crate) mod router;

pub use crate::{
    errors::{
        HandlerError, MiddlewareError, RequestParseError, ResponderError, RoutePathError,
        RouterError, ServerError, SocketError,
    },
    http::{
        query,
        request::{Request, StartLine, MAX_PATH_SEGMENTS, START_LINE_CAPACITY},
        response::{
            write::{BodyWriter, WriteBuffer},
            Body, BodySender, Parameters, Response, ResponseTemplate,
        },
        types::{Method, StatusCode, Version, HTTP_DATE_LEN},
    },
    io::{
        buffer::InlineBytes,
        socket::{read_buffer, write_buffer, write_buffers, ConnectionGuard, Socket},
    },
    responder::{
        dynamic::{
            async_handler, sync_handler, sync_middleware, AsyncHandler, DynamicRoute, Flow,
            Handler, Middleware, SyncHandler, SyncMiddleware,
        },
        fallback::{DynamicFallback, ErrorResponder, NotFoundResponder},
        group::RouteGroup,
        static_route::{StaticResponse, StaticRoute},
    },
    route::path::{PathComponent, RoutePath, LITERAL_CAPACITY},
    router::{Router, RouterBuilder, Tier},
    server::server_impl::{Server, ServerBuilder, ShutdownHandle},
};
