//! The dispatch table and the order it is consulted in.

use crate::{
    errors::{ResponderError, RouterError},
    http::types::Method,
    io::socket::Socket,
    responder::{
        dynamic::{DynamicResponders, DynamicRoute, Handler, Middleware, SharedMiddleware},
        fallback::{ErrorResponder, NotFoundResponder},
        group::RouteGroup,
        static_route::{StaticResponders, StaticRoute},
    },
    server::connection::{serve, Worker},
};
use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::{debug, warn};

/// Which responder answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Static,
    Dynamic,
    Group,
    NotFound,
    /// The error responder wrote a response for a recoverable failure.
    Error,
}

#[derive(Debug, Clone, Default)]
struct RouteTables {
    statics: StaticResponders,
    dynamics: DynamicResponders,
    groups: Vec<Arc<RouteGroup>>,
}

#[derive(Debug)]
enum Tables {
    Frozen(Arc<RouteTables>),
    /// Copy-on-write: writers swap in a new snapshot, readers clone the
    /// current `Arc` and never hold the lock across an await.
    Mutable(RwLock<Arc<RouteTables>>),
}

/// Matches requests to responders.
///
/// Consulted in this order, first match wins:
/// 1. static routes, case-sensitive, then case-insensitive;
/// 2. dynamic routes, case-sensitive, then case-insensitive;
/// 3. route groups, in registration order;
/// 4. the not-found responder.
///
/// Any recoverable failure on the way goes to the error responder. Socket
/// failures end the exchange without a response.
///
/// # Examples
///
/// ```
/// use switchyard::{sync_handler, DynamicRoute, Method, Router, StaticRoute, StatusCode};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let router = Router::builder()
///     .static_route(StaticRoute::get("/")?.body("home"))
///     .route(DynamicRoute::parse(
///         Method::Post,
///         "items",
///         sync_handler(|req, resp| {
///             resp.status(StatusCode::Created).body(req.body());
///             Ok(())
///         }),
///     )?)
///     .mutable(true)
///     .build();
///
/// router.insert_static(StaticRoute::get("/about")?.body("about"))?;
/// assert_eq!(router.route_count(), 3);
///
/// assert_eq!(router.remove(Method::Get, "/about")?, 1);
/// assert_eq!(router.route_count(), 2);
/// # Ok(())
/// # }
/// ```
pub struct Router {
    tables: Tables,
    middleware: Vec<SharedMiddleware>,
    not_found: NotFoundResponder,
    error: ErrorResponder,
}

impl Router {
    #[inline]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    #[inline]
    fn snapshot(&self) -> Arc<RouteTables> {
        match &self.tables {
            Tables::Frozen(tables) => tables.clone(),
            Tables::Mutable(lock) => lock.read().unwrap_or_else(PoisonError::into_inner).clone(),
        }
    }

    fn update<T, F>(&self, f: F) -> Result<T, RouterError>
    where
        F: FnOnce(&mut RouteTables) -> T,
    {
        let Tables::Mutable(lock) = &self.tables else {
            return Err(RouterError::Immutable);
        };

        let mut current = lock.write().unwrap_or_else(PoisonError::into_inner);
        Ok(f(Arc::make_mut(&mut current)))
    }

    #[inline]
    pub fn is_mutable(&self) -> bool {
        matches!(self.tables, Tables::Mutable(_))
    }

    /// Registers a static route at runtime, replacing one with the same
    /// start-line. Requires [`mutable(true)`](RouterBuilder::mutable).
    pub fn insert_static(&self, route: StaticRoute) -> Result<(), RouterError> {
        self.update(|tables| {
            tables.statics.insert(route);
        })
    }

    /// Registers a dynamic route at runtime, after the existing routes of
    /// its bucket. Requires [`mutable(true)`](RouterBuilder::mutable).
    pub fn insert_dynamic(&self, route: DynamicRoute) -> Result<(), RouterError> {
        self.update(|tables| tables.dynamics.insert(route))
    }

    /// Removes the top-level static and dynamic routes registered for
    /// `method` and `path`; returns how many were removed. Groups are left
    /// untouched.
    pub fn remove(&self, method: Method, path: &str) -> Result<usize, RouterError> {
        self.update(|tables| tables.statics.remove(method, path) + tables.dynamics.remove(method, path))
    }

    /// Number of routes, those in groups included.
    pub fn route_count(&self) -> usize {
        let tables = self.snapshot();
        tables.statics.len()
            + tables.dynamics.len()
            + tables.groups.iter().map(|group| group.len()).sum::<usize>()
    }

    /// Serves one exchange on `socket` with freshly allocated state, then
    /// shuts the socket down and closes it.
    ///
    /// The server reuses per-worker state instead; this is for hosts that
    /// run their own accept loop.
    pub async fn respond<S: Socket>(&self, socket: S) -> Result<Tier, ResponderError> {
        let mut worker = Worker::default();
        serve(self, &mut worker, socket).await
    }

    /// Loads the request and writes exactly one response, or none when the
    /// socket failed or the error responder is disabled.
    pub(crate) async fn dispatch<S: Socket>(
        &self,
        socket: &mut S,
        worker: &mut Worker,
    ) -> Result<Tier, ResponderError> {
        let error = match self.route(socket, worker).await {
            Ok(tier) => {
                debug!(
                    start_line = %String::from_utf8_lossy(worker.request.start_line()),
                    tier = ?tier,
                    "dispatched"
                );
                return Ok(tier);
            }
            Err(error) if error.is_fatal() => {
                debug!(error = %error, "connection failed");
                return Err(error);
            }
            Err(error) => error,
        };

        warn!(
            start_line = %String::from_utf8_lossy(worker.request.start_line()),
            error = %error,
            "request failed"
        );

        if !self.error.is_enabled() {
            return Err(error);
        }
        self.error.respond(socket, worker, &error).await?;
        Ok(Tier::Error)
    }

    async fn route<S: Socket>(
        &self,
        socket: &mut S,
        worker: &mut Worker,
    ) -> Result<Tier, ResponderError> {
        worker
            .request
            .load(socket, worker.conn_limits.socket_read_timeout)
            .await?;

        let tables = self.snapshot();
        let write_timeout = worker.conn_limits.socket_write_timeout;

        for case_sensitive in [true, false] {
            if let Some(route) = tables.statics.get(&worker.request, case_sensitive) {
                route.respond(socket, write_timeout).await?;
                return Ok(Tier::Static);
            }
        }

        for case_sensitive in [true, false] {
            if let Some(route) = tables.dynamics.find(&worker.request, case_sensitive)? {
                route
                    .respond(socket, worker, &[self.middleware.as_slice()])
                    .await?;
                return Ok(Tier::Dynamic);
            }
        }

        for group in &tables.groups {
            if group.respond(socket, worker, &self.middleware).await? {
                return Ok(Tier::Group);
            }
        }

        self.not_found.respond(socket, worker).await?;
        Ok(Tier::NotFound)
    }
}

impl Default for Router {
    fn default() -> Self {
        RouterBuilder::default().build()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("tables", &self.tables)
            .field("middleware", &self.middleware.len())
            .field("not_found", &self.not_found)
            .field("error", &self.error)
            .finish()
    }
}

//

/// Builder for [`Router`].
///
/// Static routes registered twice for the same start-line keep the last
/// registration; dynamic routes are tried in registration order within
/// their bucket, so the first one wins.
#[derive(Default)]
pub struct RouterBuilder {
    tables: RouteTables,
    middleware: Vec<SharedMiddleware>,
    not_found: NotFoundResponder,
    error: ErrorResponder,
    mutable: bool,
}

impl RouterBuilder {
    pub fn static_route(mut self, route: StaticRoute) -> Self {
        self.tables.statics.insert(route);
        self
    }

    pub fn route(mut self, route: DynamicRoute) -> Self {
        self.tables.dynamics.insert(route);
        self
    }

    /// Global middleware, run for every dynamic route before any group
    /// middleware.
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn group(mut self, group: RouteGroup) -> Self {
        self.tables.groups.push(Arc::new(group));
        self
    }

    pub fn not_found(mut self, responder: NotFoundResponder) -> Self {
        self.not_found = responder;
        self
    }

    /// Shorthand for a dynamic [`NotFoundResponder`].
    pub fn not_found_handler<H: Handler>(mut self, handler: H) -> Self {
        self.not_found = self.not_found.handler(handler);
        self
    }

    pub fn error_responder(mut self, responder: ErrorResponder) -> Self {
        self.error = responder;
        self
    }

    /// Allows registering and removing routes while serving
    /// (default: `false`).
    pub fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    pub fn build(self) -> Router {
        let tables = Arc::new(self.tables);

        Router {
            tables: match self.mutable {
                true => Tables::Mutable(RwLock::new(tables)),
                false => Tables::Frozen(tables),
            },
            middleware: self.middleware,
            not_found: self.not_found,
            error: self.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::{HandlerError, RoutePathError},
        sync_handler, sync_middleware,
        tools::*,
        Flow, StatusCode,
    };

    fn tagged(method: Method, path: &str, tag: &'static str) -> DynamicRoute {
        DynamicRoute::parse(
            method,
            path,
            sync_handler(move |_, resp| {
                resp.body(tag);
                Ok(())
            }),
        )
        .unwrap()
    }

    async fn send(router: &Router, raw: &str) -> (Result<Tier, ResponderError>, String) {
        let socket = MockSocket::new(raw);
        let stats = socket.stats();
        let result = router.respond(socket).await;

        assert_eq!(stats.shutdowns(), 1);
        assert_eq!(stats.closes(), 1);
        (result, String::from_utf8(stats.written()).unwrap())
    }

    fn body(written: &str) -> &str {
        written.split_once("\r\n\r\n").map_or("", |(_, body)| body)
    }

    #[tokio::test]
    async fn dispatch_order() {
        let router = Router::builder()
            .static_route(StaticRoute::get("/a/b").unwrap().body("static"))
            .static_route(StaticRoute::get("/Loose").unwrap().case_insensitive().unwrap().body("static-ci"))
            .route(tagged(Method::Get, "a/b", "dynamic-shadowed"))
            .route(tagged(Method::Get, "a/:x", "dynamic"))
            .group(
                RouteGroup::new("a")
                    .unwrap()
                    .route(tagged(Method::Get, "c/:y", "group"))
                    .unwrap(),
            )
            .build();

        #[rustfmt::skip]
        let cases = [
            ("GET /a/b HTTP/1.1",    Tier::Static,   "static"),
            ("GET /LOOSE HTTP/1.1",  Tier::Static,   "static-ci"),
            ("GET /a/z HTTP/1.1",    Tier::Dynamic,  "dynamic"),
            ("GET /a/c/1 HTTP/1.1",  Tier::Group,    "group"),
            ("GET /z HTTP/1.1",      Tier::NotFound, "not found"),
        ];

        for (line, tier, expected) in cases {
            let (result, written) = send(&router, &format!("{line}\r\n\r\n")).await;
            assert_eq!(result.unwrap(), tier, "{line}");
            assert_eq!(body(&written), expected, "{line}");
        }
    }

    #[tokio::test]
    async fn duplicate_registrations() {
        let router = Router::builder()
            .static_route(StaticRoute::get("/dup").unwrap().body("first"))
            .static_route(StaticRoute::get("/dup").unwrap().body("second"))
            .route(tagged(Method::Get, "x/:id", "first"))
            .route(tagged(Method::Get, "x/:name", "second"))
            .build();

        let (_, written) = send(&router, "GET /dup HTTP/1.1\r\n\r\n").await;
        assert_eq!(body(&written), "second");

        let (_, written) = send(&router, "GET /x/1 HTTP/1.1\r\n\r\n").await;
        assert_eq!(body(&written), "first");
    }

    #[tokio::test]
    async fn errors_go_to_error_responder() {
        let router = Router::builder()
            .route(DynamicRoute::parse(
                Method::Get,
                "fail",
                sync_handler(|_, resp| {
                    resp.status(StatusCode::Accepted).body("partial");
                    Err(HandlerError::new("boom"))
                }),
            )
            .unwrap())
            .build();

        #[rustfmt::skip]
        let cases = [
            ("GET /fail HTTP/1.1\r\n\r\n",  "HTTP/1.1 200 OK\r\n",          r#"{"error":true,"reason":"boom"}"#),
            ("GET fail HTTP/1.1\r\n\r\n",   "HTTP/1.1 400 Bad Request\r\n", r#"{"error":true,"reason":"INVALID_START_LINE"}"#),
        ];

        for (raw, status, expected) in cases {
            let (result, written) = send(&router, raw).await;
            assert_eq!(result.unwrap(), Tier::Error, "{raw:?}");
            assert!(written.starts_with(status), "{written}");
            assert_eq!(body(&written), expected);
        }
    }

    #[tokio::test]
    async fn disabled_error_responder_closes_silently() {
        let router = Router::builder()
            .route(tagged(Method::Get, "ok", "ok"))
            .not_found(NotFoundResponder::disabled())
            .error_responder(ErrorResponder::disabled())
            .build();

        let (result, written) = send(&router, "GET /missing HTTP/1.1\r\n\r\n").await;
        assert!(matches!(result, Err(ResponderError::NotFound)));
        assert!(written.is_empty());

        let (result, written) = send(&router, "\r\n\r\n").await;
        assert!(matches!(result, Err(ResponderError::Parse(_))));
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn not_found_without_responder_is_an_error() {
        let router = Router::builder().not_found(NotFoundResponder::disabled()).build();

        let (result, written) = send(&router, "GET /missing HTTP/1.1\r\n\r\n").await;
        assert_eq!(result.unwrap(), Tier::Error);
        assert_eq!(body(&written), r#"{"error":true,"reason":"not found"}"#);
    }

    #[tokio::test]
    async fn global_middleware_only_for_dynamic() {
        let router = Router::builder()
            .middleware(sync_middleware(|_, resp| {
                resp.header("x-mw", "1");
                Ok(Flow::Continue)
            }))
            .static_route(StaticRoute::get("/s").unwrap().body("s"))
            .route(tagged(Method::Get, "d", "d"))
            .build();

        let (_, written) = send(&router, "GET /s HTTP/1.1\r\n\r\n").await;
        assert!(!written.contains("x-mw"));

        let (_, written) = send(&router, "GET /d HTTP/1.1\r\n\r\n").await;
        assert!(written.contains("x-mw: 1\r\n"));
    }

    #[tokio::test]
    async fn mutable_router() {
        let frozen = Router::builder().build();
        assert!(!frozen.is_mutable());
        assert_eq!(
            frozen.insert_static(StaticRoute::get("/x").unwrap()),
            Err(RouterError::Immutable)
        );
        assert_eq!(frozen.remove(Method::Get, "/x"), Err(RouterError::Immutable));

        let router = Router::builder().mutable(true).build();
        let before = router.snapshot();

        router.insert_static(StaticRoute::get("/s").unwrap().body("s")).unwrap();
        router.insert_dynamic(tagged(Method::Get, "d/:id", "d")).unwrap();

        assert_eq!(before.statics.len(), 0);
        assert_eq!(router.route_count(), 2);

        let (result, written) = send(&router, "GET /d/1 HTTP/1.1\r\n\r\n").await;
        assert_eq!(result.unwrap(), Tier::Dynamic);
        assert_eq!(body(&written), "d");

        assert_eq!(router.remove(Method::Get, "d/:id").unwrap(), 1);
        assert_eq!(router.remove(Method::Get, "s").unwrap(), 1);
        assert_eq!(router.route_count(), 0);

        let (result, _) = send(&router, "GET /d/1 HTTP/1.1\r\n\r\n").await;
        assert_eq!(result.unwrap(), Tier::NotFound);
    }

    #[test]
    fn registration_errors_convert() {
        let error: RouterError = RoutePathError::EmptyParameterName(":".into()).into();
        assert!(matches!(error, RouterError::Path(_)));
    }
}
