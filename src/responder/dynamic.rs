//! Pattern-matched responders: handlers, middleware and their bucketed
//! storage.

use crate::{
    errors::{HandlerError, MiddlewareError, RequestParseError, ResponderError, RoutePathError},
    http::{
        request::Request,
        response::{Response, ResponseTemplate},
        types::{Method, Version},
    },
    io::socket::Socket,
    route::path::RoutePath,
    server::connection::Worker,
};
use std::{
    collections::HashMap,
    fmt,
    future::{ready, Future},
    pin::Pin,
    sync::Arc,
};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-request logic of a dynamic route.
///
/// The response arrives pre-filled from the route's [`ResponseTemplate`]
/// with the path parameters already extracted, and is written once the
/// handler returns.
///
/// # Examples
///
/// ```
/// use switchyard::{Handler, HandlerError, Request, Response, StatusCode};
///
/// struct Echo;
///
/// impl Handler for Echo {
///     async fn handle(&self, req: &mut Request, resp: &mut Response) -> Result<(), HandlerError> {
///         if req.body().is_empty() {
///             return Err(HandlerError::new("empty body"));
///         }
///         resp.status(StatusCode::Ok).body(req.body());
///         Ok(())
///     }
/// }
/// ```
/// Closures are adapted with [`sync_handler`] and [`async_handler`].
pub trait Handler: Send + Sync + 'static {
    fn handle(
        &self,
        req: &mut Request,
        resp: &mut Response,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

pub(crate) trait ErasedHandler: Send + Sync {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), HandlerError>>;
}

impl<H: Handler> ErasedHandler for H {
    #[inline]
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(self.handle(req, resp))
    }
}

/// Handler running a plain function to completion.
pub struct SyncHandler<F>(F);

/// Adapts a synchronous closure into a [`Handler`].
///
/// ```
/// use switchyard::sync_handler;
///
/// let handler = sync_handler(|_, resp| {
///     let id = resp.param_str(0).unwrap_or_default().to_string();
///     resp.body(format!("user #{id}"));
///     Ok(())
/// });
/// ```
#[inline]
pub fn sync_handler<F>(f: F) -> SyncHandler<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    SyncHandler(f)
}

impl<F> Handler for SyncHandler<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    #[inline]
    fn handle(
        &self,
        req: &mut Request,
        resp: &mut Response,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send {
        ready((self.0)(req, resp))
    }
}

/// Handler running an owned future.
pub struct AsyncHandler<F>(F);

/// Adapts an async closure into a [`Handler`].
///
/// The closure receives an owned [copy](Request::copy) of the request and
/// the response moved out of the worker, so its future may outlive the
/// borrow; the returned response is the one written.
///
/// ```
/// use switchyard::async_handler;
///
/// let handler = async_handler(|req, mut resp| async move {
///     tokio::task::yield_now().await;
///     resp.body(req.target());
///     Ok(resp)
/// });
/// ```
#[inline]
pub fn async_handler<F, Fut>(f: F) -> AsyncHandler<F>
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    AsyncHandler(f)
}

impl<F, Fut> Handler for AsyncHandler<F>
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    fn handle(
        &self,
        req: &mut Request,
        resp: &mut Response,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send {
        let future = (self.0)(req.copy(), resp.take());
        async move {
            *resp = future.await?;
            Ok(())
        }
    }
}

// MIDDLEWARE

/// Whether the middleware chain goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Skip the remaining middleware and the handler; the response is
    /// written as it is.
    Stop,
}

/// Runs before the handler of every dynamic route it is registered for,
/// in registration order.
///
/// ```
/// use switchyard::{Flow, Middleware, MiddlewareError, Request, Response, StatusCode};
///
/// struct RequireToken;
///
/// impl Middleware for RequireToken {
///     async fn apply(&self, req: &mut Request, resp: &mut Response) -> Result<Flow, MiddlewareError> {
///         match req.header(b"Authorization") {
///             Some(_) => Ok(Flow::Continue),
///             None => {
///                 resp.status(StatusCode::Unauthorized).body("token required");
///                 Ok(Flow::Stop)
///             }
///         }
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    fn apply(
        &self,
        req: &mut Request,
        resp: &mut Response,
    ) -> impl Future<Output = Result<Flow, MiddlewareError>> + Send;
}

pub(crate) trait ErasedMiddleware: Send + Sync {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, Result<Flow, MiddlewareError>>;
}

impl<M: Middleware> ErasedMiddleware for M {
    #[inline]
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, Result<Flow, MiddlewareError>> {
        Box::pin(self.apply(req, resp))
    }
}

pub(crate) type SharedMiddleware = Arc<dyn ErasedMiddleware>;

/// Middleware running a plain function.
pub struct SyncMiddleware<F>(F);

/// Adapts a synchronous closure into a [`Middleware`].
///
/// ```
/// use switchyard::{sync_middleware, Flow};
///
/// let server_header = sync_middleware(|_, resp| {
///     resp.header("server", "switchyard");
///     Ok(Flow::Continue)
/// });
/// ```
#[inline]
pub fn sync_middleware<F>(f: F) -> SyncMiddleware<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<Flow, MiddlewareError> + Send + Sync + 'static,
{
    SyncMiddleware(f)
}

impl<F> Middleware for SyncMiddleware<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<Flow, MiddlewareError> + Send + Sync + 'static,
{
    #[inline]
    fn apply(
        &self,
        req: &mut Request,
        resp: &mut Response,
    ) -> impl Future<Output = Result<Flow, MiddlewareError>> + Send {
        ready((self.0)(req, resp))
    }
}

/// Runs every chain in order until one middleware stops.
pub(crate) async fn run_middleware(
    chains: &[&[SharedMiddleware]],
    req: &mut Request,
    resp: &mut Response,
) -> Result<Flow, MiddlewareError> {
    for middleware in chains.iter().flat_map(|chain| chain.iter()) {
        if middleware.call(req, resp).await? == Flow::Stop {
            return Ok(Flow::Stop);
        }
    }
    Ok(Flow::Continue)
}

// ROUTE

/// A route answered per request by a [`Handler`].
///
/// Dispatch builds the response from the route's template, copies the path
/// parameters into it, runs the middleware chain and then the handler.
///
/// ```
/// use switchyard::{sync_handler, DynamicRoute, Method, ResponseTemplate, RoutePath, StatusCode};
///
/// let route = DynamicRoute::new(
///     Method::Get,
///     RoutePath::parse("Files/{name}.zip", false).unwrap(),
///     sync_handler(|_, _| Ok(())),
/// )
/// .template(ResponseTemplate::new().status(StatusCode::Accepted));
///
/// assert_eq!(route.path().parameter_count(), 1);
/// ```
#[derive(Clone)]
pub struct DynamicRoute {
    method: Method,
    version: Version,
    path: RoutePath,
    template: ResponseTemplate,
    handler: Arc<dyn ErasedHandler>,
}

impl DynamicRoute {
    pub fn new<H: Handler>(method: Method, path: RoutePath, handler: H) -> Self {
        Self {
            method,
            version: Version::Http11,
            path,
            template: ResponseTemplate::new(),
            handler: Arc::new(handler),
        }
    }

    /// Compiles a case-sensitive `path`.
    #[inline]
    pub fn parse<H: Handler>(
        method: Method,
        path: &str,
        handler: H,
    ) -> Result<Self, RoutePathError> {
        Ok(Self::new(method, RoutePath::parse(path, true)?, handler))
    }

    /// Request version the route answers (default: HTTP/1.1); also the
    /// version of its responses.
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self.template = self.template.version(version);
        self
    }

    pub fn template(mut self, template: ResponseTemplate) -> Self {
        self.template = template.version(self.version);
        self
    }

    /// Recompiles the path under a group prefix.
    pub(crate) fn prefixed(mut self, prefix: &str) -> Result<Self, RoutePathError> {
        let prefix = prefix.trim_matches('/');
        if !prefix.is_empty() {
            let joined = format!("{prefix}/{}", self.path.source().trim_start_matches('/'));
            self.path = RoutePath::parse(&joined, self.path.is_case_sensitive())?;
        }
        Ok(self)
    }

    #[inline(always)]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub fn path(&self) -> &RoutePath {
        &self.path
    }

    #[inline(always)]
    pub fn response_template(&self) -> &ResponseTemplate {
        &self.template
    }

    /// Method and version check, following the path's case sensitivity.
    #[inline]
    fn accepts(&self, req: &Request) -> bool {
        let (method, version) = (req.method_bytes(), req.version_bytes());
        match self.path.is_case_sensitive() {
            true => method == self.method.as_bytes() && version == self.version.as_bytes(),
            false => {
                method.eq_ignore_ascii_case(self.method.as_bytes())
                    && version.eq_ignore_ascii_case(self.version.as_bytes())
            }
        }
    }

    #[inline]
    fn is(&self, method: Method, path: &str) -> bool {
        self.method == method && self.path.source().trim_matches('/') == path.trim_matches('/')
    }

    /// Loads the body, builds the response, runs middleware and handler,
    /// and writes the result.
    pub(crate) async fn respond<S: Socket>(
        &self,
        socket: &mut S,
        worker: &mut Worker,
        chains: &[&[SharedMiddleware]],
    ) -> Result<(), ResponderError> {
        let Worker {
            request,
            response,
            buffer,
            conn_limits,
            ..
        } = worker;

        request
            .load_body(socket, conn_limits.socket_read_timeout)
            .await?;

        response.reset_from(&self.template);
        {
            let original = request.segments(true)?;
            let matching = request.segments(self.path.is_case_sensitive())?;
            self.path.extract(&matching, &original, response.params_mut());
        }

        if run_middleware(chains, request, response).await? == Flow::Continue {
            self.handler.call(request, response).await?;
        }

        response
            .write_to(socket, buffer, conn_limits.socket_write_timeout)
            .await?;
        Ok(())
    }
}

impl fmt::Debug for DynamicRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicRoute")
            .field("method", &self.method)
            .field("version", &self.version)
            .field("path", &self.path)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

// STORAGE

/// Routes of one case sensitivity, bucketed so that literal paths are
/// always tried before parameterized ones and catch-alls come last.
#[derive(Debug, Clone, Default)]
struct Buckets {
    parameterless: Vec<Arc<DynamicRoute>>,
    /// Keyed by segment count.
    parameterized: HashMap<usize, Vec<Arc<DynamicRoute>>>,
    catchall: Vec<Arc<DynamicRoute>>,
}

impl Buckets {
    fn insert(&mut self, route: DynamicRoute) {
        let path = route.path();
        let bucket = if path.has_catchall() {
            &mut self.catchall
        } else if path.is_parameterless() {
            &mut self.parameterless
        } else {
            self.parameterized.entry(path.segment_count()).or_default()
        };
        bucket.push(Arc::new(route));
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.parameterless.is_empty() && self.parameterized.is_empty() && self.catchall.is_empty()
    }

    fn find(
        &self,
        req: &Request,
        case_sensitive: bool,
    ) -> Result<Option<&Arc<DynamicRoute>>, RequestParseError> {
        if self.is_empty() {
            return Ok(None);
        }

        let segments = req.segments(case_sensitive)?;
        let sized = self.parameterized.get(&segments.len());

        Ok(self
            .parameterless
            .iter()
            .chain(sized.into_iter().flatten())
            .chain(self.catchall.iter())
            .find(|route| route.accepts(req) && route.path.matches(&segments)))
    }

    fn remove(&mut self, method: Method, path: &str) -> usize {
        let mut removed = 0;
        let mut retain = |routes: &mut Vec<Arc<DynamicRoute>>| {
            let before = routes.len();
            routes.retain(|route| !route.is(method, path));
            removed += before - routes.len();
        };

        retain(&mut self.parameterless);
        self.parameterized.values_mut().for_each(&mut retain);
        retain(&mut self.catchall);
        self.parameterized.retain(|_, routes| !routes.is_empty());

        removed
    }

    fn len(&self) -> usize {
        self.parameterless.len()
            + self.parameterized.values().map(Vec::len).sum::<usize>()
            + self.catchall.len()
    }
}

/// Dynamic routes, case-sensitive and case-insensitive kept apart.
#[derive(Debug, Clone, Default)]
pub(crate) struct DynamicResponders {
    sensitive: Buckets,
    insensitive: Buckets,
}

impl DynamicResponders {
    pub(crate) fn insert(&mut self, route: DynamicRoute) {
        match route.path.is_case_sensitive() {
            true => self.sensitive.insert(route),
            false => self.insensitive.insert(route),
        }
    }

    /// First route in bucket order whose method, version and path match.
    #[inline]
    pub(crate) fn find(
        &self,
        req: &Request,
        case_sensitive: bool,
    ) -> Result<Option<&Arc<DynamicRoute>>, RequestParseError> {
        match case_sensitive {
            true => self.sensitive.find(req, true),
            false => self.insensitive.find(req, false),
        }
    }

    /// Removes every route registered for `method` and `path`.
    pub(crate) fn remove(&mut self, method: Method, path: &str) -> usize {
        self.sensitive.remove(method, path) + self.insensitive.remove(method, path)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.sensitive.len() + self.insensitive.len()
    }
}
