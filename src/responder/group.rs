use crate::{
    errors::{ResponderError, RoutePathError},
    http::request::Request,
    io::socket::Socket,
    responder::{
        dynamic::{DynamicResponders, DynamicRoute, Middleware, SharedMiddleware},
        static_route::{StaticResponders, StaticRoute},
    },
    route::path::RoutePath,
    server::connection::Worker,
};
use std::{fmt, sync::Arc};

type Condition = dyn Fn(&Request) -> bool + Send + Sync;

/// Routes sharing a path prefix, a middleware chain and, optionally, a
/// condition on the request.
///
/// Groups are tried after every top-level route, in registration order.
/// Inside a group, static routes are tried before dynamic ones. The group's
/// middleware runs after the router's global middleware.
///
/// ```
/// use switchyard::{sync_handler, sync_middleware, DynamicRoute, Flow, Method, RouteGroup, StaticRoute};
///
/// # fn main() -> Result<(), switchyard::RoutePathError> {
/// let admin = RouteGroup::new("admin")?
///     .condition(|req| req.header(b"Host") == Some(&b"admin.local"[..]))
///     .middleware(sync_middleware(|_, resp| {
///         resp.header("cache-control", "no-store");
///         Ok(Flow::Continue)
///     }))
///     .static_route(StaticRoute::get("/health")?.body("ok"))?
///     .route(DynamicRoute::parse(Method::Delete, "users/:id", sync_handler(|_, _| Ok(())))?)?;
///
/// assert_eq!(admin.len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RouteGroup {
    prefix: String,
    condition: Option<Arc<Condition>>,
    middleware: Vec<SharedMiddleware>,
    statics: StaticResponders,
    dynamics: DynamicResponders,
}

impl RouteGroup {
    /// A group under `prefix`, which may only hold literal segments.
    pub fn new(prefix: &str) -> Result<Self, RoutePathError> {
        let path = RoutePath::parse(prefix, true)?;
        if !path.is_parameterless() || path.has_query() {
            return Err(RoutePathError::NonLiteralPrefix(prefix.to_string()));
        }

        Ok(Self {
            prefix: prefix.trim_matches('/').to_string(),
            condition: None,
            middleware: Vec::new(),
            statics: StaticResponders::default(),
            dynamics: DynamicResponders::default(),
        })
    }

    /// The group is skipped unless `condition` holds.
    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Adds a static route, its path prefixed with the group's.
    pub fn static_route(mut self, route: StaticRoute) -> Result<Self, RoutePathError> {
        self.statics.insert(route.prefixed(&self.prefix)?);
        Ok(self)
    }

    /// Adds a dynamic route, its path prefixed with the group's.
    pub fn route(mut self, route: DynamicRoute) -> Result<Self, RoutePathError> {
        self.dynamics.insert(route.prefixed(&self.prefix)?);
        Ok(self)
    }

    #[inline(always)]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.statics.len() + self.dynamics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn admits(&self, req: &Request) -> bool {
        self.condition.as_ref().map_or(true, |condition| condition(req))
    }

    /// Dispatches to the first matching route of the group; `false` if none
    /// matched or the condition rejected the request.
    pub(crate) async fn respond<S: Socket>(
        &self,
        socket: &mut S,
        worker: &mut Worker,
        global: &[SharedMiddleware],
    ) -> Result<bool, ResponderError> {
        if !self.admits(&worker.request) {
            return Ok(false);
        }

        for case_sensitive in [true, false] {
            if let Some(route) = self.statics.get(&worker.request, case_sensitive) {
                let time = worker.conn_limits.socket_write_timeout;
                route.respond(socket, time).await?;
                return Ok(true);
            }
        }

        for case_sensitive in [true, false] {
            if let Some(route) = self.dynamics.find(&worker.request, case_sensitive)? {
                route
                    .respond(socket, worker, &[global, self.middleware.as_slice()])
                    .await?;
                return Ok(true);
            }
        }

        Ok(false)
    }
}

impl fmt::Debug for RouteGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteGroup")
            .field("prefix", &self.prefix)
            .field("conditional", &self.condition.is_some())
            .field("middleware", &self.middleware.len())
            .field("statics", &self.statics)
            .field("dynamics", &self.dynamics)
            .finish()
    }
}
