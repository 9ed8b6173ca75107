use crate::{
    errors::ResponderError,
    http::{
        request::Request,
        response::{Response, ResponseTemplate},
    },
    io::socket::{ConnectionGuard, Socket},
    limits::{ConnLimits, ReqLimits, RespLimits},
    router::{Router, Tier},
};
use tracing::debug;

/// Request/response state owned by one connection at a time.
///
/// Allocated once per worker slot when the server starts and recycled
/// between descriptors, so serving a request reuses the same head buffer,
/// body buffer and serialization buffer.
#[derive(Debug)]
pub(crate) struct Worker {
    pub(crate) request: Request,
    pub(crate) response: Response,
    pub(crate) buffer: Vec<u8>,

    pub(crate) conn_limits: ConnLimits,
    resp_limits: RespLimits,
}

impl Worker {
    #[inline]
    pub(crate) fn new(conn: &ConnLimits, req: &ReqLimits, resp: &RespLimits) -> Self {
        Self {
            request: Request::new(req),
            response: Response::default(),
            buffer: Vec::with_capacity(resp.default_capacity),

            conn_limits: conn.clone(),
            resp_limits: resp.clone(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.request.reset();
        self.response.reset_from(&ResponseTemplate::new());
        self.resp_limits.recycle(&mut self.buffer);
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new(
            &ConnLimits::default(),
            &ReqLimits::default(),
            &RespLimits::default(),
        )
    }
}

/// Runs one request/response exchange on `socket`, then shuts it down and
/// closes it, whatever the outcome of the dispatch.
pub(crate) async fn serve<S: Socket>(
    router: &Router,
    worker: &mut Worker,
    socket: S,
) -> Result<Tier, ResponderError> {
    let mut guard = ConnectionGuard::new(socket);
    worker.reset();

    let result = router.dispatch(guard.socket(), worker).await;

    if let Err(e) = guard.close() {
        debug!(error = %e, "descriptor shutdown failed");
    }
    result
}
