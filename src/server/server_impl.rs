use crate::{
    errors::{overload_response, ServerError},
    io::socket::{write_buffer, ConnectionGuard},
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    router::Router,
    server::connection::{serve, Worker},
};
use crossbeam::queue::ArrayQueue;
use std::{
    future::{pending, Future},
    io,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::watch,
    task::{JoinError, JoinSet},
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept`, e.g. when the process is out of
/// descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// An HTTP server answering one request per accepted connection.
///
/// Every connection runs in its own task with a [`Worker`] taken from a
/// pool allocated at build time. When all workers are busy the connection
/// receives a pre-rendered `503` and is closed.
///
/// # Examples
///
/// ```no_run
/// use switchyard::{Method, Router, Server, StaticRoute};
/// use tokio::net::TcpListener;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let router = Router::builder()
///         .static_route(StaticRoute::new(Method::Get, "/")?.body("Hello world!"))
///         .build();
///
///     let server = Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await?)
///         .router(router)
///         .build();
///
///     let handle = server.shutdown_handle();
///     tokio::spawn(async move {
///         tokio::time::sleep(std::time::Duration::from_secs(60)).await;
///         handle.shutdown().await;
///     });
///
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
    workers: Arc<ArrayQueue<Worker>>,

    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,

    stop: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    done: watch::Sender<bool>,
}

impl Server {
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The router being served; a [mutable](crate::RouterBuilder::mutable)
    /// one can be updated through it while the server runs.
    #[inline]
    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop: self.stop.clone(),
            done: self.done.subscribe(),
        }
    }

    /// Accepts connections until a [`ShutdownHandle`] is triggered.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(pending()).await
    }

    /// Accepts connections until SIGINT or SIGTERM (Ctrl-C only on
    /// non-unix targets) or a [`ShutdownHandle`] is triggered.
    pub async fn run_until_signal(self) -> Result<(), ServerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Accepts connections until `signal` resolves or a [`ShutdownHandle`]
    /// is triggered, then shuts down gracefully:
    /// 1. the listener is closed;
    /// 2. in-flight connections get [`ServerLimits::shutdown_grace`] to
    ///    finish;
    /// 3. the rest are aborted, their descriptors closed by their guards.
    pub async fn run_until<F: Future<Output = ()>>(self, signal: F) -> Result<(), ServerError> {
        let Server {
            listener,
            router,
            workers,
            server_limits,
            conn_limits,
            req_limits,
            resp_limits,
            stop: _stop,
            mut stop_rx,
            done,
        } = self;

        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!(error = %e, "failed to read listener address");
                return Err(ServerError::Io(e));
            }
        };
        info!(%addr, max_connections = server_limits.max_connections, "server started");

        let mut tasks = JoinSet::new();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;

                () = &mut signal => break,

                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        recover_worker(&e, &workers, || Worker::new(&conn_limits, &req_limits, &resp_limits));
                    }
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                        }

                        match workers.pop() {
                            Some(worker) => {
                                tasks.spawn(connection(router.clone(), workers.clone(), worker, stream));
                            }
                            None => {
                                warn!(%peer, "all workers busy, rejecting connection");
                                tasks.spawn(reject(stream, server_limits.json_errors, conn_limits.socket_write_timeout));
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        info!(in_flight = tasks.len(), "shutting down");

        let drained = timeout(server_limits.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(aborted = tasks.len(), "shutdown grace elapsed, aborting connections");
            tasks.shutdown().await;
        }

        done.send_replace(true);
        info!(%addr, "server stopped");
        Ok(())
    }
}

async fn connection(
    router: Arc<Router>,
    workers: Arc<ArrayQueue<Worker>>,
    mut worker: Worker,
    stream: TcpStream,
) {
    // Failures are logged by the dispatcher.
    let _ = serve(&router, &mut worker, stream).await;
    let _ = workers.push(worker);
}

async fn reject(stream: TcpStream, json: bool, time: Duration) {
    let mut guard = ConnectionGuard::new(stream);
    if let Err(e) = write_buffer(guard.socket(), overload_response(json), time).await {
        debug!(error = %e, "failed to send overload response");
    }
    let _ = guard.close();
}

/// A panicked connection task took its worker with it; allocate a new one
/// so the pool keeps its size.
fn recover_worker<F: FnOnce() -> Worker>(error: &JoinError, workers: &ArrayQueue<Worker>, new: F) {
    if error.is_panic() {
        error!(error = %error, "connection task panicked");
        let _ = workers.push(new());
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
    info!("termination signal received");
}

//

/// Stops a running [`Server`] from elsewhere.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    stop: Arc<watch::Sender<bool>>,
    done: watch::Receiver<bool>,
}

impl ShutdownHandle {
    /// Asks the server to stop accepting; returns immediately.
    #[inline]
    pub fn trigger(&self) {
        self.stop.send_replace(true);
    }

    /// Stops the server and waits until every connection it was serving is
    /// closed.
    ///
    /// Also returns if the server is dropped without running.
    pub async fn shutdown(&self) {
        self.trigger();

        let mut done = self.done.clone();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }
}

//

/// Builder for [`Server`].
///
/// Only the listener is required; the router defaults to an empty one that
/// answers every request with the not-found responder.
#[derive(Default)]
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    router: Option<Arc<Router>>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
}

impl ServerBuilder {
    /// **Required.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Binds a new listener on `addr`; an alternative to
    /// [`listener`](Self::listener).
    pub async fn bind<A: ToSocketAddrs>(self, addr: A) -> Result<Self, ServerError> {
        match TcpListener::bind(addr).await {
            Ok(listener) => Ok(self.listener(listener)),
            Err(e) => {
                error!(error = %e, "failed to bind listener");
                Err(ServerError::Bind(e))
            }
        }
    }

    /// Accepts a [`Router`] or an `Arc<Router>` shared with the host.
    #[inline(always)]
    pub fn router<R: Into<Arc<Router>>>(mut self, router: R) -> Self {
        self.router = Some(router.into());
        self
    }

    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() {
    /// use switchyard::{limits::ServerLimits, Server};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .server_limits(ServerLimits {
    ///         max_connections: 2500,
    ///         ..ServerLimits::default()
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Allocates the worker pool and finalizes the server.
    ///
    /// # Panics
    ///
    /// With ``The `listener` method must be called to create`` when no
    /// listener was set.
    #[track_caller]
    pub fn build(self) -> Server {
        let listener = self
            .listener
            .expect("The `listener` method must be called to create");

        let server_limits = self.server_limits.unwrap_or_default();
        let conn_limits = self.connection_limits.unwrap_or_default();
        let req_limits = self.request_limits.unwrap_or_default();
        let resp_limits = self.response_limits.unwrap_or_default();

        let size = server_limits.max_connections.max(1);
        let workers = ArrayQueue::new(size);
        for _ in 0..size {
            let _ = workers.push(Worker::new(&conn_limits, &req_limits, &resp_limits));
        }

        let (stop, stop_rx) = watch::channel(false);
        let (done, _) = watch::channel(false);

        Server {
            listener,
            router: self.router.unwrap_or_default(),
            workers: Arc::new(workers),

            server_limits,
            conn_limits,
            req_limits,
            resp_limits,

            stop: Arc::new(stop),
            stop_rx,
            done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, StaticRoute};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn server(limits: ServerLimits) -> Server {
        let router = Router::builder()
            .static_route(StaticRoute::new(Method::Get, "/").unwrap().body("hi"))
            .build();

        Server::builder()
            .listener(TcpListener::bind("127.0.0.1:0").await.unwrap())
            .router(router)
            .server_limits(limits)
            .build()
    }

    async fn get(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn stops_before_first_accept() {
        let server = server(ServerLimits::default()).await;
        let addr = server.local_addr().unwrap();

        let result = timeout(Duration::from_secs(5), server.run_until(async {})).await;
        assert!(matches!(result, Ok(Ok(()))));
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn serves_and_shuts_down() {
        let server = server(ServerLimits::default()).await;
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let running = tokio::spawn(server.run());

        let response = get(addr, "GET / HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("\r\n\r\nhi"));

        let response = get(addr, "GET /missing HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));

        handle.shutdown().await;
        running.await.unwrap().unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let result = Server::builder().bind(addr).await;
        assert!(matches!(result, Err(ServerError::Bind(_))));

        drop(taken);
        let server = Server::builder().bind("127.0.0.1:0").await.unwrap().build();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn trigger_before_run() {
        let server = server(ServerLimits::default()).await;
        server.shutdown_handle().trigger();

        timeout(Duration::from_secs(5), server.run())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn overload_gets_503() {
        let server = server(ServerLimits {
            max_connections: 1,
            ..ServerLimits::default()
        })
        .await;
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let running = tokio::spawn(server.run());

        // Holds the only worker: the head never completes.
        let mut idle = TcpStream::connect(addr).await.unwrap();
        idle.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        sleep(Duration::from_millis(100)).await;

        // Rejected without reading, so nothing is sent.
        let mut rejected = TcpStream::connect(addr).await.unwrap();
        let mut response = String::new();
        rejected.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(response.ends_with(r#"{"error":true,"reason":"service temporarily unavailable"}"#));

        idle.write_all(b"\r\n").await.unwrap();
        let mut rest = String::new();
        idle.read_to_string(&mut rest).await.unwrap();
        assert!(rest.ends_with("hi"));

        handle.shutdown().await;
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn grace_aborts_stuck_connections() {
        let server = server(ServerLimits {
            shutdown_grace: Duration::from_millis(50),
            ..ServerLimits::default()
        })
        .await;
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let running = tokio::spawn(server.run());

        let mut stuck = TcpStream::connect(addr).await.unwrap();
        stuck.write_all(b"GET / HT").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        timeout(Duration::from_secs(1), handle.shutdown()).await.unwrap();
        running.await.unwrap().unwrap();

        let mut rest = Vec::new();
        let read = stuck.read_to_end(&mut rest).await;
        assert!(read.map_or(true, |n| n == 0));
    }
}
