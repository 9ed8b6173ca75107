//! Server configuration limits and timeouts
//!
//! Every connection worker pre-allocates its buffers from these values once,
//! when the server starts, and reuses them for every accepted descriptor:
//!
//! `Total` = [`head buffer`](ReqLimits::buffer_size) +
//!           [`body buffer`](ReqLimits::body_size) (grown lazily) +
//!           [`response buffer`](RespLimits::default_capacity)
//!
//! # Examples
//!
//! ```no_run
//! use switchyard::{Router, Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::builder().build();
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .router(router)
//!         .server_limits(ServerLimits {
//!             max_connections: 5000,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             body_size: 16 * 1024,
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .run()
//!         .await
//!         .unwrap();
//! }
//! ```

use std::time::Duration;

/// Server-level concurrency and shutdown behavior.
///
/// # Connection admission
/// ```text
///                 [------------]
///                 [ Tcp accept ]
///                 [------------]
///                       ||
///                       \/
/// [-------------]  No  /-----------------------\  Yes  [-------------]
/// [ Spawn task  ] <=== | max_connections busy? | ====> [ Sending 503 ]
/// [-------------]      \-----------------------/       [-------------]
/// ```
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of connections handled at once (default: `100`).
    ///
    /// Exactly this many connection workers are allocated at startup. A
    /// connection accepted while all of them are busy receives an immediate
    /// [503](crate::StatusCode::ServiceUnavailable) and is closed.
    pub max_connections: usize,

    /// How long shutdown waits for in-flight connections (default: `5 seconds`).
    ///
    /// Connections still running afterwards are aborted; their descriptors
    /// are shut down and closed by their guards either way.
    pub shutdown_grace: Duration,

    /// Format of the overload response (default: `true`)
    ///
    /// If `true`:
    /// ```text
    /// HTTP/1.1 503 Service Unavailable\r
    /// connection: close\r
    /// content-length: 59\r
    /// content-type: application/json\r
    /// \r
    /// {"error":true,"reason":"service temporarily unavailable"}
    /// ```
    /// If `false` the body is empty and `content-length: 0` is sent.
    pub json_errors: bool,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            shutdown_grace: Duration::from_secs(5),
            json_errors: true,
        }
    }
}

/// Per-connection socket timeouts.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum time to wait for the socket to become readable (default: `2 seconds`)
    ///
    /// Applies to every wait while reading the head and the body, so a client
    /// trickling bytes cannot hold a worker forever.
    pub socket_read_timeout: Duration,

    /// Maximum time to wait for the socket to become writable (default: `3 seconds`)
    pub socket_write_timeout: Duration,
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
        }
    }
}

/// Request parsing limits.
///
/// | Field | Default | Rejected with |
/// |-------|---------|---------------|
/// | `buffer_size` | 4096 B | `431 Request Header Fields Too Large` |
/// | `header_count` | 32 | `431 Request Header Fields Too Large` |
/// | `body_size` | 64 KiB | `413 Payload Too Large` |
/// | `query_parts` | 16 | `QueryError::OverLimit` from `Request::try_query` |
///
/// The start-line itself is bounded by
/// [`START_LINE_CAPACITY`](crate::START_LINE_CAPACITY) and rejected with
/// `414 URI Too Long`.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Size of the head buffer: start-line plus header block (default: `4096 B`)
    pub buffer_size: usize,
    /// Maximum number of header lines (default: `32`)
    pub header_count: usize,
    /// Maximum `Content-Length` accepted for dynamic routes (default: `64 KiB`)
    pub body_size: usize,
    /// Maximum number of query pairs collected by
    /// [`Request::query`](crate::Request::query) (default: `16`)
    pub query_parts: usize,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            header_count: 32,
            body_size: 64 * 1024,
            query_parts: 16,
        }
    }
}

/// Response buffer sizing.
///
/// The serialization buffer of each worker is reused between connections:
/// ```rust
/// # use switchyard::limits::RespLimits;
/// # let limits = RespLimits::default();
/// # let mut buffer: Vec<u8> = Vec::with_capacity(limits.default_capacity);
/// if buffer.capacity() > limits.max_capacity {
///     buffer = Vec::with_capacity(limits.default_capacity);
/// } else {
///     buffer.clear();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity (default: `1024 B`)
    pub default_capacity: usize,
    /// Capacity above which the buffer is reallocated on reuse (default: `8192 B`)
    pub max_capacity: usize,
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,
        }
    }
}

impl RespLimits {
    #[inline]
    pub(crate) fn recycle(&self, buffer: &mut Vec<u8>) {
        if buffer.capacity() > self.max_capacity {
            *buffer = Vec::with_capacity(self.default_capacity);
        } else {
            buffer.clear();
        }
    }
}
