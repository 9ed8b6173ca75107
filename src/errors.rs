use crate::StatusCode;
use std::{borrow::Cow, error, io};
use thiserror::Error;

type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// Failures at the descriptor boundary.
///
/// Always fatal to the connection it happened on, never to the server.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket read failed: {0}")]
    Read(#[source] io::Error),
    #[error("socket write failed: {0}")]
    Write(#[source] io::Error),
    #[error("socket shutdown failed: {0}")]
    Shutdown(#[source] io::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("line does not fit in the read buffer")]
    Truncated,
    #[error("socket operation timed out")]
    TimedOut,
}

macro_rules! parse_errors {
    ($($(#[$docs:meta])* $name:ident $({ $($field:ident: $ty:ty),* })?:
        $status:ident, $code:literal, $msg:literal;)*) => {
        /// A malformed start-line or header block.
        ///
        /// Rendered to the client with its own 4xx status by the
        /// [error responder](crate::ErrorResponder).
        #[derive(Debug, Error, Clone, PartialEq, Eq)]
        pub enum RequestParseError { $(
            $(#[$docs])*
            #[error($msg)]
            $name $({ $($field: $ty),* })?,
        )* }

        impl RequestParseError {
            /// Status code used when this error is sent to the client.
            pub const fn status(&self) -> StatusCode {
                match self { $( Self::$name { .. } => StatusCode::$status, )* }
            }

            /// Stable machine-readable code, e.g. `INVALID_START_LINE`.
            pub const fn code(&self) -> &'static str {
                match self { $( Self::$name { .. } => $code, )* }
            }
        }
    };
}

parse_errors! {
    /// The start-line is longer than the inline start-line capacity.
    StartLineTooLong: UriTooLong, "START_LINE_TOO_LONG", "start-line too long";
    /// Fewer than three space-delimited tokens, or a path not starting with `/`.
    InvalidStartLine: BadRequest, "INVALID_START_LINE", "invalid start-line";
    /// More path segments than can be indexed inline.
    TooManySegments: UriTooLong, "TOO_MANY_SEGMENTS", "too many path segments";
    InvalidHeader: BadRequest, "INVALID_HEADER", "invalid header line";
    TooManyHeaders: RequestHeaderFieldsTooLarge, "TOO_MANY_HEADERS", "too many headers";
    /// The header block does not fit in the read buffer.
    HeadTooLarge: RequestHeaderFieldsTooLarge, "HEAD_TOO_LARGE", "header block too large";
    InvalidContentLength: BadRequest, "INVALID_CONTENT_LENGTH", "invalid Content-Length";
    UnsupportedTransferEncoding: NotImplemented, "UNSUPPORTED_TRANSFER_ENCODING",
        "transfer-encoding is not supported for request bodies";
    BodyTooLarge: PayloadTooLarge, "BODY_TOO_LARGE", "request body too large";
    /// The head is not valid UTF-8.
    InvalidEncoding: BadRequest, "INVALID_ENCODING", "request head is not UTF-8";
    /// A path segment index past the last segment.
    IndexOutOfBounds { index: usize, count: usize }: BadRequest, "INDEX_OUT_OF_BOUNDS",
        "path segment index out of bounds";
}

/// Raised by a dynamic middleware step; halts the chain.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct MiddlewareError {
    message: Cow<'static, str>,
    #[source]
    source: Option<BoxError>,
}

/// Raised by a route handler.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: Cow<'static, str>,
    #[source]
    source: Option<BoxError>,
}

macro_rules! impl_message_error {
    ($($name:ident),*) => { $(
        impl $name {
            pub fn new<M: Into<Cow<'static, str>>>(message: M) -> Self {
                Self { message: message.into(), source: None }
            }

            /// Wraps another error, keeping it as the source.
            pub fn wrap<E: Into<BoxError>>(message: &'static str, source: E) -> Self {
                Self { message: Cow::Borrowed(message), source: Some(source.into()) }
            }

            pub fn message(&self) -> &str {
                &self.message
            }
        }
    )* };
}

impl_message_error! { MiddlewareError, HandlerError }

/// Everything a responder can fail with.
#[derive(Debug, Error)]
pub enum ResponderError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Parse(#[from] RequestParseError),
    #[error("middleware failed: {0}")]
    Middleware(#[from] MiddlewareError),
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),
    #[error("no responder matched")]
    NotFound,
}

impl ResponderError {
    /// Socket failures leave nothing to respond on.
    #[inline]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Socket(_))
    }

    /// Human-readable reason used in error responses.
    pub fn reason(&self) -> Cow<'_, str> {
        match self {
            Self::Socket(e) => Cow::Owned(e.to_string()),
            Self::Parse(e) => Cow::Borrowed(e.code()),
            Self::Middleware(e) => Cow::Borrowed(e.message()),
            Self::Handler(e) => Cow::Borrowed(e.message()),
            Self::NotFound => Cow::Borrowed("not found"),
        }
    }
}

/// Registration failures for a route path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutePathError {
    #[error("catch-all `**` must be the last component of `{0}`")]
    CatchallNotTerminal(String),
    #[error("query must be the last component of `{0}`")]
    QueryNotTerminal(String),
    #[error("unbalanced `{{`/`}}` in segment `{0}`")]
    UnbalancedBraces(String),
    #[error("adjacent parameters in segment `{0}` cannot be split")]
    AdjacentParameters(String),
    #[error("empty parameter name in segment `{0}`")]
    EmptyParameterName(String),
    #[error("route `{0}` has more segments than a request can carry")]
    TooManySegments(String),
    #[error("start-line `{0}` does not fit the start-line capacity")]
    StartLineTooLong(String),
    /// Group prefixes are prepended to static routes too, so they must be
    /// plain literals.
    #[error("group prefix `{0}` must be literal")]
    NonLiteralPrefix(String),
}

/// Runtime registration failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("router was not built with `mutable(true)`")]
    Immutable,
    #[error(transparent)]
    Path(#[from] RoutePathError),
}

/// Failures that stop the server itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),
    #[error("listener failed: {0}")]
    Io(#[from] io::Error),
}

macro_rules! overload_responses {
    ($status:literal, $len:literal => $json:literal) => {
        /// Pre-rendered response sent to connections rejected under overload.
        pub(crate) const fn overload_response(json: bool) -> &'static [u8] {
            match json {
                true => concat!(
                    "HTTP/1.1 ", $status, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                false => concat!(
                    "HTTP/1.1 ", $status, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            }
            .as_bytes()
        }
    };
}

overload_responses! {
    "503 Service Unavailable", "59"
        => r#"{"error":true,"reason":"service temporarily unavailable"}"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_status_and_code() {
        #[rustfmt::skip]
        let cases = [
            (RequestParseError::InvalidStartLine, 400, "INVALID_START_LINE"),
            (RequestParseError::StartLineTooLong, 414, "START_LINE_TOO_LONG"),
            (RequestParseError::HeadTooLarge,     431, "HEAD_TOO_LARGE"),
            (RequestParseError::BodyTooLarge,     413, "BODY_TOO_LARGE"),
            (
                RequestParseError::IndexOutOfBounds { index: 3, count: 1 },
                400, "INDEX_OUT_OF_BOUNDS"
            ),
        ];

        for (error, status, code) in cases {
            assert_eq!(error.status().as_u16(), status);
            assert_eq!(error.code(), code);
        }
    }

    #[test]
    fn fatal_only_for_socket() {
        assert!(ResponderError::from(SocketError::Closed).is_fatal());
        assert!(!ResponderError::from(RequestParseError::InvalidHeader).is_fatal());
        assert!(!ResponderError::from(HandlerError::new("boom")).is_fatal());
        assert!(!ResponderError::NotFound.is_fatal());
    }

    #[test]
    fn overload_content_length_matches() {
        let bytes = overload_response(true);
        let text = std::str::from_utf8(bytes).unwrap();
        let body = text.split("\r\n\r\n").nth(1).unwrap();

        assert!(text.contains(&format!("content-length: {}\r\n", body.len())));
        assert!(overload_response(false).ends_with(b"content-length: 0\r\n\r\n"));
    }
}
