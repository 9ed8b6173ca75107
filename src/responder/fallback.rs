//! Responders of last resort: nothing matched, or something failed.

use crate::{
    errors::{ResponderError, SocketError},
    http::{
        request::Request,
        response::{write::BodyWriter, Response, ResponseTemplate},
        types::StatusCode,
    },
    io::socket::Socket,
    responder::{
        dynamic::{ErasedHandler, Handler},
        static_route::StaticResponse,
    },
    server::connection::Worker,
};
use std::{fmt, sync::Arc};

/// A not-found responder computed per request.
///
/// Middleware does not run for it. The template defaults to `404 Not Found`.
#[derive(Clone)]
pub struct DynamicFallback {
    template: ResponseTemplate,
    handler: Arc<dyn ErasedHandler>,
}

impl DynamicFallback {
    pub fn new<H: Handler>(handler: H) -> Self {
        Self {
            template: ResponseTemplate::new().status(StatusCode::NotFound),
            handler: Arc::new(handler),
        }
    }

    pub fn template(mut self, template: ResponseTemplate) -> Self {
        self.template = template;
        self
    }

    async fn respond<S: Socket>(
        &self,
        socket: &mut S,
        worker: &mut Worker,
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
        self.handler.call(request, response).await?;

        response
            .write_to(socket, buffer, conn_limits.socket_write_timeout)
            .await?;
        Ok(())
    }
}

impl fmt::Debug for DynamicFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicFallback")
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

/// Answers requests no route matched.
///
/// A [dynamic fallback](DynamicFallback) is preferred over the static
/// response when both are set. By default the static response is
/// `404 Not Found` with the plain-text body `not found`.
///
/// ```
/// use switchyard::{sync_handler, NotFoundResponder, StaticResponse, StatusCode};
///
/// let html = NotFoundResponder::new().response(
///     StaticResponse::new()
///         .status(StatusCode::NotFound)
///         .content_type("text/html")
///         .body("<h1>Nothing here</h1>"),
/// );
///
/// let echo = NotFoundResponder::new().handler(sync_handler(|req, resp| {
///     resp.body(req.target());
///     Ok(())
/// }));
/// ```
#[derive(Debug, Clone)]
pub struct NotFoundResponder {
    fixed: Option<StaticResponse>,
    dynamic: Option<DynamicFallback>,
}

impl Default for NotFoundResponder {
    fn default() -> Self {
        Self {
            fixed: Some(
                StaticResponse::new()
                    .status(StatusCode::NotFound)
                    .static_body(b"not found"),
            ),
            dynamic: None,
        }
    }
}

impl NotFoundResponder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// No response at all: unmatched requests go to the
    /// [error responder](ErrorResponder) as [`ResponderError::NotFound`].
    pub fn disabled() -> Self {
        Self {
            fixed: None,
            dynamic: None,
        }
    }

    pub fn response(mut self, response: StaticResponse) -> Self {
        self.fixed = Some(response);
        self
    }

    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.dynamic = Some(DynamicFallback::new(handler));
        self
    }

    pub fn fallback(mut self, fallback: DynamicFallback) -> Self {
        self.dynamic = Some(fallback);
        self
    }

    pub(crate) async fn respond<S: Socket>(
        &self,
        socket: &mut S,
        worker: &mut Worker,
    ) -> Result<(), ResponderError> {
        match (&self.dynamic, &self.fixed) {
            (Some(dynamic), _) => dynamic.respond(socket, worker).await,
            (None, Some(fixed)) => {
                let time = worker.conn_limits.socket_write_timeout;
                Ok(fixed.respond(socket, time).await?)
            }
            (None, None) => Err(ResponderError::NotFound),
        }
    }
}

//

type RenderFn = dyn Fn(&ResponderError, &Request, &mut Response) + Send + Sync;

#[derive(Clone)]
enum Render {
    Json,
    Custom(Arc<RenderFn>),
    Disabled,
}

/// Turns a recoverable dispatch failure into a response.
///
/// The response is always built from scratch: whatever middleware or the
/// handler had set is discarded. The default renders
/// ```text
/// {"error":true,"reason":"..."}
/// ```
/// with status `200 OK`; request-parse errors use their own 4xx status and
/// their machine code as the reason.
///
/// ```
/// use switchyard::{ErrorResponder, StatusCode};
///
/// let json = ErrorResponder::new().with_status(StatusCode::InternalServerError);
///
/// let plain = ErrorResponder::custom(|error, _, resp| {
///     resp.status(StatusCode::InternalServerError)
///         .header("content-type", "text/plain")
///         .body(error.reason());
/// });
/// ```
/// When [disabled](ErrorResponder::disabled), failed connections are closed
/// without a response.
#[derive(Clone)]
pub struct ErrorResponder {
    status: StatusCode,
    render: Render,
}

impl Default for ErrorResponder {
    fn default() -> Self {
        Self {
            status: StatusCode::Ok,
            render: Render::Json,
        }
    }
}

impl ErrorResponder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// The response is left entirely to `render`, starting from an empty
    /// response with the configured status.
    pub fn custom<F>(render: F) -> Self
    where
        F: Fn(&ResponderError, &Request, &mut Response) + Send + Sync + 'static,
    {
        Self {
            render: Render::Custom(Arc::new(render)),
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            render: Render::Disabled,
            ..Self::default()
        }
    }

    /// Status of every error response except request-parse errors.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        !matches!(self.render, Render::Disabled)
    }

    #[inline]
    fn status_for(&self, error: &ResponderError) -> StatusCode {
        match error {
            ResponderError::Parse(e) => e.status(),
            _ => self.status,
        }
    }

    pub(crate) async fn respond<S: Socket>(
        &self,
        socket: &mut S,
        worker: &mut Worker,
        error: &ResponderError,
    ) -> Result<(), SocketError> {
        let Worker {
            request,
            response,
            buffer,
            conn_limits,
            ..
        } = worker;

        response.reset_from(&ResponseTemplate::new());
        response.status(self.status_for(error));

        match &self.render {
            Render::Json => {
                response
                    .header("content-type", "application/json")
                    .body_with(|w| {
                        w.write(r#"{"error":true,"reason":""#);
                        write_json_escaped(w, &error.reason());
                        w.write(r#""}"#);
                    });
            }
            Render::Custom(render) => render(error, request, response),
            Render::Disabled => return Ok(()),
        }

        response
            .write_to(socket, buffer, conn_limits.socket_write_timeout)
            .await
    }
}

impl fmt::Debug for ErrorResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = match self.render {
            Render::Json => "json",
            Render::Custom(_) => "custom",
            Render::Disabled => "disabled",
        };
        f.debug_struct("ErrorResponder")
            .field("status", &self.status)
            .field("render", &render)
            .finish()
    }
}

fn write_json_escaped(w: &mut BodyWriter, text: &str) {
    for c in text.chars() {
        match c {
            '"' => w.write(r#"\""#),
            '\\' => w.write(r"\\"),
            '\n' => w.write(r"\n"),
            '\r' => w.write(r"\r"),
            '\t' => w.write(r"\t"),
            c if c.is_control() => w.write(format!("\\u{:04x}", c as u32)),
            c => w.write(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::RequestParseError, sync_handler, tools::*, HandlerError};

    async fn error_response(responder: &ErrorResponder, error: ResponderError) -> String {
        let mut socket = MockSocket::new("GET /x HTTP/1.1\r\n\r\n");
        let mut worker = Worker::default();
        worker.request.load(&mut socket, TIME).await.unwrap();

        worker.response.status(StatusCode::Accepted).header("x-partial", "1");
        responder.respond(&mut socket, &mut worker, &error).await.unwrap();

        String::from_utf8(socket.written()).unwrap()
    }

    async fn not_found_response(responder: &NotFoundResponder) -> Result<String, ResponderError> {
        let mut socket = MockSocket::new("GET /missing HTTP/1.1\r\n\r\n");
        let mut worker = Worker::default();
        worker.request.load(&mut socket, TIME).await.unwrap();

        responder.respond(&mut socket, &mut worker).await?;
        Ok(String::from_utf8(socket.written()).unwrap())
    }

    #[tokio::test]
    async fn default_not_found() {
        let written = not_found_response(&NotFoundResponder::new()).await.unwrap();

        assert!(written.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(written.contains("content-length: 9\r\n"));
        assert!(written.ends_with("\r\n\r\nnot found"));
    }

    #[tokio::test]
    async fn dynamic_not_found_preferred() {
        let responder = NotFoundResponder::new().handler(sync_handler(|req, resp| {
            resp.body(req.target());
            Ok(())
        }));
        let written = not_found_response(&responder).await.unwrap();

        assert!(written.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(written.ends_with("\r\n\r\n/missing"));
    }

    #[tokio::test]
    async fn disabled_not_found() {
        let result = not_found_response(&NotFoundResponder::disabled()).await;
        assert!(matches!(result, Err(ResponderError::NotFound)));
    }

    #[tokio::test]
    async fn json_errors() {
        #[rustfmt::skip]
        let cases = [
            (
                ResponderError::from(HandlerError::new("boom")),
                "200 OK",
                r#"{"error":true,"reason":"boom"}"#,
            ),
            (
                ResponderError::from(HandlerError::new("say \"hi\"\n")),
                "200 OK",
                r#"{"error":true,"reason":"say \"hi\"\n"}"#,
            ),
            (
                ResponderError::from(RequestParseError::InvalidStartLine),
                "400 Bad Request",
                r#"{"error":true,"reason":"INVALID_START_LINE"}"#,
            ),
            (
                ResponderError::NotFound,
                "200 OK",
                r#"{"error":true,"reason":"not found"}"#,
            ),
        ];

        for (error, status, body) in cases {
            let written = error_response(&ErrorResponder::new(), error).await;

            assert!(written.starts_with(&format!("HTTP/1.1 {status}\r\n")), "{written}");
            assert!(written.contains("content-type: application/json\r\n"));
            assert!(!written.contains("x-partial"));
            assert!(written.ends_with(body), "{written}");
        }
    }

    #[tokio::test]
    async fn configured_status_and_custom_render() {
        let responder = ErrorResponder::new().with_status(StatusCode::InternalServerError);
        let written = error_response(&responder, HandlerError::new("boom").into()).await;
        assert!(written.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));

        let responder = ErrorResponder::custom(|error, req, resp| {
            resp.header("x-target", req.target()).body(error.reason());
        })
        .with_status(StatusCode::BadGateway);
        let written = error_response(&responder, HandlerError::new("upstream").into()).await;

        assert!(written.starts_with("HTTP/1.1 502 Bad Gateway\r\nx-target: /x\r\n"));
        assert!(written.ends_with("\r\n\r\nupstream"));
    }

    #[tokio::test]
    async fn disabled_writes_nothing() {
        let responder = ErrorResponder::disabled();
        assert!(!responder.is_enabled());

        let written = error_response(&responder, HandlerError::new("boom").into()).await;
        assert!(written.is_empty());
    }
}
