use std::{
    future::{ready, Future},
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use switchyard::{
    sync_handler, sync_middleware, DynamicRoute, ErrorResponder, Flow, HandlerError, Method,
    NotFoundResponder, ResponderError, RouteGroup, RoutePath, Router, Socket, StaticResponse,
    StaticRoute, StatusCode, Tier, HTTP_DATE_LEN,
};

#[derive(Debug, Default)]
struct Trace {
    written: Mutex<Vec<u8>>,
    shutdowns: AtomicUsize,
    closes: AtomicUsize,
}

impl Trace {
    fn written(&self) -> String {
        String::from_utf8(self.written.lock().unwrap().clone()).unwrap()
    }
}

/// Serves a fixed request, then end of stream.
struct Loopback {
    input: Vec<u8>,
    position: usize,
    trace: Arc<Trace>,
}

impl Loopback {
    fn new(raw: &str) -> (Self, Arc<Trace>) {
        let trace = Arc::new(Trace::default());
        let socket = Self {
            input: raw.as_bytes().to_vec(),
            position: 0,
            trace: trace.clone(),
        };
        (socket, trace)
    }
}

impl Socket for Loopback {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rest = &self.input[self.position..];
        let len = rest.len().min(buf.len());
        buf[..len].copy_from_slice(&rest[..len]);
        self.position += len;
        Ok(len)
    }

    fn readable(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        ready(Ok(()))
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.trace.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn writable(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        ready(Ok(()))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.trace.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for Loopback {
    fn drop(&mut self) {
        self.trace.closes.fetch_add(1, Ordering::SeqCst);
    }
}

async fn exchange(router: &Router, raw: &str) -> (Result<Tier, ResponderError>, String) {
    let (socket, trace) = Loopback::new(raw);
    let result = router.respond(socket).await;

    assert_eq!(trace.shutdowns.load(Ordering::SeqCst), 1, "{raw:?}");
    assert_eq!(trace.closes.load(Ordering::SeqCst), 1, "{raw:?}");
    (result, trace.written())
}

/// Answers with the captured parameters joined by commas.
fn echo_params(method: Method, path: &str) -> DynamicRoute {
    DynamicRoute::parse(
        method,
        path,
        sync_handler(|_, resp| {
            let params: Vec<String> = resp
                .params()
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect();
            resp.body(params.join(","));
            Ok(())
        }),
    )
    .unwrap()
}

fn tagged(path: &str, tag: &'static str) -> DynamicRoute {
    DynamicRoute::parse(
        Method::Get,
        path,
        sync_handler(move |_, resp| {
            resp.body(tag);
            Ok(())
        }),
    )
    .unwrap()
}

fn body(written: &str) -> &str {
    written.split_once("\r\n\r\n").map_or("", |(_, body)| body)
}

#[tokio::test]
async fn static_html_start_line() {
    let html = "<h1>Привет</h1>";
    let router = Router::builder()
        .static_route(
            StaticRoute::new(Method::Get, "/html")
                .unwrap()
                .content_type("text/html")
                .body(html),
        )
        .build();

    let (result, written) = exchange(&router, "GET /html HTTP/1.1\r\nHost: x\r\n\r\n").await;

    assert_eq!(result.unwrap(), Tier::Static);
    assert!(written.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(written.contains(&format!("content-length: {}\r\n", html.len())));
    assert!(written.contains("content-length: 21\r\n"));
    assert_eq!(body(&written), html);
}

#[tokio::test]
async fn dynamic_parameter_capture() {
    let seen = Arc::new(Mutex::new(None));
    let slot = seen.clone();

    let router = Router::builder()
        .route(
            DynamicRoute::parse(
                Method::Get,
                "/users/:id",
                sync_handler(move |_, resp| {
                    *slot.lock().unwrap() = resp.param(0).map(<[u8]>::to_vec);
                    Ok(())
                }),
            )
            .unwrap(),
        )
        .build();

    let (result, _) = exchange(&router, "GET /users/7 HTTP/1.1\r\n\r\n").await;

    assert_eq!(result.unwrap(), Tier::Dynamic);
    assert_eq!(seen.lock().unwrap().as_deref(), Some(&b"7"[..]));
}

#[tokio::test]
async fn configured_not_found() {
    let router = Router::builder()
        .static_route(StaticRoute::get("/html").unwrap().body("hi"))
        .not_found(NotFoundResponder::new().response(
            StaticResponse::new()
                .status(StatusCode::NotFound)
                .body("not found"),
        ))
        .build();

    let (result, written) = exchange(&router, "GET /nope HTTP/1.1\r\n\r\n").await;

    assert_eq!(result.unwrap(), Tier::NotFound);
    assert!(written.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(body(&written), "not found");
}

#[tokio::test]
async fn path_matching() {
    // Longer than a single literal component holds.
    let long = "abcdefghij".repeat(7);

    let router = Router::builder()
        .route(tagged("a/b", "literal"))
        .route(DynamicRoute::new(
            Method::Get,
            RoutePath::parse("Docs/Index", false).unwrap(),
            sync_handler(|_, resp| {
                resp.body("docs");
                Ok(())
            }),
        ))
        .route(echo_params(Method::Get, "users/:id"))
        .route(echo_params(Method::Get, "files/**"))
        .route(echo_params(Method::Get, "{name}.zip"))
        .route(echo_params(Method::Get, "v/{major}.{minor}/notes"))
        .route(DynamicRoute::new(
            Method::Get,
            RoutePath::parse("Users/:id", false).unwrap(),
            sync_handler(|_, resp| {
                let id = resp.param_str(0).unwrap_or_default().to_string();
                resp.body(format!("ci:{id}"));
                Ok(())
            }),
        ))
        .route(tagged("search?debug&lang=en", "search"))
        .route(tagged("items/?", "items"))
        .route(tagged(&format!("long/{long}"), "long"))
        .build();

    let long_hit = format!("GET /long/{long} HTTP/1.1");
    let long_short = format!("GET /long/{} HTTP/1.1", &long[..69]);
    let long_past = format!("GET /long/{long}x HTTP/1.1");
    let long_upper = format!("GET /long/{}Z HTTP/1.1", &long[..69]);

    #[rustfmt::skip]
    let cases = [
        ("GET /a/b HTTP/1.1",              Some("literal")),
        ("GET /a/B HTTP/1.1",              None),
        ("GET /a HTTP/1.1",                None),
        ("GET /a/b/c HTTP/1.1",            None),
        ("POST /a/b HTTP/1.1",             None),
        ("GET /docs/INDEX HTTP/1.1",       Some("docs")),
        ("GET /users/42 HTTP/1.1",         Some("42")),
        ("GET /users/42?x=1 HTTP/1.1",     Some("42")),
        ("GET /files/a HTTP/1.1",          Some("a")),
        ("GET /files/a/b/c HTTP/1.1",      Some("a,b,c")),
        ("GET /archive.zip HTTP/1.1",      Some("archive")),
        ("GET /archive.tar HTTP/1.1",      None),
        ("GET /v/1.2/notes HTTP/1.1",      Some("1,2")),
        ("GET /USERS/AbC HTTP/1.1",        Some("ci:AbC")),
        ("GET /uSeRs/x-Y HTTP/1.1",        Some("ci:x-Y")),
        ("GET /users/AbC HTTP/1.1",        Some("AbC")),
        ("GET /search?debug HTTP/1.1",     Some("search")),
        ("GET /search?page=2&lang=en HTTP/1.1", Some("search")),
        ("GET /search?lang=en&x=1 HTTP/1.1",    Some("search")),
        ("GET /search?page=2 HTTP/1.1",    None),
        ("GET /search?lang=fr HTTP/1.1",   None),
        ("GET /search?debugx HTTP/1.1",    None),
        ("GET /search HTTP/1.1",           None),
        ("GET /items? HTTP/1.1",           Some("items")),
        ("GET /items?a=1 HTTP/1.1",        Some("items")),
        ("GET /items HTTP/1.1",            None),
        (long_hit.as_str(),                Some("long")),
        (long_short.as_str(),              None),
        (long_past.as_str(),               None),
        (long_upper.as_str(),              None),
    ];

    for (start_line, expected) in cases {
        let (result, written) = exchange(&router, &format!("{start_line}\r\n\r\n")).await;
        let tier = result.unwrap();

        match expected {
            Some(expected) => {
                assert_eq!(tier, Tier::Dynamic, "{start_line}");
                assert_eq!(body(&written), expected, "{start_line}");
            }
            None => assert_eq!(tier, Tier::NotFound, "{start_line}"),
        }
    }
}

#[tokio::test]
async fn literal_routes_take_precedence() {
    let router = Router::builder()
        .route(tagged("a/:x", "parameter"))
        .route(tagged("a/b", "literal"))
        .build();

    let (_, written) = exchange(&router, "GET /a/b HTTP/1.1\r\n\r\n").await;
    assert_eq!(body(&written), "literal");

    let (_, written) = exchange(&router, "GET /a/c HTTP/1.1\r\n\r\n").await;
    assert_eq!(body(&written), "parameter");
}

#[tokio::test]
async fn static_output_is_repeatable() {
    let router = Router::builder()
        .static_route(
            StaticRoute::get("/time")
                .unwrap()
                .with_date(true)
                .body("tick"),
        )
        .build();

    let mask = |written: String| {
        let at = written.find("date: ").unwrap() + "date: ".len();
        let mut bytes = written.into_bytes();
        bytes[at..at + HTTP_DATE_LEN].fill(b'#');
        bytes
    };

    let (_, first) = exchange(&router, "GET /time HTTP/1.1\r\n\r\n").await;
    let (_, second) = exchange(&router, "GET /time HTTP/1.1\r\n\r\n").await;

    assert!(first.ends_with(" GMT\r\nconnection: close\r\n\r\ntick"));
    assert_eq!(mask(first), mask(second));
}

#[tokio::test]
async fn stopping_middleware_skips_the_rest() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let router = Router::builder()
        .middleware(sync_middleware(|_, resp| {
            resp.header("x-first", "1");
            Ok(Flow::Continue)
        }))
        .middleware(sync_middleware(|_, resp| {
            resp.status(StatusCode::Forbidden).body("denied");
            Ok(Flow::Stop)
        }))
        .middleware(sync_middleware(|_, resp| {
            resp.header("x-third", "1");
            Ok(Flow::Continue)
        }))
        .route(
            DynamicRoute::parse(
                Method::Get,
                "secret",
                sync_handler(move |_, resp| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    resp.body("secret");
                    Ok(())
                }),
            )
            .unwrap(),
        )
        .build();

    let (result, written) = exchange(&router, "GET /secret HTTP/1.1\r\n\r\n").await;

    assert_eq!(result.unwrap(), Tier::Dynamic);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(written.starts_with("HTTP/1.1 403 Forbidden\r\nx-first: 1\r\n"));
    assert!(!written.contains("x-third"));
    assert_eq!(body(&written), "denied");
}

#[tokio::test]
async fn handler_errors_are_answered_or_closed() {
    let failing = || {
        DynamicRoute::parse(
            Method::Get,
            "fail",
            sync_handler(|_, resp| {
                resp.header("x-partial", "1");
                Err(HandlerError::new("boom"))
            }),
        )
        .unwrap()
    };

    let router = Router::builder().route(failing()).build();
    let (result, written) = exchange(&router, "GET /fail HTTP/1.1\r\n\r\n").await;

    assert_eq!(result.unwrap(), Tier::Error);
    assert!(!written.contains("x-partial"));
    assert_eq!(body(&written), r#"{"error":true,"reason":"boom"}"#);

    let router = Router::builder()
        .route(failing())
        .error_responder(ErrorResponder::disabled())
        .build();
    let (result, written) = exchange(&router, "GET /fail HTTP/1.1\r\n\r\n").await;

    assert!(matches!(result, Err(ResponderError::Handler(_))));
    assert!(written.is_empty());
}

#[tokio::test]
async fn malformed_requests() {
    let router = Router::builder()
        .static_route(StaticRoute::get("/").unwrap().body("home"))
        .build();

    #[rustfmt::skip]
    let cases = [
        ("GET\r\n\r\n",                        "HTTP/1.1 400 Bad Request\r\n"),
        ("GET index.html HTTP/1.1\r\n\r\n",    "HTTP/1.1 400 Bad Request\r\n"),
    ];

    for (raw, status) in cases {
        let (result, written) = exchange(&router, raw).await;

        assert_eq!(result.unwrap(), Tier::Error, "{raw:?}");
        assert!(written.starts_with(status), "{raw:?}: {written}");
        assert!(body(&written).starts_with(r#"{"error":true,"reason":""#));
    }

    // The peer went away before finishing the head: nothing to answer.
    for raw in ["", "GET / HTTP/1.1\r\n"] {
        let (result, written) = exchange(&router, raw).await;
        assert!(result.unwrap_err().is_fatal(), "{raw:?}");
        assert!(written.is_empty());
    }
}

#[tokio::test]
async fn one_teardown_per_outcome() {
    let router = Router::builder()
        .static_route(StaticRoute::get("/static").unwrap().body("s"))
        .route(tagged("dynamic", "d"))
        .route(
            DynamicRoute::parse(
                Method::Get,
                "fail",
                sync_handler(|_, _| Err(HandlerError::new("boom"))),
            )
            .unwrap(),
        )
        .group(
            RouteGroup::new("grouped")
                .unwrap()
                .route(tagged("inner", "g"))
                .unwrap(),
        )
        .build();

    #[rustfmt::skip]
    let cases = [
        ("GET /static HTTP/1.1\r\n\r\n",        Some(Tier::Static)),
        ("GET /dynamic HTTP/1.1\r\n\r\n",       Some(Tier::Dynamic)),
        ("GET /grouped/inner HTTP/1.1\r\n\r\n", Some(Tier::Group)),
        ("GET /missing HTTP/1.1\r\n\r\n",       Some(Tier::NotFound)),
        ("GET /fail HTTP/1.1\r\n\r\n",          Some(Tier::Error)),
        ("",                                    None),
    ];

    // `exchange` asserts a single shutdown and close for each.
    for (raw, expected) in cases {
        let (result, _) = exchange(&router, raw).await;
        assert_eq!(result.ok(), expected, "{raw:?}");
    }
}

#[tokio::test]
async fn runtime_registration() {
    let router = Router::builder().mutable(true).build();

    let (result, _) = exchange(&router, "GET /late HTTP/1.1\r\n\r\n").await;
    assert_eq!(result.unwrap(), Tier::NotFound);

    router.insert_static(StaticRoute::get("/late").unwrap().body("here")).unwrap();
    let (result, written) = exchange(&router, "GET /late HTTP/1.1\r\n\r\n").await;
    assert_eq!(result.unwrap(), Tier::Static);
    assert_eq!(body(&written), "here");

    assert_eq!(router.remove(Method::Get, "/late").unwrap(), 1);
    let (result, _) = exchange(&router, "GET /late HTTP/1.1\r\n\r\n").await;
    assert_eq!(result.unwrap(), Tier::NotFound);
}
