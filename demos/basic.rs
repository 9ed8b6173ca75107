use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use switchyard::{
    async_handler, sync_handler, sync_middleware, DynamicRoute, ErrorResponder, Flow,
    HandlerError, Method, NotFoundResponder, RouteGroup, Router, Server, StaticRoute, StatusCode,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let visits = Arc::new(AtomicUsize::new(0));
    let counter = visits.clone();

    let admin = RouteGroup::new("admin")?
        .condition(|req| req.query(b"token") == Some(&b"secret"[..]))
        .middleware(sync_middleware(|_, resp| {
            resp.header("cache-control", "no-store");
            Ok(Flow::Continue)
        }))
        .route(DynamicRoute::parse(
            Method::Get,
            "visits",
            sync_handler(move |_, resp| {
                resp.body(visits.load(Ordering::Relaxed));
                Ok(())
            }),
        )?)?;

    let router = Router::builder()
        .static_route(
            StaticRoute::get("/")?
                .content_type("text/html")
                .with_date(true)
                .body("<h1>Hello from switchyard!</h1>"),
        )
        .middleware(sync_middleware(move |_, resp| {
            counter.fetch_add(1, Ordering::Relaxed);
            resp.header("server", "switchyard");
            Ok(Flow::Continue)
        }))
        .route(DynamicRoute::parse(
            Method::Get,
            "greet/:name",
            sync_handler(|_, resp| {
                let name = resp.param_str(0).unwrap_or_default().to_string();
                resp.header("content-type", "text/plain")
                    .body(format!("Hello, {name}!"));
                Ok(())
            }),
        )?)
        .route(DynamicRoute::parse(
            Method::Get,
            "downloads/{file}.zip",
            sync_handler(|_, resp| {
                let file = resp.param_str(0).unwrap_or_default().to_string();
                resp.body(format!("archive `{file}` is not ready yet"));
                Ok(())
            }),
        )?)
        .route(DynamicRoute::parse(
            Method::Post,
            "echo",
            async_handler(|req, mut resp| async move {
                if req.body().is_empty() {
                    return Err(HandlerError::new("empty body"));
                }
                resp.status(StatusCode::Created).body(req.body());
                Ok(resp)
            }),
        )?)
        .group(admin)
        .not_found(NotFoundResponder::new().handler(sync_handler(|req, resp| {
            resp.header("content-type", "application/json")
                .body_with(|w| {
                    w.write(r#"{"missing":""#);
                    w.write(req.target());
                    w.write(r#""}"#);
                });
            Ok(())
        })))
        .error_responder(ErrorResponder::new().with_status(StatusCode::UnprocessableEntity))
        .build();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await?)
        .router(router)
        .build()
        .run_until_signal()
        .await?;

    Ok(())
}
