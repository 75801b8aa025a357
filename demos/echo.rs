use maker_router::{Args, HandlerResult, Method, Registry, Request, Response, RouteDescriptor, Server, StatusCode};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Streams the request body straight back, keeping its declared length.
async fn echo(mut req: Request, _: Args) -> HandlerResult {
    let length = req.length();
    let content_type = req.header("Content-Type").map(str::to_owned);

    let mut resp = match req.take_body() {
        Some(body) => Response::new(StatusCode::Ok).with_stream(body, length),
        None => Response::new(StatusCode::NoContent),
    };
    if let Some(value) = content_type {
        resp.set_content_type(value);
    }
    Ok(resp)
}

async fn echo_path(req: Request, _: Args) -> HandlerResult {
    let result = format!(r#"{{"url": {:?}}}"#, req.path());

    Ok(Response::new(StatusCode::Ok)
        .with_header("Content-Type", "application/json")
        .with_body(result))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = Registry::from_routes([
        RouteDescriptor::pattern(Method::Post, "^/.*", echo),
        RouteDescriptor::pattern(Method::Put, "^/.*", echo),
        RouteDescriptor::pattern(Method::Get, "^/.*", echo_path),
    ])
    .unwrap();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .registry(registry)
        .build()
        .launch()
        .await;
}
