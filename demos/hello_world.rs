use maker_router::{Args, HandlerResult, Method, Registry, Request, Response, RouteDescriptor, Server, StatusCode};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

async fn hello_world(_: Request, _: Args) -> HandlerResult {
    let mut resp = Response::new(StatusCode::Ok).with_body("Hello, world!");
    resp.set_content_type("text/plain");
    Ok(resp)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = Registry::from_routes([RouteDescriptor::path(Method::Get, "/", hello_world)]).unwrap();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .registry(registry)
        .build()
        .launch()
        .await;
}
