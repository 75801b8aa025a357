use maker_router::{
    Args, Controller, HandlerError, Method, Registry, Request, Response, RouteDescriptor, Server, StatusCode,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Counter {
    requests: AtomicUsize,
}

impl Counter {
    fn json(&self) -> Response {
        Response::new(StatusCode::Ok)
            .with_header("Content-Type", "application/json")
            .with_body(format!(
                r#"{{"count_request": {}}}"#,
                self.requests.load(Ordering::Relaxed)
            ))
    }
}

impl Controller for Counter {
    fn routes(self: Arc<Self>) -> Vec<RouteDescriptor> {
        let hit = self.clone();
        let reset = self.clone();

        vec![
            RouteDescriptor::path(Method::Get, "/", move |_: Request, _: Args| {
                hit.requests.fetch_add(1, Ordering::Relaxed);
                let resp = hit.json();
                async move { Ok::<_, HandlerError>(resp) }
            }),
            RouteDescriptor::path(Method::Delete, "/", move |_: Request, _: Args| {
                reset.requests.store(0, Ordering::Relaxed);
                let resp = reset.json();
                async move { Ok::<_, HandlerError>(resp) }
            }),
            RouteDescriptor::path(Method::Get, "/peek", move |_: Request, _: Args| {
                let resp = self.json();
                async move { Ok::<_, HandlerError>(resp) }
            }),
        ]
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut registry = Registry::new();
    registry.controller(Arc::new(Counter::default())).unwrap();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .registry(registry)
        .build()
        .launch()
        .await;
}
