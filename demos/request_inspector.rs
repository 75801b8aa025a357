use maker_router::{
    Args, HandlerError, HandlerResult, Method, Registry, RegistryHandle, Request, Response, RouteDescriptor, Server,
    StatusCode, WeakRegistryHandle,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

async fn inspect(mut req: Request, _: Args) -> HandlerResult {
    let body = match req.take_body() {
        Some(mut body) => body.read_all().await?,
        None => Vec::new(),
    };

    let user_agent = match req.header("user-agent") {
        Some(value) => format!(r#", "user_agent": {value:?}"#),
        None => String::new(),
    };
    let content_type = match req.header("content-type") {
        Some(value) => format!(r#", "content_type": {value:?}"#),
        None => String::new(),
    };
    let query: Vec<(&str, &str)> = req.query_params(32).unwrap_or_default();

    let result = format!(
        r#"{{"method": "{}", "path": {:?}, "query": {query:?}{user_agent}{content_type}, "body": {:?}}}"#,
        req.method(),
        req.path(),
        String::from_utf8_lossy(&body),
    );

    Ok(Response::new(StatusCode::Ok)
        .with_header("Content-Type", "application/json")
        .with_body(result))
}

async fn maintenance(_: Request, _: Args) -> HandlerResult {
    Ok(Response::new(StatusCode::ServiceUnavailable).with_body("Down for maintenance"))
}

/// Builds the route table; `POST /maintenance` swaps in the opposite one.
fn routes(handle: WeakRegistryHandle, under_maintenance: bool) -> Registry {
    let toggle = move |_: Request, _: Args| {
        if let Some(live) = handle.upgrade() {
            live.swap(routes(handle.clone(), !under_maintenance));
        }

        let text = match under_maintenance {
            true => "maintenance off",
            false => "maintenance on",
        };
        async move { Ok::<_, HandlerError>(Response::new(StatusCode::Ok).with_body(text)) }
    };

    let mut registry = Registry::new();
    registry
        .register(RouteDescriptor::path(Method::Post, "/maintenance", toggle))
        .unwrap();
    if under_maintenance {
        registry
            .register(RouteDescriptor::pattern(Method::Get, "^/.*", maintenance))
            .unwrap();
    }
    for method in [Method::Get, Method::Post, Method::Put, Method::Delete] {
        registry
            .register(RouteDescriptor::pattern(method, "^/.*", inspect))
            .unwrap();
    }
    registry
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let handle = RegistryHandle::new(Registry::new());
    handle.swap(routes(handle.downgrade(), false));

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .registry(handle)
        .build()
        .launch()
        .await;
}
