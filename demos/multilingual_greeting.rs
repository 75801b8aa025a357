use maker_router::{Args, HandlerResult, Method, Registry, Request, Response, RouteDescriptor, Server, StatusCode};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn json(status: StatusCode, body: &str) -> Response {
    Response::new(status)
        .with_header("Content-Type", "application/json")
        .with_body(body)
}

async fn greet(_: Request, args: Args) -> HandlerResult {
    let text = match args.str("lang").unwrap_or_default() {
        "en" => r#"{"lang": "en", "text": "Hello, world!"}"#,
        "zh" => r#"{"lang": "zh", "text": "你好世界！"}"#,
        "es" => r#"{"lang": "es", "text": "¡Hola Mundo!"}"#,
        "ar" => r#"{"lang": "ar", "text": "مرحبا بالعالم!"}"#,
        "pt" => r#"{"lang": "pt", "text": "Olá, mundo!"}"#,
        "hi" => r#"{"lang": "hi", "text": "हैलो वर्ल्ड!"}"#,
        "ru" => r#"{"lang": "ru", "text": "Привет, мир!"}"#,
        _ => {
            return Ok(json(
                StatusCode::NotFound,
                r#"{"error": "Language not supported", "status": "Not Found"}"#,
            ))
        }
    };

    Ok(json(StatusCode::Ok, text))
}

async fn languages(_: Request, _: Args) -> HandlerResult {
    Ok(json(
        StatusCode::Ok,
        r#"{"supported_lang": ["en", "zh", "es", "ar", "pt", "hi", "ru"]}"#,
    ))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = Registry::from_routes([
        RouteDescriptor::path(Method::Get, "/api", languages),
        RouteDescriptor::pattern(Method::Get, "/api/{lang}", greet).patterns(["[a-z]{2}"]),
    ])
    .unwrap();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .registry(registry)
        .build()
        .launch()
        .await;
}
