//! maker_router - HTTP/1.1 wire layer with a regex route dispatcher
//!
//! Parses requests from any duplex byte stream, resolves them against a
//! table of literal and pattern routes, invokes the bound handler with its
//! typed parameters and writes the framed response back.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1** start lines and header blocks, CRLF terminated, UTF-8
//! - Bodies framed by `Content-Length` or read until end of stream
//! - One request per connection: no keep-alive, no pipelining
//!
//! # Request cycle
//!
//! ```text
//! stream ──> read_request_head ──> Exchange ──> Registry::resolve ──> Handler
//!                                                                       │
//! stream <──────────────── HttpWriter <──────────── Response <──────────┘
//! ```
//!
//! Every failure maps to exactly one outcome, see [`Error::status`]:
//! a status-only response (`400`, `404`, `413`, `431`, `500`) or a closed
//! connection.
//!
//! # Routing
//!
//! For a request method, a **direct** route whose path equals the target
//! wins. Otherwise the first **pattern** route that matches the whole
//! target is taken, then the first one found anywhere in it. Patterns are
//! regular expressions with `{name}` placeholders, each bound to a
//! [`ParamKind`] and handed to the handler through [`Args`].
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use maker_router::{Args, HandlerResult, Method, Registry, Request, Response, RouteDescriptor, Server, StatusCode};
//! use tokio::net::TcpListener;
//!
//! async fn hello(_: Request, _: Args) -> HandlerResult {
//!     Ok(Response::new(StatusCode::Ok).with_body("Hello World!"))
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Registry::from_routes([RouteDescriptor::path(Method::Get, "/", hello)]).unwrap();
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .registry(registry)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//! Typed pattern parameters:
//! ```no_run
//! use maker_router::{Args, HandlerResult, Method, ParamKind, Registry, Request, Response, RouteDescriptor, Server, StatusCode};
//! use tokio::net::TcpListener;
//!
//! async fn post(_: Request, args: Args) -> HandlerResult {
//!     let user = args.str("user").unwrap_or_default();
//!     let id = args.long("id").unwrap_or_default();
//!     Ok(Response::new(StatusCode::Ok).with_body(format!("post {id} of {user}")))
//! }
//!
//! async fn echo(mut req: Request, _: Args) -> HandlerResult {
//!     let length = req.length();
//!     match req.take_body() {
//!         Some(body) => Ok(Response::new(StatusCode::Ok).with_stream(body, length)),
//!         None => Ok(Response::new(StatusCode::NoContent)),
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = Registry::new();
//!     registry
//!         .register(
//!             RouteDescriptor::pattern(Method::Get, "/users/{user}/posts/{id}", post)
//!                 .patterns(["[a-z]+", r"\d+"])
//!                 .params([ParamKind::Str, ParamKind::Long]),
//!         )
//!         .unwrap()
//!         .register(RouteDescriptor::path(Method::Post, "/echo", echo))
//!         .unwrap();
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .registry(registry)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//! Without a server, over any stream:
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use maker_router::{Dispatcher, Registry};
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! let dispatcher = Dispatcher::new(Registry::new());
//! let (mut client, server) = tokio::io::duplex(1024);
//!
//! client.write_all(b"GET /nothing HTTP/1.1\r\n\r\n").await.unwrap();
//! dispatcher.serve(server).await.unwrap();
//!
//! let mut response = String::new();
//! client.read_to_string(&mut response).await.unwrap();
//! assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
//! # }
//! ```
//!
//! # Logging
//!
//! Events are emitted through [`tracing`]; install a subscriber to see them.
//! Route registration and registry swaps log at `INFO`, rejected requests
//! at `WARN`, handler failures at `ERROR` and per-request flow at `DEBUG`.

pub(crate) mod http {
    pub(crate) mod message;
    pub mod query;
    pub(crate) mod reader;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
    pub(crate) mod writer;
}
pub(crate) mod routing {
    pub(crate) mod registry;
    pub(crate) mod route;
}
pub(crate) mod server {
    pub(crate) mod dispatcher;
    pub(crate) mod exchange;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::{Error, HandlerError, HeadLimit, Malformed, RegistrationError},
    http::{
        message::{http_date, Body, Headers, Message, NEVER},
        query,
        reader::{read_request_head, read_response, RequestVisitor},
        request::Request,
        response::Response,
        types::{header, Method, StatusCode, HTTP_VERSION},
        writer::HttpWriter,
    },
    routing::{
        registry::{Controller, Registry, RegistryHandle, Resolved, WeakRegistryHandle},
        route::{
            Args, Handler, HandlerFuture, HandlerResult, MatchKind, Param, ParamKind, Route,
            RouteDescriptor, Value,
        },
    },
    server::{
        dispatcher::Dispatcher,
        exchange::{Exchange, ExchangeState},
        server_impl::{Server, ServerBuilder},
    },
};
