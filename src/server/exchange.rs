//! Single request/response cycle state

use crate::{
    errors::{Error, HandlerError, Malformed},
    http::{
        message::{Body, Headers},
        reader::{declared_length, RequestVisitor},
        request::Request,
        response::Response,
        types::Method,
    },
    limits::ReqLimits,
    routing::{registry::Registry, route::HandlerResult},
};
use std::{
    any::Any,
    future::Future,
    io, mem,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, ReadBuf},
    task::JoinHandle,
    time::Sleep,
};

/// Progress of one [`Exchange`].
///
/// Transitions are strictly sequential:
/// ```text
/// AwaitingStartLine -> AwaitingHeaders -> Resolved -> Invoking -> Responding -> Closed
/// ```
/// A failure may skip straight to `Responding` (status-only response) or
/// `Closed` (fatal), but never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExchangeState {
    AwaitingStartLine,
    AwaitingHeaders,
    Resolved,
    Invoking,
    Responding,
    Closed,
}

/// One request/response cycle over a connection.
///
/// Collects the request head as a [`RequestVisitor`], then resolves the
/// route against the registry snapshot it was created with and invokes
/// the handler. Each exchange serves exactly one request.
///
/// # Examples
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use maker_router::{
///     read_request_head, Args, Exchange, ExchangeState, HandlerResult, Method, Registry,
///     Request, Response, RouteDescriptor, StatusCode, limits::ReqLimits,
/// };
/// use std::sync::Arc;
///
/// async fn hello(_: Request, _: Args) -> HandlerResult {
///     Ok(Response::new(StatusCode::Ok).with_body("hello"))
/// }
///
/// let registry = Registry::from_routes([RouteDescriptor::path(Method::Get, "/", hello)]).unwrap();
/// let mut exchange = Exchange::new(Arc::new(registry));
///
/// let mut wire: &[u8] = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let limits = ReqLimits::default();
/// read_request_head(&mut wire, &mut exchange, &limits).await.unwrap();
/// assert_eq!(exchange.state(), ExchangeState::AwaitingHeaders);
///
/// let response = exchange.respond(wire, &limits).await.unwrap();
/// assert_eq!(response.status(), 200);
/// assert_eq!(exchange.state(), ExchangeState::Invoking);
/// # }
/// ```
#[derive(Debug)]
pub struct Exchange {
    registry: Arc<Registry>,
    state: ExchangeState,

    method: Option<Method>,
    target: String,
    version: String,
    headers: Headers,
}

impl Exchange {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            state: ExchangeState::AwaitingStartLine,

            method: None,
            target: String::new(),
            version: String::new(),
            headers: Headers::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Completes the request with `body_source` and runs the matching handler.
    ///
    /// Must be called once, after the whole head was visited. The body is
    /// attached lazily: `GET` gets none, a declared `Content-Length` limits
    /// it to that many bytes, and anything else is read until end of stream.
    /// Body reads fail once the peer stalls for
    /// [`ReqLimits::body_idle_timeout`] or sends more than
    /// [`ReqLimits::body_size`].
    ///
    /// The handler runs in its own task, so a panic inside it is reported
    /// as a handler failure.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedRequest`] for an unparseable `Content-Length`
    /// - [`Error::PayloadTooLarge`] if the declared length exceeds
    ///   [`ReqLimits::body_size`], or the handler read past it
    /// - [`Error::Io`] with [`io::ErrorKind::TimedOut`] if the handler
    ///   failed on a stalled body
    /// - [`Error::RouteNotFound`], [`Error::ParamMismatch`], [`Error::Coercion`]
    ///   from resolution and binding
    /// - [`Error::Handler`] if the handler fails or panics
    pub async fn respond<R>(&mut self, body_source: R, limits: &ReqLimits) -> Result<Response, Error>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        debug_assert_eq!(self.state, ExchangeState::AwaitingHeaders);

        let method = self.method.take().ok_or(Malformed::StartLine)?;
        let target = mem::take(&mut self.target);

        let (body, length) = match method {
            Method::Get => (None, None),
            _ => match declared_length(&self.headers)? {
                Some(declared) if declared > limits.body_size => {
                    return Err(Error::PayloadTooLarge {
                        declared,
                        limit: limits.body_size,
                    })
                }
                Some(declared) => {
                    let source = BodyGuard::new(body_source.take(declared), limits);
                    (Some(Body::from_reader(source)), Some(declared))
                }
                None => (Some(Body::from_reader(BodyGuard::new(body_source, limits))), None),
            },
        };

        self.state = ExchangeState::Resolved;
        let resolved = self.registry.resolve(&method, &target)?;
        tracing::debug!(
            method = %method,
            uri = target,
            route = resolved.route().source(),
            kind = ?resolved.kind(),
            "route resolved"
        );
        let args = resolved.bind(&target)?;

        let request = Request::with_body(
            method,
            target,
            mem::take(&mut self.version),
            mem::take(&mut self.headers),
            body,
            length,
        );

        self.state = ExchangeState::Invoking;
        let mut invocation = AbortOnDrop(tokio::spawn(resolved.route().invoke(request, args)));
        match (&mut invocation.0).await {
            Ok(result) => result.map_err(handler_failure),
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic());
                Err(Error::Handler(format!("handler panicked: {message}").into()))
            }
            Err(err) => Err(Error::Handler(err.into())),
        }
    }

    #[inline]
    pub(crate) fn start_responding(&mut self) {
        self.state = ExchangeState::Responding;
    }

    /// Marks the exchange finished. Idempotent.
    #[inline]
    pub fn close(&mut self) {
        self.state = ExchangeState::Closed;
    }
}

/// Aborts the handler task if the exchange is dropped mid-invocation.
struct AbortOnDrop(JoinHandle<HandlerResult>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast_ref::<&'static str>() {
            Some(message) => (*message).to_owned(),
            None => "non-string panic payload".to_owned(),
        },
    }
}

/// Maps a handler error caused by its request body back to the body failure.
fn handler_failure(err: HandlerError) -> Error {
    let fault = err
        .downcast_ref::<io::Error>()
        .and_then(|err| err.get_ref())
        .and_then(|inner| inner.downcast_ref::<BodyFault>());

    match fault {
        Some(BodyFault::TimedOut) => Error::timed_out("request body read timed out"),
        Some(&BodyFault::TooLarge { read, limit }) => Error::PayloadTooLarge {
            declared: read,
            limit,
        },
        None => Error::Handler(err),
    }
}

#[derive(Debug, thiserror::Error)]
enum BodyFault {
    #[error("request body read timed out")]
    TimedOut,
    #[error("request body exceeds {limit} bytes")]
    TooLarge { read: u64, limit: u64 },
}

/// Request body source with a size cap and an idle timeout.
///
/// The idle clock starts when a read has to wait and stops on progress,
/// so time the handler spends elsewhere is not counted.
struct BodyGuard<R> {
    inner: R,
    read: u64,
    limit: u64,
    idle: Duration,
    stall: Option<Pin<Box<Sleep>>>,
}

impl<R> BodyGuard<R> {
    fn new(inner: R, limits: &ReqLimits) -> Self {
        Self {
            inner,
            read: 0,
            limit: limits.body_size,
            idle: limits.body_idle_timeout,
            stall: None,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BodyGuard<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.stall = None;
                this.read += (buf.filled().len() - before) as u64;
                if this.read > this.limit {
                    let fault = BodyFault::TooLarge {
                        read: this.read,
                        limit: this.limit,
                    };
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::InvalidData, fault)));
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => {
                let idle = this.idle;
                let stall = this
                    .stall
                    .get_or_insert_with(|| Box::pin(tokio::time::sleep(idle)));

                match stall.as_mut().poll(cx) {
                    Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        BodyFault::TimedOut,
                    ))),
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }
}

impl RequestVisitor for Exchange {
    fn visit_request(&mut self, method: Method, target: &str, version: &str) -> Result<(), Error> {
        debug_assert_eq!(self.state, ExchangeState::AwaitingStartLine);

        self.method = Some(method);
        self.target.push_str(target);
        self.version.push_str(version);
        self.state = ExchangeState::AwaitingHeaders;
        Ok(())
    }

    fn visit_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        debug_assert_eq!(self.state, ExchangeState::AwaitingHeaders);

        self.headers.insert(name, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::{reader::read_request_head, types::StatusCode},
        routing::route::{Args, HandlerResult, ParamKind, RouteDescriptor},
    };

    async fn echo(mut request: Request, _: Args) -> HandlerResult {
        let body = match request.take_body() {
            Some(mut body) => body.read_all().await?,
            None => b"<none>".to_vec(),
        };
        Ok(Response::new(StatusCode::Ok).with_body(body))
    }

    async fn headers(request: Request, _: Args) -> HandlerResult {
        let lines: Vec<String> = request
            .headers()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        Ok(Response::new(StatusCode::Ok).with_body(lines.join(",")))
    }

    async fn user(_: Request, args: Args) -> HandlerResult {
        Ok(Response::new(StatusCode::Ok).with_body(format!("{:?}", args.int("id"))))
    }

    async fn fail(_: Request, _: Args) -> HandlerResult {
        Err("database is down".into())
    }

    async fn explode(_: Request, _: Args) -> HandlerResult {
        panic!("unreachable branch taken")
    }

    fn registry() -> Arc<Registry> {
        Arc::new(
            Registry::from_routes([
                RouteDescriptor::path(Method::Post, "/echo", echo),
                RouteDescriptor::path(Method::Get, "/echo", echo),
                RouteDescriptor::path(Method::Get, "/headers", headers),
                RouteDescriptor::pattern(Method::Get, "/user/{id}", user).params([ParamKind::Int]),
                RouteDescriptor::path(Method::Get, "/fail", fail),
                RouteDescriptor::path(Method::Get, "/panic", explode),
            ])
            .unwrap(),
        )
    }

    async fn run(wire: &'static [u8], limits: &ReqLimits) -> (ExchangeState, Result<Response, Error>) {
        let mut exchange = Exchange::new(registry());
        let mut reader = wire;

        if let Err(err) = read_request_head(&mut reader, &mut exchange, limits).await {
            return (exchange.state(), Err(err));
        }
        let result = exchange.respond(reader, limits).await;
        (exchange.state(), result)
    }

    async fn body_of(result: Result<Response, Error>) -> String {
        let mut response = result.unwrap();
        let body = response.body().unwrap().read_all().await.unwrap();
        String::from_utf8(body).unwrap()
    }

    #[tokio::test]
    async fn body_framing() {
        let limits = ReqLimits::default();

        #[rustfmt::skip]
        let cases: [(&'static [u8], &str); 4] = [
            (b"POST /echo HTTP/1.1\r\nContent-Length: 4\r\n\r\npingEXTRA", "ping"),
            (b"POST /echo HTTP/1.1\r\n\r\nuntil the end",                  "until the end"),
            (b"GET /echo HTTP/1.1\r\nContent-Length: 4\r\n\r\nping",     "<none>"),
            (b"POST /echo HTTP/1.1\r\nContent-Length: 0\r\n\r\nping",    ""),
        ];

        for (wire, expected) in cases {
            let (state, result) = run(wire, &limits).await;
            assert_eq!(state, ExchangeState::Invoking);
            assert_eq!(body_of(result).await, expected);
        }
    }

    #[tokio::test]
    async fn headers_in_wire_order() {
        let (_, result) = run(
            b"GET /headers HTTP/1.1\r\nB: 2\r\nA: 1\r\nb: 3\r\nContent-Length: 9\r\n\r\n",
            &ReqLimits::default(),
        )
        .await;

        assert_eq!(body_of(result).await, "B=3,A=1");
    }

    #[tokio::test]
    async fn binds_params() {
        let (_, result) = run(b"GET /user/42 HTTP/1.1\r\n\r\n", &ReqLimits::default()).await;
        assert_eq!(body_of(result).await, "Some(42)");

        let (state, result) = run(b"GET /user/abc HTTP/1.1\r\n\r\n", &ReqLimits::default()).await;
        assert_eq!(state, ExchangeState::Resolved);
        assert!(matches!(result, Err(Error::Coercion { .. })));
    }

    #[tokio::test]
    async fn failures() {
        let limits = ReqLimits {
            body_size: 8,
            ..ReqLimits::default()
        };

        macro_rules! assert_fails {
            ($wire:expr, $state:expr, $pattern:pat) => {
                let (state, result) = run($wire, &limits).await;
                assert_eq!(state, $state, "{:?}", $wire);
                assert!(matches!(result, Err($pattern)), "{result:?}");
            };
        }

        assert_fails!(b"GET /missing HTTP/1.1\r\n\r\n", ExchangeState::Resolved, Error::RouteNotFound { .. });
        assert_fails!(b"DELETE /echo HTTP/1.1\r\n\r\n", ExchangeState::Resolved, Error::RouteNotFound { .. });
        assert_fails!(b"GET /fail HTTP/1.1\r\n\r\n", ExchangeState::Invoking, Error::Handler(_));
        assert_fails!(
            b"POST /echo HTTP/1.1\r\n\r\nnine bytes",
            ExchangeState::Invoking,
            Error::PayloadTooLarge { limit: 8, .. }
        );
        assert_fails!(
            b"POST /echo HTTP/1.1\r\nContent-Length: 9\r\n\r\n",
            ExchangeState::AwaitingHeaders,
            Error::PayloadTooLarge { declared: 9, limit: 8 }
        );
        assert_fails!(
            b"POST /echo HTTP/1.1\r\nContent-Length: nine\r\n\r\n",
            ExchangeState::AwaitingHeaders,
            Error::MalformedRequest(Malformed::ContentLength)
        );
        assert_fails!(b"GET /echo\r\n\r\n", ExchangeState::AwaitingStartLine, Error::MalformedRequest(_));
        assert_fails!(b"GET /echo HTTP/1.1\r\nBroken\r\n\r\n", ExchangeState::AwaitingHeaders, Error::MalformedRequest(_));
    }

    #[tokio::test]
    async fn panic_is_a_handler_failure() {
        let (state, result) = run(b"GET /panic HTTP/1.1\r\n\r\n", &ReqLimits::default()).await;

        assert_eq!(state, ExchangeState::Invoking);
        match result {
            Err(Error::Handler(err)) => {
                assert_eq!(err.to_string(), "handler panicked: unreachable branch taken")
            }
            other => panic!("expected a handler failure, got {other:?}"),
        }
    }

    #[test]
    fn close_is_final() {
        let mut exchange = Exchange::new(registry());
        exchange.start_responding();
        exchange.close();
        exchange.close();
        assert_eq!(exchange.state(), ExchangeState::Closed);
        assert!(ExchangeState::AwaitingStartLine < ExchangeState::Closed);
    }
}
