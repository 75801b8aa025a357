//! Drives one exchange over a duplex stream

use crate::{
    errors::Error,
    http::{reader::read_request_head, response::Response, types::header, writer::HttpWriter},
    limits::{ConnLimits, ReqLimits, RespLimits},
    routing::registry::RegistryHandle,
    server::exchange::Exchange,
};
use std::time::SystemTime;
use tokio::{
    io::{AsyncRead, AsyncWrite, BufReader},
    time::timeout,
};

/// Runs request/response cycles against the routes of a [`RegistryHandle`].
///
/// The dispatcher is the only place where failures turn into responses:
/// every error with an [`Error::status`] is answered with a status-only
/// response, every other error closes the connection without one.
///
/// # Examples
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use maker_router::{Args, Dispatcher, HandlerResult, Method, Registry, Request, Response, RouteDescriptor, StatusCode};
/// use tokio::io::{AsyncReadExt, AsyncWriteExt};
///
/// async fn pong(_: Request, _: Args) -> HandlerResult {
///     Ok(Response::new(StatusCode::Ok).with_body("pong"))
/// }
///
/// let registry = Registry::from_routes([RouteDescriptor::path(Method::Get, "/ping", pong)]).unwrap();
/// let dispatcher = Dispatcher::new(registry);
///
/// let (mut client, server) = tokio::io::duplex(4096);
/// let serving = tokio::spawn(async move { dispatcher.serve(server).await });
///
/// client.write_all(b"GET /ping HTTP/1.1\r\n\r\n").await.unwrap();
/// let mut response = String::new();
/// client.read_to_string(&mut response).await.unwrap();
///
/// assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(response.ends_with("\r\n\r\npong"));
/// serving.await.unwrap().unwrap();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: RegistryHandle,

    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
}

impl Dispatcher {
    /// Dispatcher with default limits.
    pub fn new(registry: impl Into<RegistryHandle>) -> Self {
        Self::with_limits(
            registry,
            ConnLimits::default(),
            ReqLimits::default(),
            RespLimits::default(),
        )
    }

    pub fn with_limits(
        registry: impl Into<RegistryHandle>,
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
        resp_limits: RespLimits,
    ) -> Self {
        Self {
            registry: registry.into(),
            conn_limits,
            req_limits,
            resp_limits,
        }
    }

    /// Handle to the routes, for replacing them while serving.
    #[inline]
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Serves exactly one request on `stream`, then closes it.
    ///
    /// The request head must arrive within
    /// [`ConnLimits::socket_read_timeout`] and the response must be written
    /// within [`ConnLimits::socket_write_timeout`]. The write side is shut
    /// down on every path, including failures.
    ///
    /// # Errors
    ///
    /// Only fatal failures are returned: a timeout or other I/O error, a
    /// body shorter than its `Content-Length`, or a peer that hung up before
    /// sending anything. Request-level failures are answered and yield `Ok`.
    pub async fn serve<S>(&self, stream: S) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = BufReader::with_capacity(self.req_limits.buffer_size, read_half);
        let mut writer = HttpWriter::new(write_half, &self.resp_limits);
        let mut exchange = Exchange::new(self.registry.load());

        let outcome = self.run(&mut exchange, reader, &mut writer).await;

        exchange.close();
        let closed = writer.close().await;

        match outcome {
            Err(Error::ConnectionClosed) => {
                tracing::debug!("connection closed before a request was received");
                Err(Error::ConnectionClosed)
            }
            Err(err) => {
                tracing::warn!(error = %err, "connection aborted");
                Err(err)
            }
            Ok(()) => Ok(closed?),
        }
    }

    async fn run<R, W>(
        &self,
        exchange: &mut Exchange,
        mut reader: BufReader<R>,
        writer: &mut HttpWriter<W>,
    ) -> Result<(), Error>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Unpin,
    {
        let head = timeout(
            self.conn_limits.socket_read_timeout,
            read_request_head(&mut reader, exchange, &self.req_limits),
        )
        .await
        .map_err(|_| Error::timed_out("request head read timed out"))?;

        let result = match head {
            Ok(()) => exchange.respond(reader, &self.req_limits).await,
            Err(err) => Err(err),
        };

        let response = match result {
            Ok(response) => response,
            Err(err) => self.error_response(err)?,
        };
        let response = self.apply_defaults(response);

        exchange.start_responding();
        tracing::debug!(status = response.status(), "writing response");
        timeout(
            self.conn_limits.socket_write_timeout,
            writer.write_response(response),
        )
        .await
        .map_err(|_| Error::timed_out("response write timed out"))?
    }

    /// Turns a request-level failure into its status-only response.
    fn error_response(&self, err: Error) -> Result<Response, Error> {
        let Some(status) = err.status() else {
            return Err(err);
        };

        match &err {
            Error::Handler(source) => {
                tracing::error!(status = status.as_u16(), error = %source, "handler failed")
            }
            _ => tracing::warn!(status = status.as_u16(), error = %err, "request rejected"),
        }
        Ok(Response::new(status))
    }

    fn apply_defaults(&self, mut response: Response) -> Response {
        if let Some(server) = &self.resp_limits.server_name {
            if !response.headers().contains(header::SERVER) {
                response.set_server(&**server);
            }
        }
        if self.resp_limits.date_header && !response.headers().contains(header::DATE) {
            response.set_date(SystemTime::now());
        }
        response
    }
}
