use crate::{
    http::types::StatusCode,
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy},
    routing::registry::RegistryHandle,
    server::dispatcher::Dispatcher,
};
use crossbeam::queue::SegQueue;
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::{sleep as tokio_sleep, timeout},
};

/// An HTTP server that accepts connections and serves one request on each.
///
/// Accepted connections are queued and picked up by a fixed pool of worker
/// tasks, each running one [`Dispatcher`] cycle per connection. See
/// [`ServerLimits`] for the queueing and overload behavior.
///
/// # Examples
///
/// ```no_run
/// use maker_router::{Args, HandlerResult, Method, Registry, Request, Response, RouteDescriptor, Server, StatusCode};
/// use tokio::net::TcpListener;
///
/// async fn hello(_: Request, _: Args) -> HandlerResult {
///     Ok(Response::new(StatusCode::Ok).with_body("Hello world!"))
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let registry = Registry::from_routes([RouteDescriptor::path(Method::Get, "/", hello)]).unwrap();
///
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .registry(registry)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: ServerLimits,
    registry: RegistryHandle,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            listener: None,
            registry: None,

            server_limits: None,
            request_limits: None,
            response_limits: None,
            connection_limits: None,
        }
    }

    /// Handle to the served routes.
    ///
    /// Swapping a new registry in affects every connection picked up
    /// afterwards; connections already being served keep their snapshot.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() {
    /// use maker_router::{Registry, Server};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .registry(Registry::new())
    ///     .build();
    ///
    /// let routes = server.routes();
    /// tokio::spawn(server.launch());
    ///
    /// // Later, e.g. after reloading a plugin:
    /// routes.swap(Registry::new());
    /// # }
    /// ```
    #[inline]
    pub fn routes(&self) -> RegistryHandle {
        self.registry.clone()
    }

    /// Address the listener is bound to.
    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts accepting connections. Never returns.
    #[inline]
    pub async fn launch(self) {
        tracing::info!(
            addr = ?self.listener.local_addr().ok(),
            workers = self.server_limits.max_connections,
            "server listening"
        );

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(value) => value,
                Err(err) => {
                    tracing::debug!(error = %err, "accept failed");
                    continue;
                }
            };

            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push((stream, addr)),
                false => {
                    tracing::warn!(peer = %addr, "pending queue full, rejecting connection");
                    self.error_queue.push((stream, addr))
                }
            }
        }
    }

    #[inline]
    async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
///
/// `listener` and `registry` are required, every limit falls back to its
/// `Default`.
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    registry: Option<RegistryHandle>,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
}

impl ServerBuilder {
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the routes to serve, as a [`Registry`](crate::Registry) or an
    /// existing [`RegistryHandle`].
    ///
    /// **This is a required component.**
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use maker_router::{Args, HandlerResult, Method, Registry, Request, Response, RouteDescriptor, Server, StatusCode};
    /// use tokio::net::TcpListener;
    ///
    /// async fn user(_: Request, args: Args) -> HandlerResult {
    ///     let name = args.str("name").unwrap_or("stranger");
    ///     Ok(Response::new(StatusCode::Ok).with_body(format!("Hi, {name}")))
    /// }
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let mut registry = Registry::new();
    /// registry
    ///     .register(RouteDescriptor::pattern(Method::Get, "/users/{name}", user))
    ///     .unwrap();
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .registry(registry)
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn registry(mut self, registry: impl Into<RegistryHandle>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Configures worker count, queueing and overload behavior.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() {
    /// use maker_router::{Registry, Server, limits::ServerLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .registry(Registry::new())
    ///     .server_limits(ServerLimits {
    ///         // Your changes
    ///         max_connections: 2500,
    ///         max_pending_connections: 10000,
    ///         ..ServerLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures the head read and response write timeouts.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() {
    /// use maker_router::{Registry, Server, limits::ConnLimits};
    /// use tokio::net::TcpListener;
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .registry(Registry::new())
    ///     .connection_limits(ConnLimits {
    ///         // Your changes
    ///         socket_read_timeout: Duration::from_secs(5),
    ///         socket_write_timeout: Duration::from_secs(2),
    ///         ..ConnLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response writing settings.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() {
    /// use maker_router::{Registry, Server, limits::RespLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .registry(Registry::new())
    ///     .response_limits(RespLimits {
    ///         // Your changes
    ///         server_name: None,
    ///         stream_chunk_size: 64 * 1024,
    ///         ..RespLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Finalizes the builder, spawns the worker pool and constructs a [`Server`].
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``The `listener` method must be called to create``
    /// - ``The `registry` method must be called to create``
    ///
    /// Panics when:
    /// - The `listener` method was not called.
    /// - The `registry` method was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let (listener, registry, limits) = self.get_all_parts();
        let (server_limits, conn_limits, req_limits, resp_limits) = limits;

        let stream_queue = Arc::new(SegQueue::new());
        let error_queue = Arc::new(SegQueue::new());

        let dispatcher =
            Dispatcher::with_limits(registry.clone(), conn_limits.clone(), req_limits, resp_limits);

        for _ in 0..server_limits.max_connections {
            Self::spawn_worker(&stream_queue, &server_limits, &dispatcher);
        }
        if server_limits.count_503_handlers != 0 {
            for _ in 0..server_limits.count_503_handlers {
                Self::spawn_alarmist(&error_queue, &server_limits, &conn_limits);
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, &server_limits);
        }

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits,
            registry,
        }
    }

    #[inline]
    fn spawn_worker(queue: &TcpQueue, limits: &ServerLimits, dispatcher: &Dispatcher) {
        let queue = queue.clone();
        let wait = limits.wait_strategy.clone();
        let dispatcher = dispatcher.clone();

        tokio::spawn(async move {
            loop {
                let (stream, addr) = Server::get_stream(&queue, &wait).await;
                tracing::debug!(peer = %addr, "connection picked up");

                let _ = dispatcher.serve(stream).await;
            }
        });
    }

    #[inline]
    fn spawn_alarmist(queue: &TcpQueue, limits: &ServerLimits, conn_limits: &ConnLimits) {
        let queue = queue.clone();
        let wait = limits.wait_strategy.clone();
        let write_timeout = conn_limits.socket_write_timeout;

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = Server::get_stream(&queue, &wait).await;

                let response = StatusCode::ServiceUnavailable.bare_response();
                let _ = timeout(write_timeout, async {
                    if stream.write_all(response).await.is_ok() {
                        let _ = stream.shutdown().await;
                    }
                })
                .await;
            }
        });
    }

    #[inline]
    fn spawn_quiet_alarmist(queue: &TcpQueue, limits: &ServerLimits) {
        let queue = queue.clone();
        let wait = limits.wait_strategy.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = Server::get_stream(&queue, &wait).await;

                drop(stream);
            }
        });
    }

    #[inline]
    #[track_caller]
    fn get_all_parts(self) -> (TcpListener, RegistryHandle, AllLimits) {
        (
            self.listener
                .expect("The `listener` method must be called to create"),
            self.registry
                .expect("The `registry` method must be called to create"),
            (
                self.server_limits.unwrap_or_default(),
                self.connection_limits.unwrap_or_default(),
                self.request_limits.unwrap_or_default(),
                self.response_limits.unwrap_or_default(),
            ),
        )
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
type AllLimits = (ServerLimits, ConnLimits, ReqLimits, RespLimits);
