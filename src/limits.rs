//! Server configuration limits and timeouts
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Slowloris attacks
//! - Header flooding
//! - Oversized request bodies
//!
//! Every exchange serves exactly one request, so the limits below bound
//! the whole lifetime of a connection.
//!
//! # Examples
//!
//! ```no_run
//! use maker_router::{Registry, Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .registry(Registry::new())
//!         .server_limits(ServerLimits {
//!             max_connections: 5000, // Higher concurrency
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 64,            // More headers for complex APIs
//!             body_size: 16 * 1024 * 1024, // 16 MiB uploads
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::{borrow::Cow, time::Duration};

/// Controls server-level concurrency, queueing, and overload behavior.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || TCP_STREAM
///                                  \/
/// [--------------]   Yes   /----------------\   No   [-------------]
/// [ Add to queue ] <====== | Queue has room? | ====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \==================\\          //====================\
///                            V          V                    ||
/// [--------]   Yes   /-------------------------\   No    [------]
/// [ Worker ] <====== | Is there a free worker? | =====>  [ Wait ]
/// [--------]         \-------------------------/         [------]
/// ```
///
/// A worker is a long-running task created once when the server is built.
/// It pops a connection, runs one [`Dispatcher`](crate::Dispatcher) cycle
/// on it and goes back to the queue.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker tasks, and so of connections served at once (default: `100`).
    pub max_connections: usize,

    /// Maximum number of accepted connections waiting for a worker (default: `250`).
    ///
    /// If the queue is full, new connections receive an immediate `503`.
    /// For more information, see [Connection management](#connection-management).
    pub max_pending_connections: usize,

    /// How idle workers wait for the queue to refill (default: `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,

    /// Dedicated tasks answering queue overflow with `503 Service Unavailable` (default: `1`).
    ///
    /// Set to `0` to close overflowing connections silently.
    pub count_503_handlers: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,

            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no connections are available
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`]
    ///
    /// Keeps latency minimal at the cost of a busy CPU.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`]
    ///
    /// Server operation with this waiting strategy:
    /// ```
    /// # #[tokio::main]
    /// async fn main() {
    /// # let mut pool = vec![1, 2, 3];
    /// # let time = std::time::Duration::from_micros(50);
    /// #
    /// let value = loop {
    ///     if let Some(value) = pool.pop() {
    ///         break value;
    ///     }
    ///
    ///     tokio::time::sleep(time).await;
    /// };
    /// # }
    /// ```
    Sleep(Duration),
}

/// Connection-level timeouts
///
/// The exchange has no keep-alive, so these two timeouts, together with
/// [`ReqLimits::body_idle_timeout`], bound how long a slow client can pin
/// a worker.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum time to receive the whole request head (default: `2 seconds`)
    ///
    /// Covers the start line and every header line. Prevents `slowloris`
    /// clients from holding a worker. Body reads are driven by the handler
    /// and are bounded by [`ReqLimits::body_idle_timeout`] instead.
    pub socket_read_timeout: Duration,

    /// Maximum time to write the whole response (default: `3 seconds`)
    ///
    /// Covers the head and the framed body. On expiry the connection is
    /// dropped without further writes.
    pub socket_write_timeout: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),

            _priv: (),
        }
    }
}

/// HTTP request parsing limits
///
/// ⚠️ **SECURITY-FIRST DEFAULTS**
///
/// 🔧 **You MAY need to increase these if you see:**
/// - `413 Payload Too Large` for legitimate uploads
/// - `431 Request Header Fields Too Large` for long cookies or tokens
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum length of one head line in bytes, CRLF included (default: `8 KiB`)
    ///
    /// Applies to the start line and to every header line.
    pub line_size: usize,

    /// Maximum number of header lines (default: `32`)
    pub header_count: usize,

    /// Maximum body size in bytes (default: `1 MiB`)
    ///
    /// A larger declared `Content-Length` is rejected before the handler
    /// runs. A body of unknown length fails the read that crosses the limit.
    pub body_size: u64,

    /// Longest pause allowed while a body read waits for the peer (default: `2 seconds`)
    ///
    /// The clock restarts on every read that makes progress.
    pub body_idle_timeout: Duration,

    /// Capacity of the buffered reader wrapped around the inbound stream (default: `4 KiB`)
    pub buffer_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            line_size: 8 * 1024,
            header_count: 32,
            body_size: 1024 * 1024,
            body_idle_timeout: Duration::from_secs(2),
            buffer_size: 4 * 1024,

            _priv: (),
        }
    }
}

/// HTTP response writing settings
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Chunk size used to stream bodies of unknown length (default: `32 KiB`)
    ///
    /// Bodies with a `Content-Length` are written in a single pass instead.
    pub stream_chunk_size: usize,

    /// Value of the `Server` header added when the handler did not set one
    /// (default: `Some("maker_router")`)
    pub server_name: Option<Cow<'static, str>>,

    /// Adds a `Date` header when the handler did not set one (default: `true`)
    pub date_header: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            stream_chunk_size: 32 * 1024,
            server_name: Some(Cow::Borrowed("maker_router")),
            date_header: true,

            _priv: (),
        }
    }
}
