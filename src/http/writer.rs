//! Serialization of messages and body framing

use crate::{
    errors::Error,
    http::{
        message::{Body, Message},
        request::Request,
        response::Response,
        types::{header, parse_decimal},
    },
    limits::RespLimits,
};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Writes start line, headers and a framed body onto a byte sink.
///
/// # Body framing
///
/// - **`Content-Length: n`**: exactly `n` bytes are read from the body into
///   a buffer of that size and written in one pass. A body that ends early
///   fails with [`Error::Framing`].
/// - **No `Content-Length`**: the body is streamed in chunks of
///   [`RespLimits::stream_chunk_size`] until it reports end of stream.
///
/// Headers are written in insertion order and flushed before the body is
/// read, so a framing failure leaves a truncated message on the wire; the
/// connection must then be closed.
///
/// # Examples
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use maker_router::{HttpWriter, Response, StatusCode, limits::RespLimits};
///
/// let mut writer = HttpWriter::new(Vec::new(), &RespLimits::default());
/// writer
///     .write_response(Response::new(StatusCode::Ok).with_body("hi"))
///     .await
///     .unwrap();
///
/// assert_eq!(writer.into_inner(), b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");
/// # }
/// ```
pub struct HttpWriter<W> {
    output: W,
    source: Option<Body>,
    chunk_size: usize,
}

impl<W: AsyncWrite + Unpin> HttpWriter<W> {
    pub fn new(output: W, limits: &RespLimits) -> Self {
        Self {
            output,
            source: None,
            chunk_size: limits.stream_chunk_size.max(1),
        }
    }

    /// Serializes a response: `VERSION SP CODE SP REASON CRLF`, headers, body.
    pub async fn write_response(&mut self, response: Response) -> Result<(), Error> {
        let start_line = response.start_line();
        self.write_message(&start_line, response.into_message()).await
    }

    /// Serializes a request: `METHOD SP TARGET SP VERSION CRLF`, headers, body.
    pub async fn write_request(&mut self, request: Request) -> Result<(), Error> {
        let start_line = request.start_line();
        self.write_message(&start_line, request.into_message()).await
    }

    async fn write_message(&mut self, start_line: &str, message: Message) -> Result<(), Error> {
        let (headers, body) = message.into_parts();

        let mut head = Vec::with_capacity(start_line.len() + 64 * (headers.len() + 1));
        head.extend_from_slice(start_line.as_bytes());
        head.extend_from_slice(b"\r\n");
        for (name, value) in headers.iter() {
            head.extend_from_slice(name.as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");

        self.output.write_all(&head).await?;
        self.output.flush().await?;

        self.source = body;
        match headers.get(header::CONTENT_LENGTH).and_then(parse_decimal) {
            Some(length) => self.write_fixed(length).await?,
            None => self.write_streamed().await?,
        }
        self.source = None;

        self.output.flush().await?;
        Ok(())
    }

    async fn write_fixed(&mut self, length: u64) -> Result<(), Error> {
        if length == 0 {
            return Ok(());
        }

        let Some(source) = self.source.as_mut() else {
            return Err(Error::Framing {
                expected: length,
                available: 0,
            });
        };

        let size = usize::try_from(length)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "body does not fit in memory"))?;
        let mut buf = vec![0; size];

        let mut filled = 0;
        while filled < size {
            match source.read(&mut buf[filled..]).await? {
                0 => {
                    return Err(Error::Framing {
                        expected: length,
                        available: filled as u64,
                    })
                }
                n => filled += n,
            }
        }

        self.output.write_all(&buf).await?;
        Ok(())
    }

    async fn write_streamed(&mut self) -> Result<(), Error> {
        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };

        let mut buf = vec![0; self.chunk_size];
        loop {
            match source.read(&mut buf).await? {
                0 => return Ok(()),
                n => self.output.write_all(&buf[..n]).await?,
            }
        }
    }

    /// Releases the body source and shuts the sink down.
    ///
    /// Both steps always run, including after a failed write.
    pub async fn close(mut self) -> io::Result<()> {
        drop(self.source.take());
        self.output.shutdown().await
    }

    /// Returns the underlying sink.
    pub fn into_inner(self) -> W {
        self.output
    }
}
