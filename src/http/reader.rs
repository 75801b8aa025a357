//! Line-oriented parsing of request and response heads

use crate::{
    errors::{Error, HeadLimit, Malformed},
    http::{
        message::{Body, Headers},
        response::Response,
        types::{header, parse_decimal, Method},
    },
    limits::ReqLimits,
};
use memchr::memchr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Receives the parts of a request head in wire order.
///
/// [`read_request_head`] calls [`visit_request`](Self::visit_request)
/// exactly once, then [`visit_header`](Self::visit_header) once per header
/// line in the order the lines were transmitted. An error returned by the
/// visitor stops parsing and is passed through unchanged.
pub trait RequestVisitor {
    /// Called with the trimmed segments of the start line.
    fn visit_request(&mut self, method: Method, target: &str, version: &str) -> Result<(), Error>;

    /// Called with the trimmed name and value of one header line.
    fn visit_header(&mut self, name: &str, value: &str) -> Result<(), Error>;
}

/// Reads a request start line and header block from `reader`.
///
/// Stops right after the blank line that ends the head; body bytes stay
/// unread in `reader`.
///
/// # Errors
///
/// - [`Error::ConnectionClosed`] if the stream ends before the first byte
/// - [`Error::MalformedRequest`] for a start line without two spaces or with
///   an empty segment, a non-token method, a header line without a colon,
///   a line not ending in CRLF, invalid UTF-8, or a head cut short
/// - [`Error::HeadTooLarge`] if a line or the header count exceeds `limits`
pub async fn read_request_head<R, V>(
    reader: &mut R,
    visitor: &mut V,
    limits: &ReqLimits,
) -> Result<(), Error>
where
    R: AsyncBufRead + Unpin,
    V: RequestVisitor,
{
    let mut lines = LineReader::new(reader, limits);

    let line = lines.next_line().await?.ok_or(Error::ConnectionClosed)?;
    let (method, target, version) = split_start_line(line)?;
    let method = Method::from_token(method).ok_or(Malformed::Method)?;
    tracing::trace!(method = %method, uri = target, version, "start line");

    visitor.visit_request(method, target, version)?;
    lines
        .read_headers(|name, value| visitor.visit_header(name, value))
        .await
}

/// Reads a response head and attaches the rest of `reader` as its body.
///
/// With a `Content-Length` the body yields exactly that many bytes,
/// otherwise it is read until end of stream.
///
/// # Examples
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use maker_router::{read_response, limits::ReqLimits};
///
/// let wire: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";
/// let mut response = read_response(wire, &ReqLimits::default()).await.unwrap();
///
/// assert_eq!(response.status(), 200);
/// let body = response.body().unwrap().read_all().await.unwrap();
/// assert_eq!(body, b"hi");
/// # }
/// ```
pub async fn read_response<R>(mut reader: R, limits: &ReqLimits) -> Result<Response, Error>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let mut lines = LineReader::new(&mut reader, limits);

    let line = lines.next_line().await?.ok_or(Error::ConnectionClosed)?;
    let (version, status, reason) = split_start_line(line)?;
    let status: u16 = match parse_decimal(status) {
        Some(code) if status.len() == 3 => code as u16,
        _ => return Err(Malformed::Status.into()),
    };
    let (version, reason) = (version.to_owned(), reason.to_owned());

    let mut headers = Headers::new();
    lines
        .read_headers(|name, value| {
            headers.insert(name, value);
            Ok(())
        })
        .await?;

    let length = declared_length(&headers)?;
    let mut response = Response::from_parts(version, status, reason, headers);
    match length {
        Some(length) => response.set_body(Some(Body::from_reader(reader.take(length))), Some(length)),
        None => response.set_body(Some(Body::from_reader(reader)), None),
    }

    Ok(response)
}

/// Parses `Content-Length`, if present.
pub(crate) fn declared_length(headers: &Headers) -> Result<Option<u64>, Error> {
    headers
        .get(header::CONTENT_LENGTH)
        .map(|value| parse_decimal(value).ok_or(Error::MalformedRequest(Malformed::ContentLength)))
        .transpose()
}

/// Splits a start line on its first two spaces.
///
/// The third segment keeps any further spaces, so reason phrases such as
/// `Not Found` survive intact.
pub(crate) fn split_start_line(line: &str) -> Result<(&str, &str, &str), Error> {
    let bytes = line.as_bytes();
    let first = memchr(b' ', bytes).ok_or(Malformed::StartLine)?;
    let second = memchr(b' ', &bytes[first + 1..])
        .map(|pos| first + 1 + pos)
        .ok_or(Malformed::StartLine)?;

    let parts = (
        line[..first].trim(),
        line[first + 1..second].trim(),
        line[second + 1..].trim(),
    );

    match parts {
        ("", _, _) | (_, "", _) | (_, _, "") => Err(Malformed::StartLine.into()),
        parts => Ok(parts),
    }
}

/// Splits a header line on its first colon.
pub(crate) fn split_header(line: &str) -> Result<(&str, &str), Error> {
    let colon = memchr(b':', line.as_bytes()).ok_or(Malformed::Header)?;

    match line[..colon].trim() {
        "" => Err(Malformed::Header.into()),
        name => Ok((name, line[colon + 1..].trim())),
    }
}

struct LineReader<'a, R> {
    reader: &'a mut R,
    line: Vec<u8>,
    limits: &'a ReqLimits,
}

impl<'a, R: AsyncBufRead + Unpin> LineReader<'a, R> {
    #[inline]
    fn new(reader: &'a mut R, limits: &'a ReqLimits) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(256),
            limits,
        }
    }

    /// Next line without its CRLF, or `None` at end of stream.
    async fn next_line(&mut self) -> Result<Option<&str>, Error> {
        self.line.clear();

        let limit = self.limits.line_size;
        let read = (&mut *self.reader)
            .take(limit as u64)
            .read_until(b'\n', &mut self.line)
            .await?;

        if read == 0 {
            return Ok(None);
        }

        match self.line.strip_suffix(b"\r\n") {
            Some(line) => simdutf8::basic::from_utf8(line)
                .map(Some)
                .map_err(|_| Malformed::Encoding.into()),
            None if self.line.ends_with(b"\n") => Err(Malformed::LineEnding.into()),
            None if read == limit => Err(HeadLimit::LineSize(limit).into()),
            None => Err(Malformed::UnexpectedEof.into()),
        }
    }

    async fn read_headers<F>(&mut self, mut visit: F) -> Result<(), Error>
    where
        F: FnMut(&str, &str) -> Result<(), Error>,
    {
        let max = self.limits.header_count;
        let mut count = 0;

        loop {
            let line = self.next_line().await?.ok_or(Malformed::UnexpectedEof)?;
            if line.is_empty() {
                return Ok(());
            }

            if count == max {
                return Err(HeadLimit::HeaderCount(max).into());
            }
            count += 1;

            let (name, value) = split_header(line)?;
            visit(name, value)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl RequestVisitor for Recorder {
        fn visit_request(&mut self, method: Method, target: &str, version: &str) -> Result<(), Error> {
            self.events.push(format!("{method}|{target}|{version}"));
            Ok(())
        }

        fn visit_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
            self.events.push(format!("{name}={value}"));
            Ok(())
        }
    }

    async fn parse_with(input: &str, limits: &ReqLimits) -> Result<Vec<String>, Error> {
        let mut reader = input.as_bytes();
        let mut recorder = Recorder::default();

        read_request_head(&mut reader, &mut recorder, limits).await?;
        Ok(recorder.events)
    }

    async fn parse(input: &str) -> Result<Vec<String>, Error> {
        parse_with(input, &ReqLimits::default()).await
    }

    macro_rules! assert_malformed {
        ($input:expr, $kind:expr) => {
            match parse($input).await {
                Err(Error::MalformedRequest(kind)) => assert_eq!(kind, $kind, "{:?}", $input),
                other => panic!("{:?}: expected {:?}, got {:?}", $input, $kind, other),
            }
        };
    }

    #[tokio::test]
    async fn full_head() {
        let events = parse(
            "POST /api/users?id=1 HTTP/1.1\r\n\
             Host: localhost\r\n\
             Content-Type:  application/json \r\n\
             X-Empty:\r\n\
             X-Time: 12:30:00\r\n\
             \r\n",
        )
        .await
        .unwrap();

        assert_eq!(
            events,
            [
                "POST|/api/users?id=1|HTTP/1.1",
                "Host=localhost",
                "Content-Type=application/json",
                "X-Empty=",
                "X-Time=12:30:00",
            ]
        );
    }

    #[tokio::test]
    async fn start_line() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n",             "GET|/|HTTP/1.1"),
            ("DELETE /a/b HTTP/1.0\r\n\r\n",       "DELETE|/a/b|HTTP/1.0"),
            ("PURGE /cache HTTP/1.1\r\n\r\n",      "PURGE|/cache|HTTP/1.1"),
            ("GET / HTTP/1.1 extra\r\n\r\n",       "GET|/|HTTP/1.1 extra"),
            ("GET /  HTTP/1.1\r\n\r\n",            "GET|/|HTTP/1.1"),
        ];

        for (input, expected) in cases {
            assert_eq!(parse(input).await.unwrap(), [expected], "{input:?}");
        }
    }

    #[tokio::test]
    async fn malformed_start_line() {
        #[rustfmt::skip]
        let cases = [
            "GET\r\n\r\n",
            "GET /\r\n\r\n",
            "GET/HTTP/1.1\r\n\r\n",
            "GET  HTTP/1.1\r\n\r\n",
            " / HTTP/1.1\r\n\r\n",
            "GET / \r\n\r\n",
            "\r\n\r\n",
        ];

        for input in cases {
            assert_malformed!(input, Malformed::StartLine);
        }

        assert_malformed!("GE(T / HTTP/1.1\r\n\r\n", Malformed::Method);
    }

    #[tokio::test]
    async fn malformed_header() {
        #[rustfmt::skip]
        let cases = [
            "GET / HTTP/1.1\r\nHost localhost\r\n\r\n",
            "GET / HTTP/1.1\r\nHost: a\r\nbroken\r\n\r\n",
            "GET / HTTP/1.1\r\n: value\r\n\r\n",
        ];

        for input in cases {
            assert_malformed!(input, Malformed::Header);
        }
    }

    #[tokio::test]
    async fn line_endings() {
        assert_malformed!("GET / HTTP/1.1\n\r\n", Malformed::LineEnding);
        assert_malformed!("GET / HTTP/1.1\r\nHost: a\n\r\n", Malformed::LineEnding);
        assert_malformed!("GET / HTTP/1.1\r\nHost: a\r\n", Malformed::UnexpectedEof);
        assert_malformed!("GET / HTTP/1.1\r\nHost: a", Malformed::UnexpectedEof);
    }

    #[tokio::test]
    async fn invalid_utf8() {
        let mut reader: &[u8] = b"GET /\xFF HTTP/1.1\r\n\r\n";
        let result = read_request_head(&mut reader, &mut Recorder::default(), &ReqLimits::default()).await;

        assert!(matches!(result, Err(Error::MalformedRequest(Malformed::Encoding))));
    }

    #[tokio::test]
    async fn empty_stream() {
        assert!(matches!(parse("").await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn limits() {
        let limits = ReqLimits {
            line_size: 32,
            header_count: 2,
            ..ReqLimits::default()
        };

        let long = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(64));
        assert!(matches!(
            parse_with(&long, &limits).await,
            Err(Error::HeadTooLarge(HeadLimit::LineSize(32)))
        ));

        let many = "GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n";
        assert!(matches!(
            parse_with(many, &limits).await,
            Err(Error::HeadTooLarge(HeadLimit::HeaderCount(2)))
        ));

        let exact = "GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\n\r\n";
        assert_eq!(parse_with(exact, &limits).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stops_at_blank_line() {
        let mut reader: &[u8] = b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello\r\nGET / HTTP/1.1\r\n";
        read_request_head(&mut reader, &mut Recorder::default(), &ReqLimits::default())
            .await
            .unwrap();

        assert_eq!(reader, b"hello\r\nGET / HTTP/1.1\r\n");
    }

    #[tokio::test]
    async fn visitor_error_stops_parsing() {
        struct Reject;

        impl RequestVisitor for Reject {
            fn visit_request(&mut self, _: Method, _: &str, _: &str) -> Result<(), Error> {
                Ok(())
            }

            fn visit_header(&mut self, _: &str, _: &str) -> Result<(), Error> {
                Err(Error::ConnectionClosed)
            }
        }

        let mut reader: &[u8] = b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\n\r\n";
        let result = read_request_head(&mut reader, &mut Reject, &ReqLimits::default()).await;

        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(reader, b"B: 2\r\n\r\n");
    }

    #[tokio::test]
    async fn response_head() {
        let wire: &[u8] = b"HTTP/1.1 404 Not Found\r\nServer: test\r\nContent-Length: 3\r\n\r\nabcdef";
        let mut response = read_response(wire, &ReqLimits::default()).await.unwrap();

        assert_eq!(response.status(), 404);
        assert_eq!(response.reason(), "Not Found");
        assert_eq!(response.version(), "HTTP/1.1");
        assert_eq!(response.header("server"), Some("test"));
        assert_eq!(response.length(), Some(3));
        assert_eq!(response.body().unwrap().read_all().await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn response_without_length() {
        let wire: &[u8] = b"HTTP/1.1 200 OK\r\n\r\nuntil the end";
        let mut response = read_response(wire, &ReqLimits::default()).await.unwrap();

        assert_eq!(response.length(), None);
        assert_eq!(response.body().unwrap().read_all().await.unwrap(), b"until the end");
    }

    #[tokio::test]
    async fn response_bad_status() {
        for wire in [&b"HTTP/1.1 OK fine\r\n\r\n"[..], b"HTTP/1.1 2000 Big\r\n\r\n"] {
            assert!(matches!(
                read_response(wire, &ReqLimits::default()).await,
                Err(Error::MalformedRequest(Malformed::Status))
            ));
        }

        let wire: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: ten\r\n\r\n";
        assert!(matches!(
            read_response(wire, &ReqLimits::default()).await,
            Err(Error::MalformedRequest(Malformed::ContentLength))
        ));
    }
}
