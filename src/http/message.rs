//! Header and body representation shared by requests and responses

use crate::http::types::header;
use memchr::memchr2;
use std::{
    fmt,
    io::{self, Cursor},
    pin::Pin,
    task::{Context, Poll},
    time::SystemTime,
};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// Value written for `Expires` and `Last-modified` when no instant is given.
pub const NEVER: &str = "Never";

/// Formats `time` as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
#[inline]
pub fn http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

// HEADERS

/// Ordered header collection.
///
/// Names are stored as given and compared ignoring ASCII case. Insertion
/// order is kept so that serialization is deterministic, and replacing a
/// value keeps the header in its original position.
///
/// # Examples
/// ```
/// use maker_router::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/plain");
/// headers.insert("X-Trace", "1");
/// headers.insert("content-type", "text/html");
///
/// assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
/// assert_eq!(
///     headers.iter().collect::<Vec<_>>(),
///     [("Content-Type", "text/html"), ("X-Trace", "1")]
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    #[inline]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Returns the value of `name`, ignoring ASCII case.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Inserts or replaces a header, returning the previous value.
    ///
    /// On replacement the originally stored name and position are kept.
    /// CR and LF never reach the wire: they are dropped from names and
    /// replaced by spaces in values.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let mut name = name.into();
        if has_line_break(&name) {
            name.retain(|c| c != '\r' && c != '\n');
        }
        let value = single_line(value.into());

        match self.position(&name) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    /// Removes a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[inline]
fn has_line_break(text: &str) -> bool {
    memchr2(b'\r', b'\n', text.as_bytes()).is_some()
}

/// Replaces CR and LF with spaces so `text` stays on one header line.
pub(crate) fn single_line(text: String) -> String {
    match has_line_break(&text) {
        true => text.replace(['\r', '\n'], " "),
        false => text,
    }
}

// BODY

/// Lazily read message body.
///
/// A body is an owned byte source: either bytes already in memory or a
/// reader that is pulled only when the holder reads from it. Request
/// bodies read straight from the connection, so nothing is buffered
/// before the handler asks for it.
pub struct Body {
    reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl Body {
    /// Wraps any async reader.
    pub fn from_reader<R: AsyncRead + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Box::pin(reader),
        }
    }

    /// Body backed by bytes in memory.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_reader(Cursor::new(bytes.into()))
    }

    /// Reads the body until end of stream.
    ///
    /// For a body with a declared length this stops after exactly that many
    /// bytes, never reading into whatever follows on the connection.
    pub async fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl AsyncRead for Body {
    #[inline]
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().reader.as_mut().poll_read(cx, buf)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").finish_non_exhaustive()
    }
}

// MESSAGE

/// Version, headers and optional body shared by [`Request`](crate::Request)
/// and [`Response`](crate::Response).
///
/// A message is not `Clone`: its body is a one-shot stream owned by whoever
/// holds the message. To inspect headers independently of the message, clone
/// them with `message.headers().clone()`.
///
/// # Content-Length
///
/// While a body is attached, `Content-Length` always matches its declared
/// length. A body of unknown length has no `Content-Length` and is written
/// by reading it to exhaustion.
#[derive(Debug)]
pub struct Message {
    version: String,
    headers: Headers,
    body: Option<Body>,
    length: Option<u64>,
}

impl Message {
    /// Empty message without headers or body.
    pub fn new(version: impl Into<String>) -> Self {
        Self::with_headers(version, Headers::new())
    }

    #[inline]
    pub(crate) fn with_headers(version: impl Into<String>, headers: Headers) -> Self {
        Self {
            version: version.into(),
            headers,
            body: None,
            length: Some(0),
        }
    }

    #[inline]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a header value, ignoring the case of `key`.
    #[inline]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Inserts or replaces a header.
    ///
    /// Setting `Content-Length` directly bypasses [`set_body`](Self::set_body);
    /// the writer trusts whatever value is present.
    #[inline]
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key, value);
    }

    #[inline]
    pub fn remove_header(&mut self, key: &str) -> Option<String> {
        self.headers.remove(key)
    }

    /// Returns the body, if one is attached.
    #[inline]
    pub fn body(&mut self) -> Option<&mut Body> {
        self.body.as_mut()
    }

    #[inline]
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Detaches the body, leaving headers untouched.
    #[inline]
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// Declared body length: `Some(0)` without a body, `None` when unknown.
    #[inline]
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Attaches or clears the body and keeps `Content-Length` in sync.
    ///
    /// | `body` | `length` | `Content-Length` |
    /// |--------|----------|------------------|
    /// | `Some` | `Some(n)` | set to `n` |
    /// | `Some` | `None` | removed, body is read to end of stream |
    /// | `None` | ignored | removed |
    pub fn set_body(&mut self, body: Option<Body>, length: Option<u64>) {
        match (body, length) {
            (Some(body), Some(length)) => {
                self.headers
                    .insert(header::CONTENT_LENGTH, length.to_string());
                self.body = Some(body);
                self.length = Some(length);
            }
            (Some(body), None) => {
                self.headers.remove(header::CONTENT_LENGTH);
                self.body = Some(body);
                self.length = None;
            }
            (None, _) => {
                self.headers.remove(header::CONTENT_LENGTH);
                self.body = None;
                self.length = Some(0);
            }
        }
    }

    #[inline]
    pub fn set_content_type(&mut self, value: impl Into<String>) {
        self.set_header(header::CONTENT_TYPE, value);
    }

    #[inline]
    pub fn set_server(&mut self, value: impl Into<String>) {
        self.set_header(header::SERVER, value);
    }

    #[inline]
    pub fn set_date(&mut self, time: SystemTime) {
        self.set_header(header::DATE, http_date(time));
    }

    /// Sets `Expires`; `None` writes the literal `Never`.
    #[inline]
    pub fn set_expires(&mut self, time: Option<SystemTime>) {
        self.set_header(header::EXPIRES, time.map_or_else(|| NEVER.to_owned(), http_date));
    }

    /// Sets `Last-modified`; `None` writes the literal `Never`.
    #[inline]
    pub fn set_last_modified(&mut self, time: Option<SystemTime>) {
        self.set_header(
            header::LAST_MODIFIED,
            time.map_or_else(|| NEVER.to_owned(), http_date),
        );
    }

    #[inline]
    pub(crate) fn into_parts(self) -> (Headers, Option<Body>) {
        (self.headers, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn headers_ignore_case() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");

        for name in ["Content-Type", "content-type", "CONTENT-TYPE", "cOnTeNt-TyPe"] {
            assert_eq!(headers.get(name), Some("text/plain"), "{name}");
        }
        assert_eq!(headers.get("Content-Typ"), None);
    }

    #[test]
    fn headers_upsert_keeps_position() {
        let mut headers = Headers::new();
        headers.insert("A", "1");
        headers.insert("B", "2");
        headers.insert("C", "3");

        assert_eq!(headers.insert("b", "two"), Some("2".to_owned()));
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            [("A", "1"), ("B", "two"), ("C", "3")]
        );

        assert_eq!(headers.remove("a"), Some("1".to_owned()));
        assert_eq!(headers.remove("a"), None);
        assert_eq!(headers.iter().collect::<Vec<_>>(), [("B", "two"), ("C", "3")]);
    }

    #[test]
    fn headers_stay_on_one_line() {
        let mut headers = Headers::new();

        #[rustfmt::skip]
        let cases = [
            ("X-Name",         "plain",                    "X-Name",    "plain"),
            ("X-Name",         "a\r\nSet-Cookie: evil=1",  "X-Name",    "a  Set-Cookie: evil=1"),
            ("X-Lf",           "a\nb\rc",                  "X-Lf",      "a b c"),
            ("X-Split\r\nEvil", "1",                        "X-SplitEvil", "1"),
        ];

        for (name, value, stored_name, stored_value) in cases {
            headers.insert(name, value);
            assert_eq!(headers.get(stored_name), Some(stored_value), "{name:?}");
        }
        assert!(headers.iter().all(|(k, v)| !has_line_break(k) && !has_line_break(v)));
        assert_eq!(headers.get("Set-Cookie"), None);
    }

    #[test]
    fn body_syncs_content_length() {
        let mut message = Message::new("HTTP/1.1");
        assert_eq!(message.length(), Some(0));

        message.set_body(Some(Body::from_bytes("hello")), Some(5));
        assert_eq!(message.header("content-length"), Some("5"));
        assert_eq!(message.length(), Some(5));

        message.set_body(Some(Body::from_bytes("hello world")), Some(11));
        assert_eq!(message.header("Content-Length"), Some("11"));
        assert_eq!(message.headers().len(), 1);

        message.set_body(Some(Body::from_bytes("stream")), None);
        assert_eq!(message.header("Content-Length"), None);
        assert_eq!(message.length(), None);
        assert!(message.has_body());

        message.set_body(Some(Body::from_bytes("x")), Some(1));
        message.set_body(None, Some(1));
        assert_eq!(message.header("Content-Length"), None);
        assert_eq!(message.length(), Some(0));
        assert!(!message.has_body());
    }

    #[test]
    fn dates() {
        let mut message = Message::new("HTTP/1.1");
        let time = UNIX_EPOCH + Duration::from_secs(784_111_777);

        message.set_date(time);
        message.set_expires(None);
        message.set_last_modified(Some(time));

        assert_eq!(message.header("Date"), Some("Sun, 06 Nov 1994 08:49:37 GMT"));
        assert_eq!(message.header("Expires"), Some("Never"));
        assert_eq!(
            message.header("Last-Modified"),
            Some("Sun, 06 Nov 1994 08:49:37 GMT")
        );
    }

    #[tokio::test]
    async fn body_reads_lazily() {
        let mut body = Body::from_bytes(b"abc".to_vec());
        assert_eq!(body.read_all().await.unwrap(), b"abc");
        assert_eq!(body.read_all().await.unwrap(), b"");

        let mut body = Body::from_reader(&b"0123456789"[..]);
        let mut head = [0; 4];
        body.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"0123");
        assert_eq!(body.read_all().await.unwrap(), b"456789");
    }
}
