//! HTTP request

use crate::http::{
    message::{Body, Headers, Message},
    query::{self, Query, QueryCollector},
    types::{header, Method, HTTP_VERSION},
};
use std::ops::{Deref, DerefMut};

/// An HTTP request: a [`Message`] plus method and target.
///
/// Header and body accessors come from [`Message`] through `Deref`.
///
/// # General designations
///
/// ```text
/// POST /api/users/42?sort=name HTTP/1.1
/// ^^^^ ^^^^^^^^^^^^^^^^^^^^^^^ ^^^^^^^^
/// |    |                       version
/// |    target = path "/api/users/42" + query "sort=name"
/// method
/// ```
///
/// # GET normalization
///
/// A `GET` request never carries a body: on construction any body is
/// dropped and `Content-Length` is removed.
///
/// # Examples
/// ```
/// use maker_router::{Headers, Method, Request};
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Length", "10");
///
/// let request = Request::with_body(Method::Get, "/a?x=1", "HTTP/1.1", headers, None, None);
/// assert_eq!(request.header("Content-Length"), None);
/// assert_eq!(request.path(), "/a");
/// assert_eq!(request.query(), Some("x=1"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    target: String,
    message: Message,
}

impl Request {
    /// Body-less `HTTP/1.1` request.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self::with_body(method, target, HTTP_VERSION, Headers::new(), None, None)
    }

    /// Builds a request from its parsed parts.
    ///
    /// `length` is the declared body length, `None` when unknown. For
    /// [`Method::Get`] the body is discarded and `Content-Length` stripped.
    pub fn with_body(
        method: Method,
        target: impl Into<String>,
        version: impl Into<String>,
        headers: Headers,
        body: Option<Body>,
        length: Option<u64>,
    ) -> Self {
        let mut message = Message::with_headers(version, headers);

        match method {
            Method::Get => {
                message.remove_header(header::CONTENT_LENGTH);
            }
            _ => message.set_body(body, length),
        }

        Self {
            method,
            target: target.into(),
            message,
        }
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full request target as received, query included.
    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Target without the query component.
    #[inline]
    pub fn path(&self) -> &str {
        match memchr::memchr(b'?', self.target.as_bytes()) {
            Some(pos) => &self.target[..pos],
            None => &self.target,
        }
    }

    /// Text after the first `?`, or `None` if there is none or it is empty.
    #[inline]
    pub fn query(&self) -> Option<&str> {
        let pos = memchr::memchr(b'?', self.target.as_bytes())?;
        Some(&self.target[pos + 1..]).filter(|query| !query.is_empty())
    }

    /// Parses the query into `C`, allowing at most `limit` parameters.
    ///
    /// # Examples
    /// ```
    /// use maker_router::{Method, Request};
    /// use std::collections::HashMap;
    ///
    /// let request = Request::new(Method::Get, "/search?q=rust&page=2");
    /// let params: HashMap<&str, &str> = request.query_params(8).unwrap();
    /// assert_eq!(params["page"], "2");
    /// ```
    pub fn query_params<'a, C: QueryCollector<'a>>(&'a self, limit: usize) -> Result<C, query::Error> {
        Query::parse(self.query().unwrap_or_default(), limit)
    }

    /// Start line without CRLF, e.g. `GET /a HTTP/1.1`.
    #[inline]
    pub(crate) fn start_line(&self) -> String {
        format!("{} {} {}", self.method, self.target, self.message.version())
    }

    #[inline]
    pub(crate) fn into_message(self) -> Message {
        self.message
    }
}

impl Deref for Request {
    type Target = Message;

    #[inline]
    fn deref(&self) -> &Message {
        &self.message
    }
}

impl DerefMut for Request {
    #[inline]
    fn deref_mut(&mut self) -> &mut Message {
        &mut self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        let mut headers = Headers::new();
        for (name, value) in pairs {
            headers.insert(*name, *value);
        }
        headers
    }

    #[test]
    fn get_strips_content_length() {
        let request = Request::with_body(
            Method::Get,
            "/a",
            "HTTP/1.1",
            headers(&[("Host", "x"), ("content-length", "12")]),
            Some(Body::from_bytes("twelve bytes")),
            Some(12),
        );

        assert_eq!(request.header("Content-Length"), None);
        assert_eq!(request.header("Host"), Some("x"));
        assert!(!request.has_body());
        assert_eq!(request.length(), Some(0));
    }

    #[test]
    fn post_keeps_body() {
        let request = Request::with_body(
            Method::Post,
            "/a",
            "HTTP/1.1",
            headers(&[("Content-Length", "4")]),
            Some(Body::from_bytes("ping")),
            Some(4),
        );
        assert_eq!(request.header("Content-Length"), Some("4"));
        assert_eq!(request.length(), Some(4));

        let request = Request::with_body(
            Method::Post,
            "/a",
            "HTTP/1.1",
            Headers::new(),
            Some(Body::from_bytes("ping")),
            None,
        );
        assert_eq!(request.header("Content-Length"), None);
        assert_eq!(request.length(), None);
        assert!(request.has_body());
    }

    #[test]
    fn target_parts() {
        #[rustfmt::skip]
        let cases = [
            ("/",                 "/",        None),
            ("/a/b",              "/a/b",     None),
            ("/a?",               "/a",       None),
            ("/a?x=1",            "/a",       Some("x=1")),
            ("/a?x=1?y=2",        "/a",       Some("x=1?y=2")),
            ("/?debug",           "/",        Some("debug")),
        ];

        for (target, path, query) in cases {
            let request = Request::new(Method::Get, target);
            assert_eq!(request.target(), target);
            assert_eq!(request.path(), path, "{target}");
            assert_eq!(request.query(), query, "{target}");
        }
    }

    #[test]
    fn query_params() {
        let request = Request::new(Method::Get, "/search?q=rust&flag");
        let params: Vec<(&str, &str)> = request.query_params(4).unwrap();
        assert_eq!(params, [("q", "rust"), ("flag", "")]);

        let request = Request::new(Method::Get, "/search");
        assert_eq!(
            request.query_params::<Vec<(&str, &str)>>(4),
            Err(query::Error::Empty)
        );
    }

    #[test]
    fn start_line() {
        let request = Request::new(Method::Other("PURGE".into()), "/cache");
        assert_eq!(request.start_line(), "PURGE /cache HTTP/1.1");
    }
}
