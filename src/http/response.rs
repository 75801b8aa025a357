//! HTTP response

use crate::http::{
    message::{single_line, Body, Headers, Message},
    types::{StatusCode, HTTP_VERSION},
};
use std::{
    borrow::Cow,
    ops::{Deref, DerefMut},
};

/// An HTTP response: a [`Message`] plus status code and reason phrase.
///
/// Built by a handler and handed back to the dispatcher by value, so the
/// response being written can never be reached by anyone else.
///
/// # Examples
///
/// ```
/// use maker_router::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .with_header("Content-Type", "text/plain")
///     .with_body("Hello world!");
///
/// assert_eq!(response.status(), 200);
/// assert_eq!(response.header("content-length"), Some("12"));
/// ```
/// Statuses without a [`StatusCode`] variant:
/// ```
/// use maker_router::Response;
///
/// let response = Response::with_status(299, "Quite OK");
/// assert_eq!(response.status_code(), None);
/// assert_eq!(response.reason(), "Quite OK");
/// ```
#[derive(Debug)]
pub struct Response {
    status: u16,
    reason: Cow<'static, str>,
    message: Message,
}

impl Response {
    /// Body-less `HTTP/1.1` response.
    #[inline]
    pub fn new(status: StatusCode) -> Self {
        Self::with_status(status.as_u16(), status.reason())
    }

    /// Response with an arbitrary code and reason phrase.
    ///
    /// `status` must have three digits. Line breaks in `reason` are
    /// replaced by spaces.
    pub fn with_status(status: u16, reason: impl Into<Cow<'static, str>>) -> Self {
        debug_assert!(
            (100..=999).contains(&status),
            "status code must have three digits, got {status}"
        );

        let mut reason = reason.into();
        if reason.contains(['\r', '\n']) {
            reason = Cow::Owned(single_line(reason.into_owned()));
        }
        Self::from_parts(HTTP_VERSION, status, reason, Headers::new())
    }

    #[inline]
    pub(crate) fn from_parts(
        version: impl Into<String>,
        status: u16,
        reason: impl Into<Cow<'static, str>>,
        headers: Headers,
    ) -> Self {
        Self {
            status,
            reason: reason.into(),
            message: Message::with_headers(version, headers),
        }
    }

    /// Numeric status code.
    #[inline]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The status as a [`StatusCode`], if it is a known one.
    #[inline]
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status)
    }

    /// Adds or replaces a header.
    #[inline]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Sets an in-memory body and its `Content-Length`.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        let length = body.len() as u64;

        self.set_body(Some(Body::from_bytes(body)), Some(length));
        self
    }

    /// Sets a streamed body.
    ///
    /// With `length: None` no `Content-Length` is sent and the body is
    /// read until end of stream while writing.
    ///
    /// # Examples
    /// ```
    /// use maker_router::{Body, Response, StatusCode};
    ///
    /// let response = Response::new(StatusCode::Ok)
    ///     .with_stream(Body::from_reader(tokio::io::repeat(b'x')), Some(1024));
    /// assert_eq!(response.header("Content-Length"), Some("1024"));
    /// ```
    #[inline]
    pub fn with_stream(mut self, body: Body, length: Option<u64>) -> Self {
        self.set_body(Some(body), length);
        self
    }

    /// Start line without CRLF, e.g. `HTTP/1.1 404 Not Found`.
    #[inline]
    pub(crate) fn start_line(&self) -> String {
        format!("{} {} {}", self.message.version(), self.status, self.reason)
    }

    #[inline]
    pub(crate) fn into_message(self) -> Message {
        self.message
    }
}

impl From<StatusCode> for Response {
    #[inline]
    fn from(status: StatusCode) -> Self {
        Self::new(status)
    }
}

impl Deref for Response {
    type Target = Message;

    #[inline]
    fn deref(&self) -> &Message {
        &self.message
    }
}

impl DerefMut for Response {
    #[inline]
    fn deref_mut(&mut self) -> &mut Message {
        &mut self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line() {
        #[rustfmt::skip]
        let cases = [
            (Response::new(StatusCode::Ok),                  "HTTP/1.1 200 OK"),
            (Response::new(StatusCode::NotFound),            "HTTP/1.1 404 Not Found"),
            (StatusCode::InternalServerError.into(),         "HTTP/1.1 500 Internal Server Error"),
            (Response::with_status(299, "Quite OK"),         "HTTP/1.1 299 Quite OK"),
        ];

        for (response, expected) in cases {
            assert_eq!(response.start_line(), expected);
        }
    }

    #[test]
    fn reason_stays_on_one_line() {
        let response = Response::with_status(200, "OK\r\nSet-Cookie: evil=1");
        assert_eq!(response.start_line(), "HTTP/1.1 200 OK  Set-Cookie: evil=1");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "three digits")]
    fn four_digit_status() {
        let _ = Response::with_status(1000, "Too Far");
    }

    #[test]
    fn status_only_has_no_headers() {
        let response = Response::new(StatusCode::BadRequest);

        assert!(response.headers().is_empty());
        assert!(!response.has_body());
        assert_eq!(response.status_code(), Some(StatusCode::BadRequest));
    }

    #[test]
    fn body_builders() {
        let response = Response::new(StatusCode::Ok).with_body("hello");
        assert_eq!(response.header("Content-Length"), Some("5"));
        assert_eq!(response.length(), Some(5));

        let response = Response::new(StatusCode::Ok)
            .with_header("Content-Length", "999")
            .with_stream(Body::from_bytes("abc"), None);
        assert_eq!(response.header("Content-Length"), None);
        assert_eq!(response.length(), None);
    }

    #[test]
    fn header_builder_upserts() {
        let response = Response::new(StatusCode::Ok)
            .with_header("X-Id", "1")
            .with_header("Content-Type", "text/plain")
            .with_header("x-id", "2");

        assert_eq!(
            response.headers().iter().collect::<Vec<_>>(),
            [("X-Id", "2"), ("Content-Type", "text/plain")]
        );
    }
}
