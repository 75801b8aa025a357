//! Error types for the request cycle and for route registration

use crate::{
    http::types::{Method, StatusCode},
    routing::route::ParamKind,
};
use std::{fmt, io, sync::Arc};
use thiserror::Error;

/// Error type returned by route handlers.
///
/// Any error convertible into a boxed [`std::error::Error`] can be
/// propagated with `?` inside a handler. The dispatcher answers it with
/// `500 Internal Server Error`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a single request/response cycle.
///
/// Use [`Error::status`] to see whether the failure is answered with a
/// status-only response or aborts the connection.
#[derive(Debug, Error)]
pub enum Error {
    /// The start line or a header line could not be parsed.
    #[error("malformed request: {0}")]
    MalformedRequest(Malformed),

    /// A head line or the header count exceeded [`ReqLimits`](crate::limits::ReqLimits).
    #[error("request head too large: {0}")]
    HeadTooLarge(HeadLimit),

    /// The declared `Content-Length`, or the bytes a handler read from a
    /// body of unknown length, exceeded [`ReqLimits::body_size`](crate::limits::ReqLimits::body_size).
    #[error("body of {declared} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { declared: u64, limit: u64 },

    /// No direct or pattern route matched the method and target.
    #[error("no route for {method} {target}")]
    RouteNotFound { method: Method, target: String },

    /// The selected pattern captured a different number of groups than the
    /// route declares parameters.
    #[error("route captured {captured} groups but declares {declared} parameters")]
    ParamMismatch { captured: usize, declared: usize },

    /// A captured value could not be converted to the declared parameter type.
    #[error("parameter `{name}` expects {kind}, got {value:?}")]
    Coercion {
        name: Arc<str>,
        kind: ParamKind,
        value: String,
    },

    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),

    /// A body source yielded fewer bytes than its declared `Content-Length`.
    #[error("body framing: declared {expected} bytes, source yielded {available}")]
    Framing { expected: u64, available: u64 },

    /// The peer closed the stream before sending a single byte.
    #[error("connection closed before a request was received")]
    ConnectionClosed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Status code of the minimal response sent for this failure.
    ///
    /// `None` marks a fatal failure: the connection is closed without a
    /// response because the stream can no longer carry one.
    ///
    /// | Error | Status |
    /// |-------|--------|
    /// | [`MalformedRequest`](Self::MalformedRequest) | `400` |
    /// | [`HeadTooLarge`](Self::HeadTooLarge) | `431` |
    /// | [`PayloadTooLarge`](Self::PayloadTooLarge) | `413` |
    /// | [`RouteNotFound`](Self::RouteNotFound) | `404` |
    /// | [`ParamMismatch`](Self::ParamMismatch), [`Coercion`](Self::Coercion), [`Handler`](Self::Handler) | `500` |
    /// | [`Framing`](Self::Framing), [`ConnectionClosed`](Self::ConnectionClosed), [`Io`](Self::Io) | none |
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::MalformedRequest(_) => Some(StatusCode::BadRequest),
            Self::HeadTooLarge(_) => Some(StatusCode::RequestHeaderFieldsTooLarge),
            Self::PayloadTooLarge { .. } => Some(StatusCode::PayloadTooLarge),
            Self::RouteNotFound { .. } => Some(StatusCode::NotFound),
            Self::ParamMismatch { .. } | Self::Coercion { .. } | Self::Handler(_) => {
                Some(StatusCode::InternalServerError)
            }
            Self::Framing { .. } | Self::ConnectionClosed | Self::Io(_) => None,
        }
    }

    /// Returns `true` if the connection must be dropped without a response.
    #[inline]
    pub const fn is_fatal(&self) -> bool {
        self.status().is_none()
    }

    #[inline]
    pub(crate) fn timed_out(what: &'static str) -> Self {
        Self::Io(io::Error::new(io::ErrorKind::TimedOut, what))
    }
}

impl From<Malformed> for Error {
    fn from(kind: Malformed) -> Self {
        Self::MalformedRequest(kind)
    }
}

impl From<HeadLimit> for Error {
    fn from(limit: HeadLimit) -> Self {
        Self::HeadTooLarge(limit)
    }
}

/// The part of a request head that failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    /// Fewer than two spaces, or an empty segment after trimming.
    StartLine,
    /// The method is not an HTTP token.
    Method,
    /// The status code of a response start line is not a number.
    Status,
    /// A header line without a colon, or with an empty name.
    Header,
    /// A line not terminated by CRLF.
    LineEnding,
    /// A line that is not valid UTF-8.
    Encoding,
    /// `Content-Length` is present but not a decimal number.
    ContentLength,
    /// The stream ended before the blank line closing the head.
    UnexpectedEof,
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StartLine => "invalid start line",
            Self::Method => "invalid method token",
            Self::Status => "invalid status code",
            Self::Header => "header line without a colon",
            Self::LineEnding => "line not terminated by CRLF",
            Self::Encoding => "line is not valid UTF-8",
            Self::ContentLength => "invalid Content-Length",
            Self::UnexpectedEof => "stream ended inside the head",
        })
    }
}

/// The request head limit that was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadLimit {
    /// A single line was longer than `line_size` bytes.
    LineSize(usize),
    /// More than `header_count` header lines were sent.
    HeaderCount(usize),
}

impl fmt::Display for HeadLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LineSize(limit) => write!(f, "line longer than {limit} bytes"),
            Self::HeaderCount(limit) => write!(f, "more than {limit} headers"),
        }
    }
}

/// Failure to add a route to a [`Registry`](crate::Registry).
///
/// All of these are detected once, when the route is registered, and
/// never while serving requests.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("route for {0} has an empty path")]
    EmptyPath(Method),

    #[error("pattern {pattern:?} does not compile: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern {pattern:?} has {placeholders} placeholders but {patterns} sub-patterns")]
    PatternCount {
        pattern: String,
        placeholders: usize,
        patterns: usize,
    },

    #[error("pattern {pattern:?} has {placeholders} placeholders but {indexes} group indexes")]
    IndexCount {
        pattern: String,
        placeholders: usize,
        indexes: usize,
    },

    #[error("pattern {pattern:?} has {groups} capture groups, index {index} is out of range")]
    GroupIndex {
        pattern: String,
        groups: usize,
        index: usize,
    },

    #[error("direct route {method} {path} is already registered")]
    Duplicate { method: Method, path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        #[rustfmt::skip]
        let cases = [
            (Error::MalformedRequest(Malformed::StartLine),   Some(400)),
            (Error::HeadTooLarge(HeadLimit::HeaderCount(4)),  Some(431)),
            (Error::PayloadTooLarge { declared: 9, limit: 8 }, Some(413)),
            (
                Error::RouteNotFound { method: Method::Get, target: "/".into() },
                Some(404),
            ),
            (Error::ParamMismatch { captured: 1, declared: 2 }, Some(500)),
            (
                Error::Coercion { name: "id".into(), kind: ParamKind::Int, value: "abc".into() },
                Some(500),
            ),
            (Error::Handler("boom".into()),                   Some(500)),
            (Error::Framing { expected: 10, available: 3 },   None),
            (Error::ConnectionClosed,                         None),
            (Error::timed_out("read"),                        None),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status().map(|s| s.as_u16()), expected, "{error}");
            assert_eq!(error.is_fatal(), expected.is_none());
        }
    }

    #[test]
    fn display() {
        let error = Error::Coercion {
            name: "id".into(),
            kind: ParamKind::Long,
            value: "x1".into(),
        };
        assert_eq!(error.to_string(), r#"parameter `id` expects long, got "x1""#);

        assert_eq!(
            Error::from(Malformed::Header).to_string(),
            "malformed request: header line without a colon"
        );
    }
}
