//! Route descriptors, compiled routes and bound parameters

use crate::{
    errors::{Error, HandlerError, RegistrationError},
    http::{request::Request, response::Response, types::Method},
};
use memchr::memchr;
use regex::Regex;
use std::{fmt, future::Future, ops::Range, pin::Pin, sync::Arc};

// HANDLER

/// Result returned by a route handler.
pub type HandlerResult = Result<Response, HandlerError>;

/// Boxed future returned by [`Handler::call`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Code bound to a route.
///
/// The dispatcher passes the parsed [`Request`] and the parameters bound
/// from the route pattern by value. Nothing is stored in task or thread
/// locals, so a handler sees exactly what it is given.
///
/// Implemented for every `async fn(Request, Args) -> HandlerResult` and for
/// closures of the same shape.
///
/// # Examples
///
/// ```
/// use maker_router::{Args, HandlerResult, Method, Request, Response, RouteDescriptor, StatusCode};
///
/// async fn hello(_: Request, _: Args) -> HandlerResult {
///     Ok(Response::new(StatusCode::Ok).with_body("Hello world!"))
/// }
///
/// let route = RouteDescriptor::path(Method::Get, "/hello", hello);
/// ```
/// A closure capturing shared state:
/// ```
/// use maker_router::{Args, HandlerError, Method, Request, Response, RouteDescriptor, StatusCode};
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// let hits = Arc::new(AtomicUsize::new(0));
/// let route = RouteDescriptor::path(Method::Get, "/hits", move |_: Request, _: Args| {
///     let count = hits.fetch_add(1, Ordering::Relaxed) + 1;
///     async move { Ok::<_, HandlerError>(Response::new(StatusCode::Ok).with_body(count.to_string())) }
/// });
/// ```
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request, args: Args) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    #[inline]
    fn call(&self, request: Request, args: Args) -> HandlerFuture {
        Box::pin(self(request, args))
    }
}

// PARAMETERS

/// Declared type of a route parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Passed through unchanged.
    Str,
    /// Parsed as `i32`.
    Int,
    /// Parsed as `i64`.
    Long,
}

impl ParamKind {
    fn coerce(self, raw: &str) -> Option<Value> {
        Some(match self {
            Self::Str => Value::Str(raw.to_owned()),
            Self::Int => Value::Int(raw.parse().ok()?),
            Self::Long => Value::Long(raw.parse().ok()?),
        })
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Str => "string",
            Self::Int => "int",
            Self::Long => "long",
        })
    }
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Int(i32),
    Long(i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(value) => f.write_str(value),
            Self::Int(value) => write!(f, "{value}"),
            Self::Long(value) => write!(f, "{value}"),
        }
    }
}

/// Declared parameter of a pattern route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    name: Arc<str>,
    kind: ParamKind,
    group: usize,
}

impl Param {
    /// Placeholder name, or the position for parameters of a raw regex.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    /// Capture group the value is taken from.
    #[inline]
    pub fn group(&self) -> usize {
        self.group
    }
}

/// Parameters bound from the matched target, in declaration order.
///
/// # Examples
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use maker_router::{Args, HandlerResult, Method, ParamKind, Registry, Request, Response, RouteDescriptor, StatusCode};
///
/// async fn post(_: Request, args: Args) -> HandlerResult {
///     let user = args.str("user").unwrap_or_default();
///     let id = args.long("id").unwrap_or_default();
///     Ok(Response::new(StatusCode::Ok).with_body(format!("{user}:{id}")))
/// }
///
/// let mut registry = Registry::new();
/// registry
///     .register(
///         RouteDescriptor::pattern(Method::Get, "/users/{user}/posts/{id}", post)
///             .params([ParamKind::Str, ParamKind::Long]),
///     )
///     .unwrap();
///
/// let target = "/users/ann/posts/9000000000";
/// let args = registry.resolve(&Method::Get, target).unwrap().bind(target).unwrap();
/// assert_eq!(args.str("user"), Some("ann"));
/// assert_eq!(args.long("id"), Some(9_000_000_000));
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    values: Vec<(Arc<str>, Value)>,
}

impl Args {
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the parameter called `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(key, _)| &**key == name)
            .map(|(_, value)| value)
    }

    /// Value at `index` in declaration order.
    #[inline]
    pub fn at(&self, index: usize) -> Option<&Value> {
        self.values.get(index).map(|(_, value)| value)
    }

    /// The parameter as a string, if it was declared [`ParamKind::Str`].
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    /// The parameter as an `i32`, if it was declared [`ParamKind::Int`].
    pub fn int(&self, name: &str) -> Option<i32> {
        match self.get(name)? {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// The parameter as an `i64`, if it was declared [`ParamKind::Long`] or [`ParamKind::Int`].
    pub fn long(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Long(value) => Some(*value),
            Value::Int(value) => Some(i64::from(*value)),
            Value::Str(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(key, value)| (&**key, value))
    }
}

// DESCRIPTOR

#[derive(Debug, Clone)]
enum Target {
    Path(String),
    Pattern(String),
}

/// Declarative description of one route, turned into a [`Route`] by
/// [`Registry::register`](crate::Registry::register).
///
/// # Patterns
///
/// A pattern is a regular expression in which `{name}` placeholders stand
/// for parameters. Each placeholder becomes one capture group matching
/// `.+`, unless [`patterns`](Self::patterns) supplies a sub-pattern per
/// placeholder. Braces that do not enclose an identifier (`\d{2,4}`) are
/// regex syntax and left alone.
///
/// When sub-patterns contain groups of their own, [`indexes`](Self::indexes)
/// names the capture group that feeds each parameter.
///
/// # Examples
/// ```
/// use maker_router::{Args, HandlerResult, Method, ParamKind, Request, Response, RouteDescriptor, StatusCode};
///
/// async fn show(_: Request, args: Args) -> HandlerResult {
///     Ok(Response::new(StatusCode::Ok).with_body(format!("{:?}", args.int("id"))))
/// }
///
/// // `{id}` compiles to `(\d+)` and binds to an `i32`.
/// let route = RouteDescriptor::pattern(Method::Get, "/user/{id}", show)
///     .patterns([r"\d+"])
///     .params([ParamKind::Int]);
/// ```
pub struct RouteDescriptor {
    method: Method,
    target: Target,
    patterns: Vec<String>,
    indexes: Vec<usize>,
    params: Option<Vec<ParamKind>>,
    handler: Arc<dyn Handler>,
}

impl RouteDescriptor {
    /// Route matched by exact comparison with the request target.
    pub fn path(method: Method, path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(method, Target::Path(path.into()), Arc::new(handler))
    }

    /// Route matched by a regular expression with optional `{name}` placeholders.
    pub fn pattern(method: Method, pattern: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(method, Target::Pattern(pattern.into()), Arc::new(handler))
    }

    /// Same as [`path`](Self::path) with an already shared handler.
    pub fn path_shared(method: Method, path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(method, Target::Path(path.into()), handler)
    }

    /// Same as [`pattern`](Self::pattern) with an already shared handler.
    pub fn pattern_shared(
        method: Method,
        pattern: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self::new(method, Target::Pattern(pattern.into()), handler)
    }

    #[inline]
    fn new(method: Method, target: Target, handler: Arc<dyn Handler>) -> Self {
        Self {
            method,
            target,
            patterns: Vec::new(),
            indexes: Vec::new(),
            params: None,
            handler,
        }
    }

    /// One sub-pattern per placeholder, in placeholder order.
    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// One capture group index per placeholder, in placeholder order.
    pub fn indexes<I: IntoIterator<Item = usize>>(mut self, indexes: I) -> Self {
        self.indexes = indexes.into_iter().collect();
        self
    }

    /// Declared parameter types, in order.
    ///
    /// Without this call every placeholder binds one [`ParamKind::Str`].
    pub fn params<I: IntoIterator<Item = ParamKind>>(mut self, params: I) -> Self {
        self.params = Some(params.into_iter().collect());
        self
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("patterns", &self.patterns)
            .field("indexes", &self.indexes)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// ROUTE

/// How a pattern route matched the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Exact string match against a literal path.
    Direct,
    /// The pattern consumed the entire target.
    Full,
    /// The pattern was found somewhere within the target.
    Partial,
}

enum Matcher {
    Direct,
    Pattern {
        full: Regex,
        partial: Regex,
        explicit_groups: bool,
    },
}

/// A registered, immutable route.
pub struct Route {
    method: Method,
    source: String,
    matcher: Matcher,
    params: Vec<Param>,
    handler: Arc<dyn Handler>,
}

impl Route {
    pub(crate) fn compile(descriptor: RouteDescriptor) -> Result<Self, RegistrationError> {
        let RouteDescriptor {
            method,
            target,
            patterns,
            indexes,
            params,
            handler,
        } = descriptor;

        let pattern = match target {
            Target::Path(path) if path.is_empty() => return Err(RegistrationError::EmptyPath(method)),
            Target::Path(path) => {
                return Ok(Self {
                    method,
                    source: path,
                    matcher: Matcher::Direct,
                    params: Vec::new(),
                    handler,
                })
            }
            Target::Pattern(pattern) if pattern.is_empty() => {
                return Err(RegistrationError::EmptyPath(method))
            }
            Target::Pattern(pattern) => pattern,
        };

        let holders = placeholders(&pattern);
        let count = holders.len();
        if !patterns.is_empty() && patterns.len() != count {
            return Err(RegistrationError::PatternCount {
                pattern,
                placeholders: count,
                patterns: patterns.len(),
            });
        }
        if !indexes.is_empty() && indexes.len() != count {
            return Err(RegistrationError::IndexCount {
                pattern,
                placeholders: count,
                indexes: indexes.len(),
            });
        }

        let expanded = expand(&pattern, &holders, &patterns);
        let compile = |source: &str| {
            Regex::new(source).map_err(|source| RegistrationError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })
        };
        let partial = compile(&expanded)?;
        let full = compile(&format!("^(?:{expanded})$"))?;
        let groups = partial.captures_len() - 1;

        let kinds = params.unwrap_or_else(|| vec![ParamKind::Str; count]);
        let params: Vec<Param> = kinds
            .into_iter()
            .enumerate()
            .map(|(i, kind)| Param {
                name: holders
                    .get(i)
                    .map_or_else(|| i.to_string().into(), |holder| holder.name.into()),
                kind,
                group: indexes.get(i).copied().unwrap_or(i + 1),
            })
            .collect();

        if let Some(index) = indexes.iter().find(|&&index| index == 0 || index > groups) {
            return Err(RegistrationError::GroupIndex {
                pattern,
                groups,
                index: *index,
            });
        }

        Ok(Self {
            method,
            source: pattern,
            matcher: Matcher::Pattern {
                full,
                partial,
                explicit_groups: !indexes.is_empty(),
            },
            params,
            handler,
        })
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Literal path or pattern as registered.
    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[inline]
    pub fn is_pattern(&self) -> bool {
        matches!(self.matcher, Matcher::Pattern { .. })
    }

    #[inline]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    #[inline]
    pub(crate) fn matches(&self, target: &str, kind: MatchKind) -> bool {
        match (&self.matcher, kind) {
            (Matcher::Pattern { full, .. }, MatchKind::Full) => full.is_match(target),
            (Matcher::Pattern { partial, .. }, MatchKind::Partial) => partial.is_match(target),
            (Matcher::Direct, MatchKind::Direct) => self.source == target,
            _ => false,
        }
    }

    /// Re-runs the pattern on `target` and coerces each captured group.
    ///
    /// # Errors
    ///
    /// - [`Error::ParamMismatch`] if the pattern did not match, or captured a
    ///   different number of groups than there are declared parameters
    /// - [`Error::Coercion`] if a captured value does not parse as its type
    pub fn bind(&self, target: &str, kind: MatchKind) -> Result<Args, Error> {
        let Matcher::Pattern {
            full,
            partial,
            explicit_groups,
        } = &self.matcher
        else {
            return Ok(Args::default());
        };

        let declared = self.params.len();
        let regex = match kind {
            MatchKind::Partial => partial,
            _ => full,
        };
        let captures = regex
            .captures(target)
            .ok_or(Error::ParamMismatch { captured: 0, declared })?;

        let captured = captures.len() - 1;
        if !explicit_groups && captured != declared {
            return Err(Error::ParamMismatch { captured, declared });
        }

        let mut values = Vec::with_capacity(declared);
        for param in &self.params {
            let raw = captures.get(param.group).map_or("", |m| m.as_str());
            let value = param.kind.coerce(raw).ok_or_else(|| Error::Coercion {
                name: param.name.clone(),
                kind: param.kind,
                value: raw.to_owned(),
            })?;
            values.push((param.name.clone(), value));
        }

        Ok(Args { values })
    }

    /// Runs the bound handler.
    #[inline]
    pub fn invoke(&self, request: Request, args: Args) -> HandlerFuture {
        self.handler.call(request, args)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("source", &self.source)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// PLACEHOLDERS

#[derive(Debug, PartialEq)]
struct Placeholder<'a> {
    span: Range<usize>,
    name: &'a str,
}

fn is_identifier(name: &str) -> bool {
    let mut bytes = name.bytes();
    matches!(bytes.next(), Some(b'a'..=b'z' | b'A'..=b'Z' | b'_'))
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Finds `{name}` placeholders, skipping escaped braces and regex quantifiers.
fn placeholders(pattern: &str) -> Vec<Placeholder<'_>> {
    let bytes = pattern.as_bytes();
    let mut found = Vec::new();
    let mut pos = 0;

    while let Some(offset) = memchr(b'{', &bytes[pos..]) {
        let open = pos + offset;
        pos = open + 1;

        if open > 0 && bytes[open - 1] == b'\\' {
            continue;
        }
        let Some(len) = memchr(b'}', &bytes[open + 1..]) else {
            break;
        };

        let close = open + 1 + len;
        let name = &pattern[open + 1..close];
        if is_identifier(name) {
            found.push(Placeholder {
                span: open..close + 1,
                name,
            });
            pos = close + 1;
        }
    }

    found
}

/// Replaces every placeholder with one capture group.
fn expand(pattern: &str, holders: &[Placeholder<'_>], patterns: &[String]) -> String {
    let mut result = String::with_capacity(pattern.len() + holders.len() * 4);
    let mut last = 0;

    for (i, holder) in holders.iter().enumerate() {
        result.push_str(&pattern[last..holder.span.start]);
        result.push('(');
        result.push_str(patterns.get(i).map_or(".+", String::as_str));
        result.push(')');
        last = holder.span.end;
    }
    result.push_str(&pattern[last..]);

    result
}
