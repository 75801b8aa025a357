//! Route lookup tables and their shared, swappable handle

use crate::{
    errors::{Error, RegistrationError},
    http::types::Method,
    routing::route::{Args, MatchKind, Route, RouteDescriptor},
};
use arc_swap::ArcSwap;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

/// Routes of a single method.
#[derive(Debug, Clone, Default)]
struct RoutingTable {
    direct: HashMap<String, Arc<Route>>,
    patterns: Vec<Arc<Route>>,
}

/// Maps `(method, target)` to a route.
///
/// # Resolution order
///
/// For the request method only:
/// 1. a **direct** route whose path equals the target exactly
/// 2. the first **pattern** route, in registration order, that matches
///    the entire target
/// 3. the first pattern route, in registration order, found anywhere in
///    the target
///
/// The target is matched as received, query string included.
///
/// # Examples
/// ```
/// use maker_router::{Args, HandlerResult, MatchKind, Method, Registry, Request, Response, RouteDescriptor, StatusCode};
///
/// async fn ok(_: Request, _: Args) -> HandlerResult {
///     Ok(Response::new(StatusCode::Ok))
/// }
///
/// let mut registry = Registry::new();
/// registry
///     .register(RouteDescriptor::pattern(Method::Get, "/.*", ok))?
///     .register(RouteDescriptor::path(Method::Get, "/a", ok))?;
///
/// // The direct route wins even though the pattern was registered first.
/// let resolved = registry.resolve(&Method::Get, "/a").unwrap();
/// assert_eq!(resolved.kind(), MatchKind::Direct);
///
/// assert!(registry.resolve(&Method::Post, "/a").is_err());
/// # Ok::<(), maker_router::RegistrationError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Registry {
    tables: HashMap<Method, RoutingTable>,
}

impl Registry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from descriptors, failing on the first invalid one.
    pub fn from_routes<I>(routes: I) -> Result<Self, RegistrationError>
    where
        I: IntoIterator<Item = RouteDescriptor>,
    {
        let mut registry = Self::new();
        for descriptor in routes {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Compiles and adds one route.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] if the pattern is invalid, the
    /// sub-pattern or index counts disagree with the placeholders, or a
    /// direct route for the same method and path already exists. The
    /// registry is left unchanged on error.
    pub fn register(&mut self, descriptor: RouteDescriptor) -> Result<&mut Self, RegistrationError> {
        let route = Route::compile(descriptor)?;
        let table = self.tables.entry(route.method().clone()).or_default();

        if route.is_pattern() {
            tracing::info!(
                method = %route.method(),
                pattern = route.source(),
                params = route.params().len(),
                "pattern route registered"
            );
            table.patterns.push(Arc::new(route));
        } else {
            if table.direct.contains_key(route.source()) {
                return Err(RegistrationError::Duplicate {
                    method: route.method().clone(),
                    path: route.source().to_owned(),
                });
            }
            tracing::info!(method = %route.method(), path = route.source(), "direct route registered");
            table.direct.insert(route.source().to_owned(), Arc::new(route));
        }

        Ok(self)
    }

    /// Registers every route a controller declares.
    ///
    /// Either all of them are added or, on the first error, none are.
    pub fn controller<C: Controller>(&mut self, controller: Arc<C>) -> Result<&mut Self, RegistrationError> {
        let mut staged = self.clone();
        for descriptor in controller.routes() {
            staged.register(descriptor)?;
        }

        *self = staged;
        Ok(self)
    }

    /// Finds the route for `method` and `target`.
    ///
    /// # Errors
    ///
    /// [`Error::RouteNotFound`] if no route of that method matches.
    pub fn resolve(&self, method: &Method, target: &str) -> Result<Resolved, Error> {
        let not_found = || Error::RouteNotFound {
            method: method.clone(),
            target: target.to_owned(),
        };
        let table = self.tables.get(method).ok_or_else(not_found)?;

        if let Some(route) = table.direct.get(target) {
            return Ok(Resolved::new(route, MatchKind::Direct));
        }

        [MatchKind::Full, MatchKind::Partial]
            .into_iter()
            .find_map(|kind| {
                table
                    .patterns
                    .iter()
                    .find(|route| route.matches(target, kind))
                    .map(|route| Resolved::new(route, kind))
            })
            .ok_or_else(not_found)
    }

    /// Number of registered routes across all methods.
    pub fn len(&self) -> usize {
        self.tables
            .values()
            .map(|table| table.direct.len() + table.patterns.len())
            .sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All routes; direct routes of a method come before its patterns.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.tables.values().flat_map(|table| {
            table
                .direct
                .values()
                .chain(table.patterns.iter())
                .map(|route| &**route)
        })
    }
}

/// A route selected by [`Registry::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    route: Arc<Route>,
    kind: MatchKind,
}

impl Resolved {
    #[inline]
    fn new(route: &Arc<Route>, kind: MatchKind) -> Self {
        Self {
            route: route.clone(),
            kind,
        }
    }

    #[inline]
    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    #[inline]
    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    /// Binds the route parameters from the same target it was resolved for.
    #[inline]
    pub fn bind(&self, target: &str) -> Result<Args, Error> {
        self.route.bind(target, self.kind)
    }
}

/// A group of routes sharing state.
///
/// Handlers capture the controller through the `Arc` they are given, so
/// the state lives as long as any registry holding one of its routes.
///
/// # Examples
/// ```
/// use maker_router::{Args, Controller, HandlerError, Method, Registry, Request, Response, RouteDescriptor, StatusCode};
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// #[derive(Default)]
/// struct Counter(AtomicUsize);
///
/// impl Controller for Counter {
///     fn routes(self: Arc<Self>) -> Vec<RouteDescriptor> {
///         vec![RouteDescriptor::path(Method::Get, "/count", move |_: Request, _: Args| {
///             let count = self.0.fetch_add(1, Ordering::Relaxed) + 1;
///             async move { Ok::<_, HandlerError>(Response::new(StatusCode::Ok).with_body(count.to_string())) }
///         })]
///     }
/// }
///
/// let mut registry = Registry::new();
/// registry.controller(Arc::new(Counter::default())).unwrap();
/// assert_eq!(registry.len(), 1);
/// ```
pub trait Controller: Send + Sync + 'static {
    fn routes(self: Arc<Self>) -> Vec<RouteDescriptor>;
}

/// Shared handle to the active [`Registry`].
///
/// Every exchange takes a snapshot when it starts, so a [`swap`](Self::swap)
/// affects only exchanges that begin afterwards.
#[derive(Debug, Clone)]
pub struct RegistryHandle(Arc<ArcSwap<Registry>>);

impl RegistryHandle {
    pub fn new(registry: Registry) -> Self {
        Self(Arc::new(ArcSwap::from_pointee(registry)))
    }

    /// Current registry.
    #[inline]
    pub fn load(&self) -> Arc<Registry> {
        self.0.load_full()
    }

    /// Installs `registry` and returns the one it replaced.
    pub fn swap(&self, registry: Registry) -> Arc<Registry> {
        tracing::info!(routes = registry.len(), "registry replaced");
        self.0.swap(Arc::new(registry))
    }

    /// Non-owning handle, for routes that replace their own registry.
    ///
    /// A route holding a [`RegistryHandle`] would keep the registry that
    /// owns it alive forever.
    #[inline]
    pub fn downgrade(&self) -> WeakRegistryHandle {
        WeakRegistryHandle(Arc::downgrade(&self.0))
    }
}

/// Handle created by [`RegistryHandle::downgrade`].
#[derive(Debug, Clone)]
pub struct WeakRegistryHandle(Weak<ArcSwap<Registry>>);

impl WeakRegistryHandle {
    /// Returns the handle, or `None` once every [`RegistryHandle`] is gone.
    #[inline]
    pub fn upgrade(&self) -> Option<RegistryHandle> {
        self.0.upgrade().map(RegistryHandle)
    }
}

impl From<Registry> for RegistryHandle {
    #[inline]
    fn from(registry: Registry) -> Self {
        Self::new(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::HandlerError,
        http::{request::Request, response::Response, types::StatusCode},
        routing::route::{HandlerResult, ParamKind},
    };

    async fn ok(_: Request, _: Args) -> HandlerResult {
        Ok(Response::new(StatusCode::Ok))
    }

    fn get(pattern: &str) -> RouteDescriptor {
        RouteDescriptor::pattern(Method::Get, pattern, ok)
    }

    fn resolve(registry: &Registry, target: &str) -> Option<(String, MatchKind)> {
        registry
            .resolve(&Method::Get, target)
            .ok()
            .map(|resolved| (resolved.route().source().to_owned(), resolved.kind()))
    }

    #[test]
    fn direct_beats_pattern() {
        let registry = Registry::from_routes([
            get("/.*"),
            RouteDescriptor::path(Method::Get, "/a", ok),
        ])
        .unwrap();

        #[rustfmt::skip]
        let cases = [
            ("/a",    Some(("/a",  MatchKind::Direct))),
            ("/b",    Some(("/.*", MatchKind::Full))),
            ("/a/",   Some(("/.*", MatchKind::Full))),
            ("x",     None),
        ];

        for (target, expected) in cases {
            let expected = expected.map(|(source, kind)| (source.to_owned(), kind));
            assert_eq!(resolve(&registry, target), expected, "{target}");
        }
    }

    #[test]
    fn full_beats_partial() {
        let registry = Registry::from_routes([get("/user"), get("/api/user")]).unwrap();

        assert_eq!(
            resolve(&registry, "/api/user"),
            Some(("/api/user".to_owned(), MatchKind::Full))
        );
        assert_eq!(
            resolve(&registry, "/v2/user/list"),
            Some(("/user".to_owned(), MatchKind::Partial))
        );
    }

    #[test]
    fn registration_order_breaks_ties() {
        let registry = Registry::from_routes([get("/item/{id}"), get("/item/(.*)")]).unwrap();
        assert_eq!(
            resolve(&registry, "/item/1"),
            Some(("/item/{id}".to_owned(), MatchKind::Full))
        );
    }

    #[test]
    fn query_is_part_of_target() {
        let registry = Registry::from_routes([
            RouteDescriptor::path(Method::Get, "/a", ok),
            get(r"/a\?debug"),
        ])
        .unwrap();

        assert_eq!(
            resolve(&registry, "/a?debug"),
            Some((r"/a\?debug".to_owned(), MatchKind::Full))
        );
    }

    #[test]
    fn method_scoped() {
        let registry = Registry::from_routes([RouteDescriptor::path(Method::Post, "/a", ok)]).unwrap();

        assert!(registry.resolve(&Method::Post, "/a").is_ok());
        match registry.resolve(&Method::Get, "/a") {
            Err(Error::RouteNotFound { method, target }) => {
                assert_eq!(method, Method::Get);
                assert_eq!(target, "/a");
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_direct_route() {
        let mut registry = Registry::new();
        registry.register(RouteDescriptor::path(Method::Get, "/a", ok)).unwrap();

        assert!(matches!(
            registry.register(RouteDescriptor::path(Method::Get, "/a", ok)),
            Err(RegistrationError::Duplicate { .. })
        ));
        registry.register(RouteDescriptor::path(Method::Put, "/a", ok)).unwrap();
        registry.register(get("/a")).unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn resolved_binds() {
        let registry =
            Registry::from_routes([get("/user/{id}").params([ParamKind::Int])]).unwrap();

        let resolved = registry.resolve(&Method::Get, "/user/7").unwrap();
        assert_eq!(resolved.bind("/user/7").unwrap().int("id"), Some(7));
    }

    struct Pair {
        second: &'static str,
    }

    impl Controller for Pair {
        fn routes(self: Arc<Self>) -> Vec<RouteDescriptor> {
            vec![
                RouteDescriptor::path(Method::Get, "/first", ok),
                RouteDescriptor::path(Method::Get, self.second, ok),
            ]
        }
    }

    #[test]
    fn controller_is_all_or_nothing() {
        let mut registry = Registry::new();
        registry.controller(Arc::new(Pair { second: "/second" })).unwrap();
        assert_eq!(registry.len(), 2);

        let mut registry = Registry::new();
        registry.register(RouteDescriptor::path(Method::Get, "/taken", ok)).unwrap();
        assert!(registry.controller(Arc::new(Pair { second: "/taken" })).is_err());
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve(&Method::Get, "/first").is_err());
    }

    #[test]
    fn handle_swap() {
        let handle = RegistryHandle::new(Registry::new());
        let snapshot = handle.load();

        let old = handle.swap(Registry::from_routes([get("/x")]).unwrap());

        assert!(old.is_empty());
        assert!(snapshot.is_empty());
        assert_eq!(handle.clone().load().len(), 1);
    }

    #[test]
    fn self_replacing_routes_do_not_leak() {
        let handle = RegistryHandle::new(Registry::new());
        let weak = handle.downgrade();

        let captured = weak.clone();
        let reset = move |_: Request, _: Args| {
            if let Some(handle) = captured.upgrade() {
                handle.swap(Registry::new());
            }
            async { Ok::<_, HandlerError>(Response::new(StatusCode::Ok)) }
        };
        handle.swap(Registry::from_routes([RouteDescriptor::path(Method::Post, "/reset", reset)]).unwrap());

        assert!(weak.upgrade().is_some());
        drop(handle);
        assert!(weak.upgrade().is_none());
    }
}
