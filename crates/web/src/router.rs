//! Path and method routing on top of `matchit`.
//!
//! Routes are collected into a [`RouterBuilder`] and frozen into a
//! [`Router`] before the server starts. A path holds one handler per HTTP
//! method plus at most one WebSocket endpoint factory; lookups distinguish
//! a missing path from a path with no entry for the method.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use tracing::warn;
use wafer_http::{RoutePlan, WsEndpoint};

use crate::handler::Handler;

/// Produces a fresh endpoint per accepted WebSocket connection.
pub type WsFactory = Arc<dyn Fn() -> Box<dyn WsEndpoint> + Send + Sync>;

/// What a route points at.
#[derive(Clone)]
pub enum Endpoint {
    Http(Arc<dyn Handler>),
    WebSocket(WsFactory),
}

/// One registered route with its per-route switches.
#[derive(Clone)]
pub struct Route {
    pub endpoint: Endpoint,
    pub plan: RoutePlan,
}

#[derive(Clone, Default)]
struct PathRoutes {
    by_method: HashMap<Method, Route>,
    websocket: Option<Route>,
}

/// Outcome of one lookup.
pub enum RouteMatch {
    Found { route: Route, params: HashMap<String, String> },
    NotFound,
    MethodNotAllowed { allowed: Vec<Method> },
}

#[derive(Default)]
pub struct RouterBuilder {
    paths: HashMap<String, PathRoutes>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&mut self, path: &str, method: Method, handler: Arc<dyn Handler>, plan: RoutePlan) {
        let entry = self.paths.entry(path.to_string()).or_default();
        if entry.by_method.insert(method.clone(), Route { endpoint: Endpoint::Http(handler), plan }).is_some() {
            warn!(path, %method, "route registered twice, keeping the last one");
        }
    }

    pub fn websocket(&mut self, path: &str, factory: WsFactory) {
        let entry = self.paths.entry(path.to_string()).or_default();
        if entry
            .websocket
            .replace(Route { endpoint: Endpoint::WebSocket(factory), plan: RoutePlan::default() })
            .is_some()
        {
            warn!(path, "websocket route registered twice, keeping the last one");
        }
    }

    pub fn build(self) -> Router {
        let mut inner = matchit::Router::new();
        for (path, routes) in self.paths {
            if let Err(e) = inner.insert(path.clone(), routes) {
                warn!(path, "failed to register route: {e}");
            }
        }
        Router { inner }
    }
}

pub struct Router {
    inner: matchit::Router<PathRoutes>,
}

impl Router {
    /// Looks up a request. WebSocket upgrades match on the upgrade flag
    /// instead of the method.
    pub fn at(&self, path: &str, method: &Method, websocket: bool) -> RouteMatch {
        let Ok(matched) = self.inner.at(path) else {
            return RouteMatch::NotFound;
        };

        let params: HashMap<String, String> =
            matched.params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();

        if websocket {
            return match &matched.value.websocket {
                Some(route) => RouteMatch::Found { route: route.clone(), params },
                None => RouteMatch::NotFound,
            };
        }

        match matched.value.by_method.get(method) {
            Some(route) => RouteMatch::Found { route: route.clone(), params },
            None => {
                // HEAD falls through to the GET handler; the engine strips
                // the body on the way out.
                if *method == Method::HEAD {
                    if let Some(route) = matched.value.by_method.get(&Method::GET) {
                        return RouteMatch::Found { route: route.clone(), params };
                    }
                }
                let mut allowed: Vec<Method> = matched.value.by_method.keys().cloned().collect();
                allowed.sort_by_key(|m| m.as_str().to_string());
                RouteMatch::MethodNotAllowed { allowed }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::handler::{HandlerResult, RequestContext};
    use wafer_http::Response;

    struct Nop;

    #[async_trait]
    impl Handler for Nop {
        async fn handle(&self, _ctx: &mut RequestContext<'_>) -> HandlerResult {
            Ok(Response::text("nop"))
        }
    }

    fn build_sample() -> Router {
        let mut builder = RouterBuilder::new();
        builder.route("/users/{id}", Method::GET, Arc::new(Nop), RoutePlan::default());
        builder.route("/users/{id}", Method::DELETE, Arc::new(Nop), RoutePlan::default());
        builder.websocket("/chat", Arc::new(|| unreachable!("not constructed in tests")));
        builder.build()
    }

    #[test]
    fn path_params_extracted() {
        let router = build_sample();
        match router.at("/users/42", &Method::GET, false) {
            RouteMatch::Found { params, .. } => {
                assert_eq!(params.get("id").map(String::as_str), Some("42"))
            }
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn unknown_path_not_found() {
        let router = build_sample();
        assert!(matches!(router.at("/nope", &Method::GET, false), RouteMatch::NotFound));
    }

    #[test]
    fn wrong_method_lists_allowed() {
        let router = build_sample();
        match router.at("/users/42", &Method::POST, false) {
            RouteMatch::MethodNotAllowed { allowed } => {
                assert_eq!(allowed, vec![Method::DELETE, Method::GET]);
            }
            _ => panic!("expected method not allowed"),
        }
    }

    #[test]
    fn head_reuses_get_route() {
        let router = build_sample();
        assert!(matches!(router.at("/users/42", &Method::HEAD, false), RouteMatch::Found { .. }));
    }

    #[test]
    fn websocket_matches_on_upgrade_flag() {
        let router = build_sample();
        assert!(matches!(router.at("/chat", &Method::GET, true), RouteMatch::Found { .. }));
        assert!(matches!(router.at("/chat", &Method::GET, false), RouteMatch::MethodNotAllowed { .. }));
        assert!(matches!(router.at("/users/1", &Method::GET, true), RouteMatch::NotFound));
    }
}
