//! The application: routing, CORS, hooks and dispatch, behind the engine's
//! [`Service`] seam.

use std::sync::Arc;

use async_trait::async_trait;
use http::header::HeaderValue;
use http::{Method, StatusCode};
use tracing::error;
use wafer_http::{BodyReceiver, Dispatch, Request, Response, RoutePlan, Service, WsEndpoint};

use crate::cors::{CorsDecision, CorsPolicy, HeaderSet};
use crate::handler::{Handler, HandlerResult, RequestContext};
use crate::hooks::Hook;
use crate::router::{Endpoint, Route, RouteMatch, Router, RouterBuilder};
use crate::static_files::StaticFiles;

/// Answers `404` for paths no route or fallback claimed.
struct NotFoundHandler;

#[async_trait]
impl Handler for NotFoundHandler {
    async fn handle(&self, _ctx: &mut RequestContext<'_>) -> HandlerResult {
        Ok(Response::status(StatusCode::NOT_FOUND))
    }
}

/// Collects routes and middleware, then freezes into an [`App`].
pub struct AppBuilder {
    router: RouterBuilder,
    cors: Option<CorsPolicy>,
    hooks: Vec<Arc<dyn Hook>>,
    fallback: Arc<dyn Handler>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self {
            router: RouterBuilder::new(),
            cors: None,
            hooks: Vec::new(),
            fallback: Arc::new(NotFoundHandler),
        }
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, method: Method, path: &str, handler: impl Handler + 'static) -> Self {
        self.router.route(path, method, Arc::new(handler), RoutePlan::default());
        self
    }

    /// Registers a route with explicit per-route switches, for handlers that
    /// stream their own body or serve ranges themselves.
    pub fn route_with_plan(
        mut self,
        method: Method,
        path: &str,
        plan: RoutePlan,
        handler: impl Handler + 'static,
    ) -> Self {
        self.router.route(path, method, Arc::new(handler), plan);
        self
    }

    pub fn get(self, path: &str, handler: impl Handler + 'static) -> Self {
        self.route(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler + 'static) -> Self {
        self.route(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler + 'static) -> Self {
        self.route(Method::PUT, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler + 'static) -> Self {
        self.route(Method::DELETE, path, handler)
    }

    pub fn websocket<F>(mut self, path: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn WsEndpoint> + Send + Sync + 'static,
    {
        self.router.websocket(path, Arc::new(factory));
        self
    }

    pub fn cors(mut self, policy: CorsPolicy) -> Self {
        self.cors = Some(policy);
        self
    }

    pub fn hook(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Replaces the `404` fallback with a handler of its own.
    pub fn fallback(mut self, handler: impl Handler + 'static) -> Self {
        self.fallback = Arc::new(handler);
        self
    }

    /// Serves unrouted paths as static files below `root`.
    pub fn static_dir(self, root: impl Into<std::path::PathBuf>) -> Self {
        self.fallback(StaticFiles::new(root))
    }

    pub fn build(self) -> App {
        App { router: self.router.build(), cors: self.cors, hooks: self.hooks, fallback: self.fallback }
    }
}

pub struct App {
    router: Router,
    cors: Option<CorsPolicy>,
    hooks: Vec<Arc<dyn Hook>>,
    fallback: Arc<dyn Handler>,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    async fn run_handler(
        &self,
        handler: &dyn Handler,
        request: &mut Request,
        body: &mut dyn BodyReceiver,
    ) -> Response {
        let mut ctx = RequestContext { request, body };
        match handler.handle(&mut ctx).await {
            Ok(response) => response,
            Err(e) => {
                error!(path = ctx.request.path(), "handler failed: {e}");
                Response::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    async fn finish(
        &self,
        request: &Request,
        mut response: Response,
        cors_headers: Option<HeaderSet>,
    ) -> Dispatch {
        if let Some(headers) = cors_headers {
            for (name, value) in headers {
                response.headers_mut().append(name, value);
            }
        }
        for hook in &self.hooks {
            hook.on_response(request, &mut response).await;
        }
        Dispatch::Response(response)
    }
}

#[async_trait]
impl Service for App {
    fn plan(&self, request: &Request) -> RoutePlan {
        match self.router.at(request.path(), request.method(), request.is_websocket()) {
            RouteMatch::Found { route, .. } => route.plan,
            _ => RoutePlan::default(),
        }
    }

    async fn respond(&self, request: &mut Request, body: &mut dyn BodyReceiver) -> Dispatch {
        let cors_headers = match self.cors.as_ref().map(|c| c.evaluate(request)) {
            None | Some(CorsDecision::NotCors) => None,
            Some(CorsDecision::Forbidden) => {
                return Dispatch::Response(Response::status(StatusCode::FORBIDDEN));
            }
            Some(CorsDecision::Preflight(headers)) => {
                let mut response = Response::new(StatusCode::NO_CONTENT);
                for (name, value) in headers {
                    response.headers_mut().append(name, value);
                }
                return Dispatch::Response(response);
            }
            Some(CorsDecision::Allowed(headers)) => Some(headers),
        };

        for hook in &self.hooks {
            if let Some(response) = hook.on_request(request).await {
                return self.finish(request, response, cors_headers).await;
            }
        }

        let response = match self.router.at(request.path(), request.method(), request.is_websocket()) {
            RouteMatch::Found { route, params } => {
                request.set_params(params);
                match route {
                    Route { endpoint: Endpoint::WebSocket(factory), .. } => {
                        return Dispatch::Upgrade(factory());
                    }
                    Route { endpoint: Endpoint::Http(handler), .. } => {
                        self.run_handler(handler.as_ref(), request, body).await
                    }
                }
            }
            RouteMatch::NotFound => {
                let fallback = Arc::clone(&self.fallback);
                self.run_handler(fallback.as_ref(), request, body).await
            }
            RouteMatch::MethodNotAllowed { allowed } => {
                let allow =
                    allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                let status = if request.method() == Method::OPTIONS {
                    StatusCode::NO_CONTENT
                } else {
                    StatusCode::METHOD_NOT_ALLOWED
                };
                let mut response = Response::status(status);
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    response.headers_mut().insert(http::header::ALLOW, value);
                }
                response
            }
        };

        self.finish(request, response, cors_headers).await
    }
}
