//! Request handlers.
//!
//! A [`Handler`] receives the parsed request plus pull-style access to the
//! body for routes that opted out of automatic reception. Plain async
//! functions are adapted through [`FnHandler`].

use async_trait::async_trait;
use futures::future::BoxFuture;
use wafer_http::{BodyReceiver, Request, Response};

/// Errors a handler may surface; the app converts them into a `500`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = Result<Response, HandlerError>;

/// Everything a handler can touch during one exchange.
pub struct RequestContext<'a> {
    pub request: &'a mut Request,
    pub body: &'a mut dyn BodyReceiver,
}

impl RequestContext<'_> {
    /// Receives the whole remaining body. Routes served with the default
    /// plan already have it; this is for routes that opted out.
    pub async fn read_body(&mut self) -> Result<(), wafer_http::ParseError> {
        self.body.recv_body(self.request, true).await.map(|_| ())
    }

    /// Receives the next body unit, returning whether the body is complete.
    pub async fn read_body_chunk(&mut self) -> Result<bool, wafer_http::ParseError> {
        self.body.recv_body(self.request, false).await
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext<'_>) -> HandlerResult;
}

/// Adapts a closure returning a boxed future into a [`Handler`].
///
/// ```ignore
/// let hello = FnHandler(|ctx| {
///     Box::pin(async move { Ok(Response::text(format!("hello {}", ctx.request.path()))) })
/// });
/// ```
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a, 'b> Fn(&'a mut RequestContext<'b>) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    async fn handle(&self, ctx: &mut RequestContext<'_>) -> HandlerResult {
        (self.0)(ctx).await
    }
}
