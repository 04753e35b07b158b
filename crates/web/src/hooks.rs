//! Lifecycle hooks around request dispatch.
//!
//! Hooks run in registration order: `on_request` before routing (a `Some`
//! response short-circuits the route entirely), `on_response` after the
//! handler and CORS header merge, just before serialization.

use async_trait::async_trait;
use wafer_http::{Request, Response};

#[allow(unused_variables)]
#[async_trait]
pub trait Hook: Send + Sync {
    /// Runs before routing. Returning a response answers the request
    /// immediately; later hooks and the route handler are skipped.
    async fn on_request(&self, request: &mut Request) -> Option<Response> {
        None
    }

    /// Runs after the handler produced a response.
    async fn on_response(&self, request: &Request, response: &mut Response) {}
}
