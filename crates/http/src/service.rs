//! The seam between the connection engine and the application layer.
//!
//! A [`Service`] is consulted twice per exchange: [`Service::plan`] before
//! the body is touched, so routes can opt out of automatic body reception
//! and range service, and [`Service::respond`] to produce the response or
//! hand the connection over to a WebSocket endpoint.

use async_trait::async_trait;

use crate::protocol::{ParseError, Request, Response};
use crate::ws::WsEndpoint;

/// Per-route switches applied before dispatch.
#[derive(Debug, Copy, Clone)]
pub struct RoutePlan {
    /// Receive and interpret the whole body before calling the handler.
    pub auto_body: bool,
    /// Honor `Range` request headers when serializing the response.
    pub ranges: bool,
}

impl Default for RoutePlan {
    fn default() -> Self {
        Self { auto_body: true, ranges: true }
    }
}

/// Outcome of dispatching one request.
pub enum Dispatch {
    /// An ordinary HTTP response to serialize.
    Response(Response),
    /// Upgrade the connection and run this endpoint's session.
    Upgrade(Box<dyn WsEndpoint>),
}

/// Pull-style access to the request body, implemented by the connection.
///
/// Handlers of routes that opted out of automatic reception use this to read
/// the body on their own schedule. Whatever they leave unread is drained by
/// the connection before the next exchange.
#[async_trait]
pub trait BodyReceiver: Send {
    /// Receives body bytes into `request`. With `get_all` the whole body is
    /// read; otherwise one unit per call. Returns whether the body is now
    /// complete.
    async fn recv_body(&mut self, request: &mut Request, get_all: bool) -> Result<bool, ParseError>;
}

/// The application behind the connection engine.
#[async_trait]
pub trait Service: Send + Sync {
    /// Route-level switches for this request. Called once, before any body
    /// bytes are read.
    fn plan(&self, request: &Request) -> RoutePlan;

    /// Produces the response for one request. Infallible by contract: the
    /// implementation converts its own failures into error responses.
    async fn respond(&self, request: &mut Request, body: &mut dyn BodyReceiver) -> Dispatch;
}
