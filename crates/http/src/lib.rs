//! A lightweight HTTP/1.1 connection engine with WebSocket support.
//!
//! `wafer-http` owns everything between an accepted socket and an
//! application-level [`Service`]: buffered reads with timeouts, request
//! parsing, body framing, the response serialization pipeline, keep-alive
//! accounting and the WebSocket upgrade path.
//!
//! The crate serves one request at a time per connection. Pipelined request
//! bytes wait in the stream buffer; concurrency comes from running one
//! connection per task, not from interleaving exchanges on one socket.
//!
//! Most applications will not use this crate directly but through
//! `wafer-web`, which layers routing, CORS and lifecycle hooks on top of the
//! [`Service`] seam.

pub mod codec;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod service;
pub mod stream;
pub mod ws;

mod utils;

pub use codec::encoding::ContentEncoding;
pub use config::ServerConfig;
pub use connection::HttpConnection;
pub use protocol::{
    BodyStream, ByteRange, Cookie, FilePart, ParseError, PayloadSize, Request, Response,
    ResponseBody, SameSite, SendError, WsError,
};
pub use service::{BodyReceiver, Dispatch, RoutePlan, Service};
pub use ws::{Message, WsControl, WsEndpoint};
