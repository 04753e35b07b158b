//! Server-wide configuration shared by every connection task.
//!
//! A [`ServerConfig`] is built once at startup and handed to connection tasks
//! behind an `Arc`. Connection tasks only read it, so no synchronization is
//! required beyond the shared pointer.

use std::time::Duration;

use crate::codec::encoding::ContentEncoding;

/// Read-only server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server-wide keep-alive switch.
    pub keep_alive: bool,
    /// Idle timeout while waiting for the next request on a kept-alive connection.
    pub keep_alive_timeout: Duration,
    /// Per-read timeout within one request/response exchange.
    pub request_timeout: Duration,
    /// Maximum number of exchanges served on one connection before it is closed.
    pub keep_alive_max_requests: usize,
    /// Compression schemes the server is willing to apply, in preference order.
    pub compress_schemes: Vec<ContentEncoding>,
    /// Fixed bodies smaller than this are never compressed.
    pub compress_min_length: usize,
    /// Emit `Date` headers with microsecond precision.
    pub date_microseconds: bool,
    /// Value of the `Server` response header.
    pub server_name: String,
    /// Read timeout of the WebSocket message loop; doubles as the liveness
    /// ping cadence.
    pub ws_ping_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            keep_alive_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            keep_alive_max_requests: 100,
            compress_schemes: vec![
                ContentEncoding::Gzip,
                ContentEncoding::Brotli,
                ContentEncoding::Zstd,
                ContentEncoding::Deflate,
            ],
            compress_min_length: 1024,
            date_microseconds: false,
            server_name: "wafer".to_string(),
            ws_ping_interval: Duration::from_secs(20),
        }
    }
}
