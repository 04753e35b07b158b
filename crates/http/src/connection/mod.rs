//! Per-connection request/response loop.
//!
//! One [`HttpConnection`] runs inside one spawned task and owns its socket
//! for the connection's whole life. Requests are served strictly in
//! sequence; pipelined request bytes simply wait in the stream buffer until
//! the current exchange finishes. A successful WebSocket upgrade hands the
//! stream to the session loop and ends HTTP service on the connection.

use std::sync::Arc;

use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info};

use crate::codec::body::{parse_body, BodyReader};
use crate::codec::request::parse_request_line_and_headers;
use crate::codec::response::{write_response, ExchangeContext};
use crate::config::ServerConfig;
use crate::protocol::{ParseError, Request, Response};
use crate::service::{BodyReceiver, Dispatch, Service};
use crate::stream::ByteStream;
use crate::ws;

/// State of one accepted connection.
pub struct HttpConnection<S> {
    stream: ByteStream<S>,
    config: Arc<ServerConfig>,
    peer_ip: String,
}

/// [`BodyReceiver`] handed to the service; reads go through the connection's
/// own stream and framing state, so whatever the handler leaves unread can be
/// drained afterwards.
struct ConnectionBody<'a, S> {
    stream: &'a mut ByteStream<S>,
    reader: &'a mut BodyReader,
    timeout: std::time::Duration,
}

#[async_trait::async_trait]
impl<S> BodyReceiver for ConnectionBody<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv_body(&mut self, request: &mut Request, get_all: bool) -> Result<bool, ParseError> {
        self.reader.recv(self.stream, request, get_all, self.timeout).await
    }
}

impl<S> HttpConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: S, peer_ip: String, config: Arc<ServerConfig>) -> Self {
        Self { stream: ByteStream::new(io), config, peer_ip }
    }

    /// Serves requests until the connection closes. All error handling is
    /// terminal here; nothing propagates out of the connection task.
    pub async fn serve(mut self, service: Arc<dyn Service>) {
        let config = Arc::clone(&self.config);
        let mut served = 0usize;

        loop {
            // The keep-alive timeout covers only the idle wait for the next
            // request's first byte; reading the head itself runs on the
            // request timeout.
            if served > 0 {
                if let Err(e) = self.stream.await_data(config.keep_alive_timeout).await {
                    self.handle_parse_error(e, false).await;
                    break;
                }
            }

            let mut request = match parse_request_line_and_headers(
                &mut self.stream,
                config.request_timeout,
                &self.peer_ip,
            )
            .await
            {
                Ok(request) => request,
                Err(e) => {
                    self.handle_parse_error(e, false).await;
                    break;
                }
            };
            served += 1;

            let plan = service.plan(&request);
            if !plan.ranges {
                request.clear_ranges();
            }

            let mut reader = BodyReader::new(request.payload());

            if !request.payload().is_empty()
                && request.header("expect").is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
            {
                if self.stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.is_err() {
                    break;
                }
                let _ = self.stream.flush().await;
            }

            if plan.auto_body {
                let received = reader
                    .recv(&mut self.stream, &mut request, true, config.request_timeout)
                    .await
                    .and_then(|_| parse_body(&mut request));
                if let Err(e) = received {
                    self.handle_parse_error(e, true).await;
                    break;
                }
            }

            let dispatch = {
                let mut body = ConnectionBody {
                    stream: &mut self.stream,
                    reader: &mut reader,
                    timeout: config.request_timeout,
                };
                service.respond(&mut request, &mut body).await
            };

            // Re-align the stream on the next request boundary before any
            // response bytes go out.
            if let Err(e) = reader.drain(&mut self.stream, config.request_timeout).await {
                self.handle_parse_error(e, true).await;
                break;
            }

            match dispatch {
                Dispatch::Response(response) => {
                    let keep_alive = config.keep_alive
                        && request.allows_keep_alive()
                        && served < config.keep_alive_max_requests;

                    let ctx = ExchangeContext::from_request(&request, keep_alive);
                    let (status, keep_alive) =
                        match write_response(&mut self.stream, &ctx, response, &config).await {
                            Ok(written) => written,
                            Err(e) => {
                                error!(client_ip = %self.peer_ip, "failed to write response: {e}");
                                break;
                            }
                        };
                    access_log(&request, status);

                    if !keep_alive {
                        break;
                    }
                }
                Dispatch::Upgrade(mut endpoint) => {
                    self.upgrade(&request, endpoint.as_mut()).await;
                    break;
                }
            }
        }

        let _ = self.stream.shutdown().await;
        debug!(client_ip = %self.peer_ip, served, "connection closed");
    }

    /// Performs the WebSocket handshake and runs the session to completion.
    /// Any validation failure answers with a `400` and closes instead.
    async fn upgrade(&mut self, request: &Request, endpoint: &mut dyn ws::WsEndpoint) {
        let config = Arc::clone(&self.config);

        let Some(client_key) = request.header("sec-websocket-key") else {
            self.reject_upgrade(request, "missing sec-websocket-key").await;
            return;
        };

        let offered: Vec<String> = request
            .header("sec-websocket-protocol")
            .map(|v| v.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        let subprotocol = if offered.is_empty() {
            None
        } else {
            match endpoint.select_subprotocol(&offered) {
                Some(protocol) => Some(protocol),
                None => {
                    self.reject_upgrade(request, "no acceptable subprotocol").await;
                    return;
                }
            }
        };

        let response = ws::handshake_response(client_key, subprotocol.as_deref());
        let ctx = ExchangeContext::from_request(request, false);
        match write_response(&mut self.stream, &ctx, response, &config).await {
            Ok((status, _)) => access_log(request, status),
            Err(e) => {
                error!(client_ip = %self.peer_ip, "failed to write upgrade response: {e}");
                return;
            }
        }

        if let Err(e) = ws::run_session(&mut self.stream, &config, request, endpoint).await {
            debug!(client_ip = %request.client_ip(), "websocket session ended: {e}");
        }
    }

    async fn reject_upgrade(&mut self, request: &Request, reason: &str) {
        info!(client_ip = %request.client_ip(), path = request.path(), "upgrade rejected: {reason}");
        let ctx = ExchangeContext::from_request(request, false);
        let config = Arc::clone(&self.config);
        let _ =
            write_response(&mut self.stream, &ctx, Response::status(StatusCode::BAD_REQUEST), &config).await;
    }

    /// Maps a read/parse failure to its close behavior: silent close for
    /// transport errors and idle expiry, an error response otherwise.
    /// `mid_request` marks failures after the head was already accepted.
    async fn handle_parse_error(&mut self, e: ParseError, mid_request: bool) {
        if e.is_fatal() {
            debug!(client_ip = %self.peer_ip, "connection lost: {e}");
            return;
        }
        // A timeout with nothing buffered is an idle connection expiring,
        // not a stalled request.
        if e.is_timeout() && !mid_request && self.stream.buffered().is_empty() {
            debug!(client_ip = %self.peer_ip, "idle connection expired");
            return;
        }
        let Some(status) = e.status() else { return };
        info!(client_ip = %self.peer_ip, status = status.as_u16(), "request failed: {e}");

        let config = Arc::clone(&self.config);
        let _ = write_response(&mut self.stream, &ExchangeContext::fallback(), Response::status(status), &config)
            .await;
    }
}

fn access_log(request: &Request, status: StatusCode) {
    info!(
        client_ip = %request.client_ip(),
        method = %request.method(),
        path = request.full_path(),
        status = status.as_u16(),
        "request served"
    );
}
