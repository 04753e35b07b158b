//! WebSocket support: handshake derivation, the frame codec and the
//! message-level session loop.

pub mod frame;
pub mod session;

pub use session::{run_session, Message, WsControl, WsEndpoint};

use base64ct::{Base64, Encoding};
use http::header::HeaderValue;
use http::StatusCode;
use sha1::{Digest, Sha1};

use crate::protocol::Response;

/// Fixed GUID appended to the client key, per RFC 6455 §4.2.2.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derives the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    Base64::encode_string(&hasher.finalize())
}

/// Builds the `101 Switching Protocols` response for an upgrade request.
pub fn handshake_response(client_key: &str, subprotocol: Option<&str>) -> Response {
    let mut response = Response::new(StatusCode::SWITCHING_PROTOCOLS)
        .with_header(http::header::UPGRADE, HeaderValue::from_static("websocket"))
        .with_header(http::header::CONNECTION, HeaderValue::from_static("Upgrade"));

    if let Ok(value) = HeaderValue::from_str(&accept_key(client_key)) {
        response = response.with_header(http::header::SEC_WEBSOCKET_ACCEPT, value);
    }
    if let Some(protocol) = subprotocol {
        if let Ok(value) = HeaderValue::from_str(protocol) {
            response = response.with_header(http::header::SEC_WEBSOCKET_PROTOCOL, value);
        }
    }
    response
}
