//! The message-level WebSocket session loop.
//!
//! After the upgrade the connection hands its stream here. The loop decodes
//! frames, reassembles fragmented messages, answers pings, runs the close
//! handshake and drives a [`WsEndpoint`] through its callbacks. Idle periods
//! are probed with a server ping; a peer that misses two probe intervals is
//! treated as gone.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use crate::config::ServerConfig;
use crate::protocol::{Request, WsError};
use crate::stream::ByteStream;
use crate::ws::frame::{encode_frame, read_frame, OpCode};

/// One complete data message, fragments already reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

/// Outbound half of a session, handed to every endpoint callback.
///
/// All sends fail with [`WsError::SessionClosed`] once the session has ended;
/// [`WsControl::close`] after a close was already sent is a no-op.
#[async_trait]
pub trait WsControl: Send {
    async fn send_text(&mut self, text: &str) -> Result<(), WsError>;
    async fn send_binary(&mut self, data: &[u8]) -> Result<(), WsError>;
    /// Initiates the close handshake with the given status code and reason.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), WsError>;
}

/// Application callbacks of one WebSocket session.
///
/// `on_disconnect` runs exactly once, whatever ended the session.
#[allow(unused_variables)]
#[async_trait]
pub trait WsEndpoint: Send {
    /// Picks one of the subprotocols the client offered. Returning `None`
    /// when protocols were offered aborts the upgrade with a `400`.
    fn select_subprotocol(&self, offered: &[String]) -> Option<String> {
        None
    }

    async fn on_connect(&mut self, request: &Request, ctrl: &mut dyn WsControl) {}

    async fn on_message(&mut self, message: Message, ctrl: &mut dyn WsControl) {}

    async fn on_ping(&mut self, payload: &[u8], ctrl: &mut dyn WsControl) {}

    async fn on_pong(&mut self, payload: &[u8], ctrl: &mut dyn WsControl) {}

    /// `code` is the peer's close status when the peer initiated the close.
    async fn on_disconnect(&mut self, code: Option<u16>, ctrl: &mut dyn WsControl) {}
}

struct Controller<'a, S> {
    stream: &'a mut ByteStream<S>,
    close_sent: bool,
    ended: bool,
}

impl<S> Controller<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), WsError> {
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<S> WsControl for Controller<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_text(&mut self, text: &str) -> Result<(), WsError> {
        if self.ended {
            return Err(WsError::SessionClosed);
        }
        self.write_frame(encode_frame(true, OpCode::Text, text.as_bytes())).await
    }

    async fn send_binary(&mut self, data: &[u8]) -> Result<(), WsError> {
        if self.ended {
            return Err(WsError::SessionClosed);
        }
        self.write_frame(encode_frame(true, OpCode::Binary, data)).await
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), WsError> {
        if self.ended {
            return Err(WsError::SessionClosed);
        }
        if self.close_sent {
            return Ok(());
        }
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        self.write_frame(encode_frame(true, OpCode::Close, &payload)).await?;
        self.close_sent = true;
        Ok(())
    }
}

/// Runs one session to completion.
///
/// Returns `Ok` on an orderly close handshake from either side; decode and
/// transport errors are returned after `on_disconnect` has run.
pub async fn run_session<S>(
    stream: &mut ByteStream<S>,
    config: &ServerConfig,
    request: &Request,
    endpoint: &mut dyn WsEndpoint,
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut ctrl = Controller { stream, close_sent: false, ended: false };
    endpoint.on_connect(request, &mut ctrl).await;

    // Fragmented message under reassembly.
    let mut pending: Option<(OpCode, Vec<u8>)> = None;
    let mut awaiting_pong = false;
    let mut peer_code: Option<u16> = None;

    let result = loop {
        let frame = match read_frame(ctrl.stream, config.ws_ping_interval).await {
            Ok(frame) => frame,
            Err(WsError::Timeout) => {
                if awaiting_pong {
                    debug!("peer missed the liveness probe, dropping session");
                    break Err(WsError::Timeout);
                }
                if let Err(e) = ctrl.write_frame(encode_frame(true, OpCode::Ping, b"")).await {
                    break Err(e);
                }
                awaiting_pong = true;
                continue;
            }
            Err(e) => break Err(e),
        };
        awaiting_pong = false;
        trace!(opcode = ?frame.opcode, fin = frame.fin, len = frame.payload.len(), "frame received");

        match frame.opcode {
            OpCode::Ping => {
                if let Err(e) = ctrl.write_frame(encode_frame(true, OpCode::Pong, &frame.payload)).await {
                    break Err(e);
                }
                endpoint.on_ping(&frame.payload, &mut ctrl).await;
            }
            OpCode::Pong => {
                endpoint.on_pong(&frame.payload, &mut ctrl).await;
            }
            OpCode::Close => {
                if frame.payload.len() >= 2 {
                    peer_code = Some(u16::from_be_bytes([frame.payload[0], frame.payload[1]]));
                }
                if !ctrl.close_sent {
                    let echo = &frame.payload[..frame.payload.len().min(2)];
                    if let Err(e) = ctrl.write_frame(encode_frame(true, OpCode::Close, echo)).await {
                        break Err(e);
                    }
                    ctrl.close_sent = true;
                }
                break Ok(());
            }
            OpCode::Text | OpCode::Binary => {
                if pending.is_some() {
                    break Err(WsError::invalid_frame("data frame interleaved with fragments"));
                }
                if frame.fin {
                    match assemble(frame.opcode, frame.payload.to_vec()) {
                        Ok(message) => endpoint.on_message(message, &mut ctrl).await,
                        Err(e) => break Err(e),
                    }
                } else {
                    pending = Some((frame.opcode, frame.payload.to_vec()));
                }
            }
            OpCode::Continuation => {
                let Some((opcode, mut buffer)) = pending.take() else {
                    break Err(WsError::invalid_frame("continuation without a started message"));
                };
                buffer.extend_from_slice(&frame.payload);
                if frame.fin {
                    match assemble(opcode, buffer) {
                        Ok(message) => endpoint.on_message(message, &mut ctrl).await,
                        Err(e) => break Err(e),
                    }
                } else {
                    pending = Some((opcode, buffer));
                }
            }
        }
    };

    ctrl.ended = true;
    endpoint.on_disconnect(peer_code, &mut ctrl).await;
    result
}

fn assemble(opcode: OpCode, buffer: Vec<u8>) -> Result<Message, WsError> {
    match opcode {
        OpCode::Text => String::from_utf8(buffer)
            .map(Message::Text)
            .map_err(|_| WsError::invalid_frame("text message is not valid utf-8")),
        _ => Ok(Message::Binary(Bytes::from(buffer))),
    }
}
