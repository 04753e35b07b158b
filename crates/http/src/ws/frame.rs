//! RFC 6455 frame codec over the byte stream.
//!
//! Frames arrive masked from clients and leave unmasked from the server.
//! Length encoding on the way out always uses the minimal width.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::WsError;
use crate::stream::ByteStream;
use crate::utils::ensure;

/// Hard cap on a single frame's payload.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn from_u8(value: u8) -> Result<Self, WsError> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(WsError::invalid_frame(format!("unknown opcode {other:#x}"))),
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// One decoded frame, payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Bytes,
}

/// Reads one client frame. The mask bit is mandatory on inbound frames.
pub async fn read_frame<S>(stream: &mut ByteStream<S>, timeout: Duration) -> Result<Frame, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let header = stream.read_exact(2, timeout).await?;
    let fin = header[0] & 0x80 != 0;
    ensure!(header[0] & 0x70 == 0, WsError::invalid_frame("reserved bits set"));
    let opcode = OpCode::from_u8(header[0] & 0x0F)?;
    let masked = header[1] & 0x80 != 0;
    ensure!(masked, WsError::invalid_frame("client frame not masked"));

    let len = match header[1] & 0x7F {
        126 => {
            let ext = stream.read_exact(2, timeout).await?;
            u16::from_be_bytes([ext[0], ext[1]]) as u64
        }
        127 => {
            let ext = stream.read_exact(8, timeout).await?;
            u64::from_be_bytes(ext[..8].try_into().expect("8 bytes"))
        }
        n => n as u64,
    };

    if opcode.is_control() {
        ensure!(fin, WsError::invalid_frame("fragmented control frame"));
        ensure!(len <= 125, WsError::invalid_frame("oversized control frame"));
    }
    ensure!(
        len <= MAX_FRAME_PAYLOAD as u64,
        WsError::invalid_frame(format!("payload of {len} bytes exceeds the frame cap"))
    );

    let key = stream.read_exact(4, timeout).await?;
    let mut payload = stream.read_exact(len as usize, timeout).await?.to_vec();
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }

    Ok(Frame { fin, opcode, payload: Bytes::from(payload) })
}

/// Encodes one server frame, unmasked, with minimal-width length.
pub fn encode_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(payload.len() + 10);
    let fin_bit = if fin { 0x80 } else { 0x00 };
    out.push(fin_bit | opcode.as_u8());

    match payload.len() {
        n if n <= 125 => out.push(n as u8),
        n if n <= u16::MAX as usize => {
            out.push(126);
            out.extend_from_slice(&(n as u16).to_be_bytes());
        }
        n => {
            out.push(127);
            out.extend_from_slice(&(n as u64).to_be_bytes());
        }
    }
    out.extend_from_slice(payload);
    Bytes::from(out)
}

/// Builds a masked client frame the way a browser would.
#[cfg(test)]
pub(crate) fn client_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    const KEY: [u8; 4] = [0x11, 0x22, 0x33, 0x44];
    let mut out = Vec::with_capacity(payload.len() + 14);
    let fin_bit = if fin { 0x80u8 } else { 0x00 };
    out.push(fin_bit | opcode.as_u8());

    match payload.len() {
        n if n <= 125 => out.push(0x80 | n as u8),
        n if n <= u16::MAX as usize => {
            out.push(0x80 | 126);
            out.extend_from_slice(&(n as u16).to_be_bytes());
        }
        n => {
            out.push(0x80 | 127);
            out.extend_from_slice(&(n as u64).to_be_bytes());
        }
    }
    out.extend_from_slice(&KEY);
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ KEY[i % 4]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    const TIMEOUT: Duration = Duration::from_millis(200);

    async fn read_one(raw: Vec<u8>) -> Result<Frame, WsError> {
        let (mut client, server) = tokio::io::duplex(256 * 1024);
        let mut stream = ByteStream::new(server);
        tokio::spawn(async move {
            client.write_all(&raw).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        read_frame(&mut stream, TIMEOUT).await
    }

    #[tokio::test]
    async fn small_text_frame() {
        let frame = read_one(client_frame(true, OpCode::Text, b"hello")).await.unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn sixteen_bit_length() {
        let payload = vec![0xAB; 300];
        let frame = read_one(client_frame(true, OpCode::Binary, &payload)).await.unwrap();
        assert_eq!(frame.payload.len(), 300);
        assert_eq!(frame.payload.as_ref(), &payload[..]);
    }

    #[tokio::test]
    async fn sixty_four_bit_length_round_trip() {
        let payload: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
        let frame = read_one(client_frame(true, OpCode::Binary, &payload)).await.unwrap();
        assert_eq!(frame.payload.len(), 70_000);
        assert_eq!(frame.payload.as_ref(), &payload[..]);
    }

    #[tokio::test]
    async fn unmasked_client_frame_rejected() {
        // Server-style encoding lacks the mask bit.
        let raw = encode_frame(true, OpCode::Text, b"hi").to_vec();
        let err = read_one(raw).await.unwrap_err();
        assert!(matches!(err, WsError::InvalidFrame { .. }));
    }

    #[tokio::test]
    async fn reserved_bits_rejected() {
        let mut raw = client_frame(true, OpCode::Text, b"hi");
        raw[0] |= 0x40;
        let err = read_one(raw).await.unwrap_err();
        assert!(matches!(err, WsError::InvalidFrame { .. }));
    }

    #[tokio::test]
    async fn fragmented_control_frame_rejected() {
        let raw = client_frame(false, OpCode::Ping, b"x");
        let err = read_one(raw).await.unwrap_err();
        assert!(matches!(err, WsError::InvalidFrame { .. }));
    }

    #[test]
    fn encode_uses_minimal_length_width() {
        assert_eq!(encode_frame(true, OpCode::Text, &[b'a'; 5]).len(), 2 + 5);
        assert_eq!(encode_frame(true, OpCode::Binary, &[b'a'; 300]).len(), 4 + 300);
        assert_eq!(encode_frame(true, OpCode::Binary, &vec![b'a'; 70_000]).len(), 10 + 70_000);
    }

    #[test]
    fn encode_sets_fin_and_opcode() {
        let frame = encode_frame(true, OpCode::Pong, b"ok");
        assert_eq!(frame[0], 0x8A);
        assert_eq!(frame[1], 2);
        assert_eq!(&frame[2..], b"ok");

        let fragment = encode_frame(false, OpCode::Text, b"par");
        assert_eq!(fragment[0], 0x01);
    }
}
