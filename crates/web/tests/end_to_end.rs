//! Full-stack exchanges: the app behind a real connection task, driven over
//! an in-memory socket pair.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use wafer_web::{
    App, CorsPolicy, Handler, HandlerResult, Message, RequestContext, Response, ServerConfig,
    WsControl, WsEndpoint,
};

#[derive(Serialize)]
struct Created {
    id: u64,
    name: String,
}

struct CreateUser;

#[async_trait]
impl Handler for CreateUser {
    async fn handle(&self, ctx: &mut RequestContext<'_>) -> HandlerResult {
        let name = ctx
            .request
            .json()
            .and_then(|j| j.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("anonymous")
            .to_string();
        Ok(Response::json(&Created { id: 7, name })?)
    }
}

struct Page;

#[async_trait]
impl Handler for Page {
    async fn handle(&self, _ctx: &mut RequestContext<'_>) -> HandlerResult {
        Ok(Response::text("lorem ipsum ".repeat(200)))
    }
}

struct EchoWs;

#[async_trait]
impl WsEndpoint for EchoWs {
    async fn on_message(&mut self, message: Message, ctrl: &mut dyn WsControl) {
        if let Message::Text(text) = message {
            let _ = ctrl.send_text(&text).await;
        }
    }
}

fn sample_app() -> App {
    App::builder()
        .post("/users", CreateUser)
        .get("/page", Page)
        .websocket("/ws", || Box::new(EchoWs))
        .cors(CorsPolicy::default())
        .build()
}

fn spawn_app() -> DuplexStream {
    let (client, server) = tokio::io::duplex(256 * 1024);
    let connection = wafer_http::HttpConnection::new(
        server,
        "127.0.0.1".to_string(),
        Arc::new(ServerConfig::default()),
    );
    tokio::spawn(connection.serve(Arc::new(sample_app())));
    client
}

async fn read_head(client: &mut DuplexStream) -> String {
    let mut collected = Vec::new();
    let mut byte = [0u8; 1];
    while !collected.ends_with(b"\r\n\r\n") {
        client.read_exact(&mut byte).await.unwrap();
        collected.push(byte[0]);
    }
    String::from_utf8(collected).unwrap()
}

fn header_of(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.eq_ignore_ascii_case(name).then(|| v.trim().to_string())
    })
}

async fn read_body(client: &mut DuplexStream, head: &str) -> Vec<u8> {
    let len: usize = header_of(head, "content-length").unwrap().parse().unwrap();
    let mut body = vec![0u8; len];
    client.read_exact(&mut body).await.unwrap();
    body
}

#[tokio::test]
async fn json_round_trip() {
    let mut client = spawn_app();
    let payload = r#"{"name":"ada"}"#;
    let request = format!(
        "POST /users HTTP/1.1\r\nHost: x\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        payload.len(),
        payload
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(header_of(&head, "content-type").as_deref(), Some("application/json; charset=utf-8"));

    let body = read_body(&mut client, &head).await;
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["id"], 7);
    assert_eq!(parsed["name"], "ada");
}

#[tokio::test]
async fn malformed_json_answered_with_400() {
    let mut client = spawn_app();
    client
        .write_all(
            b"POST /users HTTP/1.1\r\nHost: x\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: 4\r\n\r\n{bad",
        )
        .await
        .unwrap();

    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[tokio::test]
async fn cors_preflight_over_the_wire() {
    let mut client = spawn_app();
    client
        .write_all(
            b"OPTIONS /users HTTP/1.1\r\nHost: x\r\nConnection: close\r\nOrigin: https://app.example\r\nAccess-Control-Request-Method: POST\r\n\r\n",
        )
        .await
        .unwrap();

    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 204 No Content\r\n"));
    assert_eq!(header_of(&head, "access-control-allow-origin").as_deref(), Some("*"));
    assert!(header_of(&head, "access-control-allow-methods").is_some());
}

#[tokio::test]
async fn negotiated_compression_over_the_wire() {
    let mut client = spawn_app();
    client
        .write_all(
            b"GET /page HTTP/1.1\r\nHost: x\r\nConnection: close\r\nAccept-Encoding: br;q=0.2, gzip;q=0.8\r\n\r\n",
        )
        .await
        .unwrap();

    let head = read_head(&mut client).await;
    assert_eq!(header_of(&head, "content-encoding").as_deref(), Some("gzip"));

    let body = read_body(&mut client, &head).await;
    use std::io::Read;
    let mut decoder = flate2::read::GzDecoder::new(&body[..]);
    let mut text = String::new();
    decoder.read_to_string(&mut text).unwrap();
    assert_eq!(text, "lorem ipsum ".repeat(200));
}

#[tokio::test]
async fn websocket_echo_through_the_app() {
    let mut client = spawn_app();
    client
        .write_all(
            b"GET /ws HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .unwrap();

    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert_eq!(
        header_of(&head, "sec-websocket-accept").as_deref(),
        Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
    );

    // Masked client text frame carrying "hey".
    let key = [1u8, 2, 3, 4];
    let mut frame = vec![0x81, 0x80 | 3];
    frame.extend_from_slice(&key);
    frame.extend(b"hey".iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
    client.write_all(&frame).await.unwrap();

    let mut echoed = [0u8; 5];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, &[0x81, 0x03, b'h', b'e', b'y']);
}
