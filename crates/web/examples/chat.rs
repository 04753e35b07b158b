//! A minimal WebSocket echo endpoint next to a static frontend.

use async_trait::async_trait;
use wafer_web::{App, Message, Request, Server, WsControl, WsEndpoint};

struct Echo {
    peer: String,
}

#[async_trait]
impl WsEndpoint for Echo {
    async fn on_connect(&mut self, request: &Request, ctrl: &mut dyn WsControl) {
        self.peer = request.client_ip().to_string();
        let _ = ctrl.send_text("welcome to the echo room").await;
    }

    async fn on_message(&mut self, message: Message, ctrl: &mut dyn WsControl) {
        match message {
            Message::Text(text) => {
                let _ = ctrl.send_text(&format!("{}: {text}", self.peer)).await;
            }
            Message::Binary(data) => {
                let _ = ctrl.send_binary(&data).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    wafer_web::init_tracing();

    let app = App::builder()
        .websocket("/ws", || Box::new(Echo { peer: String::new() }))
        .static_dir("./public")
        .build();
    Server::bind("127.0.0.1:8080".parse().unwrap()).run(app).await
}
