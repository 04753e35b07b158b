//! TCP accept loop: one task per accepted connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use wafer_http::{HttpConnection, ServerConfig, Service};

/// Binds an address and hands accepted sockets to the connection engine.
pub struct Server {
    addr: SocketAddr,
    config: ServerConfig,
}

impl Server {
    pub fn bind(addr: SocketAddr) -> Self {
        Self { addr, config: ServerConfig::default() }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Accepts connections forever. Returns only when the listener itself
    /// fails to bind.
    pub async fn run(self, service: impl Service + 'static) -> io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        let config = Arc::new(self.config);
        let service: Arc<dyn Service> = Arc::new(service);
        info!(addr = %self.addr, "server listening");

        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Transient accept failures (fd exhaustion and the like)
                    // must not take the whole listener down.
                    warn!("accept failed: {e}");
                    continue;
                }
            };
            if let Err(e) = socket.set_nodelay(true) {
                warn!(peer = %peer, "set_nodelay failed: {e}");
            }

            let connection =
                HttpConnection::new(socket, peer.ip().to_string(), Arc::clone(&config));
            tokio::spawn(connection.serve(Arc::clone(&service)));
        }
    }
}

/// Installs the default `tracing` subscriber, writing compact single-line
/// events to stdout. Call once, early in `main`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
