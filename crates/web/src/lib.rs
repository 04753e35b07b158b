//! A small web framework over the `wafer-http` connection engine.
//!
//! `wafer-web` adds what applications expect on top of raw HTTP service:
//! path routing with parameters, CORS, lifecycle hooks, static file serving
//! and a TCP accept loop. The whole surface plugs into the engine through
//! its `Service` trait, so anything here can be replaced wholesale.
//!
//! ```ignore
//! use wafer_web::{App, Server};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     wafer_web::init_tracing();
//!     let app = App::builder()
//!         .get("/hello/{name}", Hello)
//!         .static_dir("./public")
//!         .build();
//!     Server::bind("127.0.0.1:8080".parse().unwrap()).run(app).await
//! }
//! ```

pub mod app;
pub mod cors;
pub mod handler;
pub mod hooks;
pub mod router;
pub mod server;
pub mod static_files;

pub use app::{App, AppBuilder};
pub use cors::{CorsDecision, CorsPolicy};
pub use handler::{FnHandler, Handler, HandlerError, HandlerResult, RequestContext};
pub use hooks::Hook;
pub use router::{RouteMatch, Router, RouterBuilder};
pub use server::{init_tracing, Server};
pub use static_files::StaticFiles;

pub use wafer_http::{
    Cookie, Message, Request, Response, ResponseBody, RoutePlan, SameSite, ServerConfig, WsControl,
    WsEndpoint,
};
