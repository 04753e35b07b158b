use async_trait::async_trait;
use serde::Serialize;
use wafer_web::{App, Handler, HandlerResult, RequestContext, Response, Server};

#[derive(Serialize)]
struct Greeting {
    message: String,
}

struct Hello;

#[async_trait]
impl Handler for Hello {
    async fn handle(&self, ctx: &mut RequestContext<'_>) -> HandlerResult {
        let name = ctx.request.params().get("name").cloned().unwrap_or_else(|| "world".to_string());
        Ok(Response::json(&Greeting { message: format!("hello {name}") })?)
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    wafer_web::init_tracing();

    let app = App::builder().get("/hello/{name}", Hello).build();
    Server::bind("127.0.0.1:8080".parse().unwrap()).run(app).await
}
