//! Serves a tiny site through a worker on 127.0.0.1:8080.
//!
//! The "network" is a static table, so the whole site keeps working with the cable
//! unplugged: `index.html` comes from the cache, `/say/<word>` from a route, and
//! anything else from the table (or 503 once `OFFLINE=1` is set).
//!
//! ```text
//! RUST_LOG=fetchgate=debug cargo run --example offline_site
//! curl -i http://127.0.0.1:8080/index.html
//! curl -i http://127.0.0.1:8080/say/hello
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use fetchgate::cache::MemoryCacheStorage;
use fetchgate::host::{Network, NetworkError, StandaloneHost};
use fetchgate::{
    BoxFuture, HandlerError, Request, RequestContext, Response, Server, ServiceConfig,
    ServiceSettings, ServiceWorker, StatusCode,
};
use tracing_subscriber::EnvFilter;

const ADDR: &str = "127.0.0.1:8080";

struct StaticSite {
    pages: HashMap<&'static str, &'static str>,
}

impl Network for StaticSite {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetworkError>> {
        Box::pin(async move {
            match self.pages.get(request.url().path()) {
                Some(page) => Ok(Response::new(StatusCode::Ok)
                    .header("Content-Type", "text/html; charset=utf-8")
                    .body(*page)),
                None => Ok(Response::new(StatusCode::NotFound).body("not here")),
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = ServiceSettings::new("site-v1", format!("http://{ADDR}/"))
        .cached_files(["index.html"]);

    let config = ServiceConfig::builder(settings)
        .route(r"^/say/(.+)$", |ctx: RequestContext| async move {
            let word = ctx.captures().get(1).unwrap_or_default();
            if word.len() > 11 {
                return Err(HandlerError::new("Cannot say that"));
            }
            Ok(Response::new(StatusCode::Ok).body(format!("Said: {word}")))
        })?
        .exception_handler(|error: HandlerError| async move {
            Response::new(StatusCode::InternalServerError).with_status_text(error.message())
        })
        .build()?;

    let network = StaticSite {
        pages: HashMap::from([
            ("/index.html", "<h1>Served from the cache</h1>"),
            ("/about.html", "<p>Served from the network</p>"),
        ]),
    };
    let host = StandaloneHost::online();
    host.set_online(std::env::var_os("OFFLINE").is_none());

    let worker = ServiceWorker::new(
        config,
        Arc::new(MemoryCacheStorage::new()),
        Arc::new(network),
        Arc::new(host),
    );

    Server::bind(ADDR).await?.run(Arc::new(worker)).await?;
    Ok(())
}
