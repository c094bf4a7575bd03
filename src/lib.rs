//! # fetchgate
//!
//! A fetch-interception engine. Every request made inside a scope is answered from a
//! versioned local cache, routed to an application handler, or forwarded to the
//! network, in that fixed order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fetchgate::{Response, ServiceConfig, ServiceSettings, ServiceWorker, StatusCode};
//! use fetchgate::cache::MemoryCacheStorage;
//! use fetchgate::host::{Network, StandaloneHost};
//!
//! # async fn example(network: Arc<dyn Network>) -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ServiceSettings::new("v1", "https://example.com/app/")
//!     .cached_files(["index.html", "logo.png"]);
//!
//! let config = ServiceConfig::builder(settings)
//!     .route(r"^/say/(.+)$", |ctx| async move {
//!         let word = ctx.captures().get(1).unwrap_or_default().to_owned();
//!         Ok(Response::new(StatusCode::Ok).body(format!("Said: {word}")))
//!     })?
//!     .build()?;
//!
//! let worker = ServiceWorker::new(
//!     config,
//!     Arc::new(MemoryCacheStorage::new()),
//!     network,
//!     Arc::new(StandaloneHost::online()),
//! );
//! worker.install().await?;
//! worker.activate().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod cache;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod pipeline;
pub mod router;
pub mod server;
pub mod worker;

mod lock;

#[cfg(test)]
pub(crate) mod testing;

/// Heap-allocated, `Send` future returned by the crate's collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{IntegrityPolicy, ServiceConfig, ServiceSettings};
pub use context::RequestContext;
pub use dispatch::FetchError;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use lifecycle::{LifecycleError, LifecycleState};
pub use router::{Captures, HandlerError, Route};
pub use server::{Server, ServerError};
pub use worker::ServiceWorker;
