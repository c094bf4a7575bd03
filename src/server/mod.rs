//! Async TCP front end using Tokio.
//!
//! Accepts TCP connections, parses HTTP/1.1 requests and answers each one through a
//! [`ServiceWorker`]. This is the host adapter for processes that are their own runtime:
//! the worker is installed and activated before the first connection is accepted.
//! Supports HTTP/1.1 persistent connections (keep-alive) out of the box.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::lifecycle::LifecycleError;
use crate::worker::ServiceWorker;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker did not start: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Scheme used to rebuild absolute URLs from origin-form request targets.
const SCHEME: &str = "http";

/// The fetchgate TCP front end.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use fetchgate::{Server, ServiceConfig, ServiceSettings, ServiceWorker};
/// use fetchgate::cache::MemoryCacheStorage;
/// use fetchgate::host::{Network, StandaloneHost};
///
/// # async fn example(network: Arc<dyn Network>) -> Result<(), Box<dyn std::error::Error>> {
/// let config = ServiceConfig::builder(ServiceSettings::new("v1", "http://127.0.0.1:8080/")).build()?;
/// let worker = ServiceWorker::new(
///     config,
///     Arc::new(MemoryCacheStorage::new()),
///     network,
///     Arc::new(StandaloneHost::online()),
/// );
///
/// let server = Server::bind("127.0.0.1:8080").await?;
/// server.run(Arc::new(worker)).await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Installs and activates `worker`, then answers every request through it.
    ///
    /// This method runs until the process is terminated or an unrecoverable
    /// listener error occurs.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Lifecycle`] if the worker fails to install or activate.
    /// - [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run(self, worker: Arc<ServiceWorker>) -> Result<(), ServerError> {
        worker.install().await?;
        worker.activate().await?;
        self.serve(worker).await
    }

    /// Answers requests through `worker` as it stands, without driving its lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn serve(self, worker: Arc<ServiceWorker>) -> Result<(), ServerError> {
        info!(address = %self.local_addr, version = %worker.version(), "fetchgate listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let worker = Arc::clone(&worker);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, worker).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    worker: Arc<ServiceWorker>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        let (request, body_offset) = match Request::parse(&buf, SCHEME) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = match body_offset.checked_add(content_length) {
            Some(total) if total <= MAX_REQUEST_SIZE => total,
            _ => {
                warn!(peer = %peer_addr, content_length, "declared body too large, sending 413");
                let response = Response::new(StatusCode::PayloadTooLarge)
                    .body("Request entity too large")
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };
        if buf.len() < total_needed {
            continue;
        }

        let consumed = buf.split_to(total_needed).freeze();
        let request = request.body(consumed.slice(body_offset..));
        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            url = %request.url(),
            "dispatching request"
        );

        let response = worker.fetch(request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}
