//! Boundary collaborators supplied by the embedding runtime.
//!
//! - [`Host`] — the runtime hosting the worker: waiting-phase control, client claiming
//!   and connectivity reporting.
//! - [`Network`] — the network primitive used for cache population and fallback.
//!
//! Both are object-safe and return boxed futures so a [`ServiceWorker`] can hold them
//! as `Arc<dyn ...>`.
//!
//! [`ServiceWorker`]: crate::ServiceWorker

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror::Error;
use tracing::debug;

use crate::BoxFuture;
use crate::http::{Request, Response};

/// Failure reported by the network primitive.
#[derive(Debug, Clone, Error)]
#[error("network fetch of {url} failed: {reason}")]
pub struct NetworkError {
    pub url: String,
    pub reason: String,
}

impl NetworkError {
    pub fn new(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by the host runtime.
#[derive(Debug, Clone, Error)]
#[error("host runtime refused {operation}: {reason}")]
pub struct HostError {
    pub operation: &'static str,
    pub reason: String,
}

/// The network primitive: fetch a request, return a response or fail.
///
/// Timeouts are the implementation's business; the dispatch engine imposes none.
pub trait Network: Send + Sync {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetworkError>>;
}

/// The runtime hosting a worker.
pub trait Host: Send + Sync {
    /// Ask the runtime to activate the installing generation without waiting for
    /// clients of the previous one to close.
    fn skip_waiting(&self) -> BoxFuture<'_, ()>;

    /// Take control of every client currently in scope.
    fn claim_clients(&self) -> BoxFuture<'_, Result<(), HostError>>;

    /// Whether the environment currently reports network connectivity.
    fn is_online(&self) -> bool;
}

/// A [`Host`] for processes that are their own runtime, such as the TCP
/// [`Server`](crate::Server).
///
/// It has no clients to claim. Connectivity is a flag the embedder flips.
#[derive(Debug)]
pub struct StandaloneHost {
    online: AtomicBool,
    skip_waiting_calls: AtomicUsize,
}

impl StandaloneHost {
    pub fn online() -> Self {
        Self::with_connectivity(true)
    }

    pub fn offline() -> Self {
        Self::with_connectivity(false)
    }

    fn with_connectivity(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            skip_waiting_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// How many times the waiting phase was skipped.
    pub fn skip_waiting_calls(&self) -> usize {
        self.skip_waiting_calls.load(Ordering::SeqCst)
    }
}

impl Host for StandaloneHost {
    fn skip_waiting(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.skip_waiting_calls.fetch_add(1, Ordering::SeqCst);
            debug!("skip waiting requested");
        })
    }

    fn claim_clients(&self) -> BoxFuture<'_, Result<(), HostError>> {
        Box::pin(async { Ok(()) })
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
