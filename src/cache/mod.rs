//! Versioned response caches.
//!
//! - [`CacheStorage`] — the persistent cache primitive: named generations of
//!   URL → response entries. Supplied by the embedder.
//! - [`MemoryCacheStorage`] — an in-process implementation.
//! - [`CacheStore`] — cache-first lookup against the current generation with
//!   manifest-based integrity enforcement.

use thiserror::Error;

use crate::BoxFuture;
use crate::http::Response;

mod memory;
mod store;

pub use memory::MemoryCacheStorage;
pub use store::{CacheLookup, CacheStore, Manifest};

/// Failure reported by a [`CacheStorage`] backend.
#[derive(Debug, Clone, Error)]
#[error("cache {operation} on {name:?} failed: {reason}")]
pub struct CacheError {
    pub operation: &'static str,
    pub name: String,
    pub reason: String,
}

impl CacheError {
    pub fn new(operation: &'static str, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            operation,
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// The persistent cache primitive.
///
/// Generations are identified by name; entries by cache key (the absolute URL without
/// its fragment, see [`Request::cache_key`](crate::Request::cache_key)). Writing to a
/// generation that does not exist yet creates it.
pub trait CacheStorage: Send + Sync {
    /// Create the generation `name` if it does not exist yet.
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Store every entry in one step: either all of them become visible or none do.
    fn put_all<'a>(
        &'a self,
        name: &'a str,
        entries: Vec<(String, Response)>,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Store a single entry, replacing any previous response for `key`.
    fn put<'a>(
        &'a self,
        name: &'a str,
        key: String,
        response: Response,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        self.put_all(name, vec![(key, response)])
    }

    /// Look up `key` in generation `name`. A missing generation is a miss, not an error.
    fn match_key<'a>(
        &'a self,
        name: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>>;

    /// Delete generation `name`. Returns `false` if it did not exist.
    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// Names of every generation, oldest first.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>>;
}
