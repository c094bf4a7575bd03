//! Recording doubles for the collaborator traits.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::BoxFuture;
use crate::cache::{CacheError, CacheStorage, MemoryCacheStorage};
use crate::host::{Host, HostError, Network, NetworkError};
use crate::http::{Request, Response, StatusCode};

/// Answers from a fixed URL → response table; anything else fails.
#[derive(Default)]
pub(crate) struct MockNetwork {
    responses: HashMap<String, Response>,
    requested: Mutex<Vec<String>>,
}

impl MockNetwork {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(self, url: &str, body: &'static str) -> Self {
        self.respond_with(url, Response::new(StatusCode::Ok).body(body))
    }

    pub(crate) fn respond_with(mut self, url: &str, response: Response) -> Self {
        self.responses.insert(url.to_owned(), response);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.requested.lock().unwrap().len()
    }

    pub(crate) fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl Network for MockNetwork {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetworkError>> {
        Box::pin(async move {
            let key = request.cache_key();
            self.requested.lock().unwrap().push(key.clone());
            self.responses
                .get(&key)
                .cloned()
                .ok_or_else(|| NetworkError::new(key, "no route to host"))
        })
    }
}

pub(crate) struct MockHost {
    online: AtomicBool,
    refuse_claim: bool,
    pub(crate) skipped: AtomicUsize,
    pub(crate) claimed: AtomicUsize,
}

impl MockHost {
    pub(crate) fn online() -> Self {
        Self {
            online: AtomicBool::new(true),
            refuse_claim: false,
            skipped: AtomicUsize::new(0),
            claimed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn offline() -> Self {
        let host = Self::online();
        host.online.store(false, Ordering::SeqCst);
        host
    }

    pub(crate) fn refusing_claim() -> Self {
        Self {
            refuse_claim: true,
            ..Self::online()
        }
    }
}

impl Host for MockHost {
    fn skip_waiting(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn claim_clients(&self) -> BoxFuture<'_, Result<(), HostError>> {
        Box::pin(async move {
            if self.refuse_claim {
                return Err(HostError {
                    operation: "claim_clients",
                    reason: "not the active worker".into(),
                });
            }
            self.claimed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Memory storage whose `delete` fails for the listed generations.
pub(crate) struct StubbornStorage {
    pub(crate) inner: MemoryCacheStorage,
    undeletable: Vec<String>,
}

impl StubbornStorage {
    pub(crate) fn new(undeletable: &[&str]) -> Self {
        Self {
            inner: MemoryCacheStorage::new(),
            undeletable: undeletable.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CacheStorage for StubbornStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        self.inner.open(name)
    }

    fn put_all<'a>(
        &'a self,
        name: &'a str,
        entries: Vec<(String, Response)>,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        self.inner.put_all(name, entries)
    }

    fn match_key<'a>(
        &'a self,
        name: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        self.inner.match_key(name, key)
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        if self.undeletable.iter().any(|n| n == name) {
            return Box::pin(async move { Err(CacheError::new("delete", name, "locked")) });
        }
        self.inner.delete(name)
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        self.inner.keys()
    }
}
