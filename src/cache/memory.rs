use std::sync::RwLock;

use crate::BoxFuture;
use crate::http::Response;
use crate::lock::{rw_read, rw_write};

use super::{CacheError, CacheStorage};

#[derive(Debug)]
struct Generation {
    name: String,
    entries: Vec<(String, Response)>,
}

impl Generation {
    fn upsert(&mut self, key: String, response: Response) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = response,
            None => self.entries.push((key, response)),
        }
    }
}

/// In-process [`CacheStorage`].
///
/// Generations keep creation order and entries keep insertion order. Nothing survives
/// the process.
///
/// # Examples
///
/// ```
/// use fetchgate::cache::{CacheStorage, MemoryCacheStorage};
/// use fetchgate::{Response, StatusCode};
///
/// # tokio_test(async {
/// let storage = MemoryCacheStorage::new();
/// storage.put("v1", "https://example.com/a.txt".into(), Response::new(StatusCode::Ok)).await.unwrap();
/// assert_eq!(storage.keys().await.unwrap(), vec!["v1".to_string()]);
/// # });
/// # fn tokio_test<F: std::future::Future>(f: F) { tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f); }
/// ```
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    generations: RwLock<Vec<Generation>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in generation `name`, or `None` if it does not exist.
    pub fn entry_count(&self, name: &str) -> Option<usize> {
        rw_read(&self.generations, "entry_count")
            .iter()
            .find(|generation| generation.name == name)
            .map(|generation| generation.entries.len())
    }

    fn with_generation<R>(&self, name: &str, f: impl FnOnce(&mut Generation) -> R) -> R {
        let mut generations = rw_write(&self.generations, "with_generation");
        let index = match generations.iter().position(|g| g.name == name) {
            Some(index) => index,
            None => {
                generations.push(Generation {
                    name: name.to_owned(),
                    entries: Vec::new(),
                });
                generations.len() - 1
            }
        };
        f(&mut generations[index])
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            self.with_generation(name, |_| ());
            Ok(())
        })
    }

    fn put_all<'a>(
        &'a self,
        name: &'a str,
        entries: Vec<(String, Response)>,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            self.with_generation(name, |generation| {
                for (key, response) in entries {
                    generation.upsert(key, response);
                }
            });
            Ok(())
        })
    }

    fn match_key<'a>(
        &'a self,
        name: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        Box::pin(async move {
            let generations = rw_read(&self.generations, "match_key");
            Ok(generations
                .iter()
                .find(|generation| generation.name == name)
                .and_then(|generation| generation.entries.iter().find(|(k, _)| k == key))
                .map(|(_, response)| response.clone()))
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move {
            let mut generations = rw_write(&self.generations, "delete");
            let before = generations.len();
            generations.retain(|generation| generation.name != name);
            Ok(generations.len() < before)
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        Box::pin(async move {
            Ok(rw_read(&self.generations, "keys")
                .iter()
                .map(|generation| generation.name.clone())
                .collect())
        })
    }
}
