use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::IntegrityPolicy;
use crate::host::Network;
use crate::http::{Request, Response};
use crate::http::request::cache_key;

use super::{CacheError, CacheStorage};

/// The resources a generation is expected to hold, resolved to absolute URLs.
///
/// Relative entries are resolved against the scope. Entries that resolve to the same
/// URL collapse to the first occurrence.
///
/// # Examples
///
/// ```
/// use fetchgate::cache::Manifest;
/// use url::Url;
///
/// let scope = Url::parse("https://example.com/app/").unwrap();
/// let manifest = Manifest::resolve(&scope, ["a.txt", "/root.css", "./a.txt"]).unwrap();
///
/// assert_eq!(manifest.len(), 2);
/// assert!(manifest.contains("https://example.com/app/a.txt"));
/// assert!(manifest.contains("https://example.com/root.css"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    urls: Vec<Url>,
    keys: HashSet<String>,
}

impl Manifest {
    pub fn resolve<I, S>(scope: &Url, files: I) -> Result<Self, url::ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut manifest = Self::default();
        for file in files {
            let url = scope.join(file.as_ref())?;
            if manifest.keys.insert(cache_key(&url)) {
                manifest.urls.push(url);
            }
        }
        Ok(manifest)
    }

    /// Whether `key` (a fragment-free absolute URL) is promised by this manifest.
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Resolved URLs in declaration order.
    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Outcome of [`CacheStore::try_serve`].
#[derive(Debug)]
pub enum CacheLookup {
    /// The current generation holds the response.
    Hit(Response),
    /// The request is not in the manifest.
    NotFound,
    /// No manifest is configured, so the cache is not consulted at all.
    Disabled,
    /// The request is in the manifest but the current generation does not hold it,
    /// and the integrity policy could not (or was not allowed to) repair it.
    Missing { url: String },
}

/// Cache-first lookup against the current generation.
pub struct CacheStore {
    storage: Arc<dyn CacheStorage>,
    version: String,
    manifest: Option<Manifest>,
    policy: IntegrityPolicy,
}

impl CacheStore {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        version: impl Into<String>,
        manifest: Option<Manifest>,
        policy: IntegrityPolicy,
    ) -> Self {
        Self {
            storage,
            version: version.into(),
            manifest,
            policy,
        }
    }

    /// Identifier of the current generation.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Answer `request` from the current generation if the manifest promises it.
    ///
    /// A manifest entry missing from the generation is an integrity violation, not a
    /// miss: under [`IntegrityPolicy::Strict`] it is reported as
    /// [`CacheLookup::Missing`] and the network is never consulted. Under
    /// [`IntegrityPolicy::Repair`] the entry is refetched through `network`, stored,
    /// and served; a failed repair is still reported as `Missing`.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`CacheError`] if the lookup itself fails.
    pub async fn try_serve(
        &self,
        request: &Request,
        network: &dyn Network,
    ) -> Result<CacheLookup, CacheError> {
        let Some(manifest) = &self.manifest else {
            return Ok(CacheLookup::Disabled);
        };

        if !request.method().is_cacheable() {
            return Ok(CacheLookup::NotFound);
        }

        let key = request.cache_key();
        if !manifest.contains(&key) {
            return Ok(CacheLookup::NotFound);
        }

        if let Some(response) = self.storage.match_key(&self.version, &key).await? {
            debug!(url = %key, version = %self.version, "cache hit");
            return Ok(CacheLookup::Hit(response));
        }

        match self.policy {
            IntegrityPolicy::Strict => {
                error!(url = %key, version = %self.version, "cached resource missing from current generation");
                Ok(CacheLookup::Missing { url: key })
            }
            IntegrityPolicy::Repair => self.repair(request, key, network).await,
        }
    }

    async fn repair(
        &self,
        request: &Request,
        key: String,
        network: &dyn Network,
    ) -> Result<CacheLookup, CacheError> {
        warn!(url = %key, version = %self.version, "cached resource missing, refetching");

        let response = match network.fetch(request.clone()).await {
            Ok(response) if response.is_ok() => response,
            Ok(response) => {
                error!(url = %key, status = response.status().as_u16(), "repair fetch returned a failure status");
                return Ok(CacheLookup::Missing { url: key });
            }
            Err(e) => {
                error!(url = %key, error = %e, "repair fetch failed");
                return Ok(CacheLookup::Missing { url: key });
            }
        };

        self.storage
            .put(&self.version, key.clone(), response.clone())
            .await?;
        info!(url = %key, version = %self.version, "cache entry repaired");
        Ok(CacheLookup::Hit(response))
    }
}
