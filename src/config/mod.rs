//! Worker configuration.
//!
//! Configuration has a data half and a code half:
//!
//! - [`ServiceSettings`] — plain data (cache version, scope, cached files, integrity
//!   policy), deserializable from JSON.
//! - [`ServiceConfigBuilder`] — adds the route table and the optional filters and
//!   exception handler, then validates everything into a [`ServiceConfig`].

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::cache::Manifest;
use crate::context::RequestContext;
use crate::http::Response;
use crate::pipeline::{
    self, ExceptionHandler, FilterPipeline, RequestFilter, ResponseFilter,
};
use crate::router::{HandlerError, RequestHandler, Route, Router};

/// Configuration errors, reported by [`ServiceConfigBuilder::build`] and friends.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cache version must not be empty")]
    EmptyVersion,

    #[error("scope {scope:?} is not an absolute URL: {source}")]
    InvalidScope {
        scope: String,
        #[source]
        source: url::ParseError,
    },

    #[error("cached file {entry:?} cannot be resolved against the scope: {source}")]
    InvalidManifestEntry {
        entry: String,
        #[source]
        source: url::ParseError,
    },

    #[error("route pattern {pattern:?} does not compile: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("settings are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// What to do when a resource promised by the manifest is missing from the current
/// generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityPolicy {
    /// Fail the request with a cache-integrity error. Never touches the network.
    #[default]
    Strict,
    /// Refetch the resource, store it in the current generation and serve it.
    Repair,
}

/// The data half of the configuration.
///
/// # Examples
///
/// ```
/// use fetchgate::{IntegrityPolicy, ServiceSettings};
///
/// let settings = ServiceSettings::from_json(r#"{
///     "cache_version": "v2",
///     "scope": "https://example.com/app/",
///     "cached_files": ["index.html", "app.css"]
/// }"#).unwrap();
///
/// assert_eq!(settings.cache_version, "v2");
/// assert_eq!(settings.integrity_policy, IntegrityPolicy::Strict);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Identifier of the cache generation this worker owns.
    pub cache_version: String,
    /// Absolute URL under which the worker is authoritative.
    pub scope: String,
    /// Resources to pre-cache on install. `None` disables the cache entirely.
    #[serde(default)]
    pub cached_files: Option<Vec<String>>,
    #[serde(default)]
    pub integrity_policy: IntegrityPolicy,
}

impl ServiceSettings {
    pub fn new(cache_version: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            cache_version: cache_version.into(),
            scope: scope.into(),
            cached_files: None,
            integrity_policy: IntegrityPolicy::default(),
        }
    }

    #[must_use]
    pub fn cached_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cached_files = Some(files.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn integrity_policy(mut self, policy: IntegrityPolicy) -> Self {
        self.integrity_policy = policy;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Validated configuration, consumed by [`ServiceWorker::new`](crate::ServiceWorker::new).
#[derive(Debug)]
pub struct ServiceConfig {
    pub(crate) version: String,
    pub(crate) scope: Url,
    pub(crate) manifest: Option<Manifest>,
    pub(crate) integrity_policy: IntegrityPolicy,
    pub(crate) router: Router,
    pub(crate) pipeline: FilterPipeline,
}

impl ServiceConfig {
    pub fn builder(settings: ServiceSettings) -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            settings,
            handlers: Vec::new(),
            request_filter: None,
            response_filter: None,
            exception_handler: None,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The scope, normalized to end in `/`.
    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn integrity_policy(&self) -> IntegrityPolicy {
        self.integrity_policy
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}

/// Collects the code half of the configuration.
pub struct ServiceConfigBuilder {
    settings: ServiceSettings,
    handlers: Vec<Arc<dyn RequestHandler>>,
    request_filter: Option<RequestFilter>,
    response_filter: Option<ResponseFilter>,
    exception_handler: Option<ExceptionHandler>,
}

impl ServiceConfigBuilder {
    /// Append a regex route. Routes are tried in the order they are added.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidPattern`] if `pattern` does not compile.
    pub fn route<F, Fut>(self, pattern: &str, process: F) -> Result<Self, ConfigError>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
    {
        let route = Route::new(pattern, process).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(self.handler(Arc::new(route)))
    }

    /// Append any [`RequestHandler`] implementation.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    #[must_use]
    pub fn request_filter<F, Fut>(mut self, filter: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RequestContext, HandlerError>> + Send + 'static,
    {
        self.request_filter = Some(pipeline::request_filter(filter));
        self
    }

    #[must_use]
    pub fn response_filter<F, Fut>(mut self, filter: F) -> Self
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
    {
        self.response_filter = Some(pipeline::response_filter(filter));
        self
    }

    #[must_use]
    pub fn exception_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(HandlerError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.exception_handler = Some(pipeline::exception_handler(handler));
        self
    }

    /// Validate the settings and assemble the configuration.
    ///
    /// The scope loses any query or fragment and gains a trailing `/` so relative
    /// cached files resolve inside it.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::EmptyVersion`] for a blank cache version.
    /// - [`ConfigError::InvalidScope`] if the scope is not an absolute URL.
    /// - [`ConfigError::InvalidManifestEntry`] if a cached file cannot be resolved.
    pub fn build(self) -> Result<ServiceConfig, ConfigError> {
        let settings = self.settings;
        if settings.cache_version.trim().is_empty() {
            return Err(ConfigError::EmptyVersion);
        }

        let scope = normalize_scope(&settings.scope)?;

        let manifest = match &settings.cached_files {
            Some(files) => Some(Manifest::resolve(&scope, files).map_err(|source| {
                let entry = files
                    .iter()
                    .find(|entry| scope.join(entry).is_err())
                    .cloned()
                    .unwrap_or_default();
                ConfigError::InvalidManifestEntry { entry, source }
            })?),
            None => None,
        };

        let mut router = Router::new(&scope);
        for handler in self.handlers {
            router.push(handler);
        }

        Ok(ServiceConfig {
            version: settings.cache_version,
            scope,
            manifest,
            integrity_policy: settings.integrity_policy,
            router,
            pipeline: FilterPipeline::new(
                self.request_filter,
                self.response_filter,
                self.exception_handler,
            ),
        })
    }
}

fn normalize_scope(raw: &str) -> Result<Url, ConfigError> {
    let mut scope = Url::parse(raw).map_err(|source| ConfigError::InvalidScope {
        scope: raw.to_owned(),
        source,
    })?;
    scope.set_query(None);
    scope.set_fragment(None);
    if !scope.path().ends_with('/') {
        let path = format!("{}/", scope.path());
        scope.set_path(&path);
    }
    Ok(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusCode;

    #[test]
    fn scope_gains_trailing_slash_and_loses_query() {
        let config = ServiceConfig::builder(ServiceSettings::new("v1", "https://example.com/app?x=1#f"))
            .build()
            .unwrap();
        assert_eq!(config.scope().as_str(), "https://example.com/app/");
    }

    #[test]
    fn cached_files_resolve_against_scope() {
        let settings = ServiceSettings::new("v1", "https://example.com/app/")
            .cached_files(["test.html", "/octocat.png", "https://cdn.example.com/lib.js"]);
        let config = ServiceConfig::builder(settings).build().unwrap();
        let manifest = config.manifest().unwrap();

        let urls: Vec<_> = manifest.urls().iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/app/test.html",
                "https://example.com/octocat.png",
                "https://cdn.example.com/lib.js",
            ]
        );
    }

    #[test]
    fn no_cached_files_means_no_manifest() {
        let config = ServiceConfig::builder(ServiceSettings::new("v1", "https://example.com/"))
            .build()
            .unwrap();
        assert!(config.manifest().is_none());
        assert!(config.router().is_empty());
        assert_eq!(config.integrity_policy(), IntegrityPolicy::Strict);
    }

    #[test]
    fn empty_version_is_rejected() {
        let err = ServiceConfig::builder(ServiceSettings::new("  ", "https://example.com/"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyVersion));
    }

    #[test]
    fn relative_scope_is_rejected() {
        let err = ServiceConfig::builder(ServiceSettings::new("v1", "/app/"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidScope { .. }));
    }

    #[test]
    fn bad_route_pattern_is_reported() {
        let result = ServiceConfig::builder(ServiceSettings::new("v1", "https://example.com/"))
            .route("/say/(", |_ctx| async { Ok(Response::new(StatusCode::Ok)) });
        assert!(matches!(result, Err(ConfigError::InvalidPattern { ref pattern, .. }) if pattern == "/say/("));
    }

    #[test]
    fn routes_keep_registration_order() {
        let config = ServiceConfig::builder(ServiceSettings::new("v1", "https://example.com/"))
            .route("^/a", |_ctx| async { Ok(Response::new(StatusCode::Ok)) })
            .unwrap()
            .route("^/b", |_ctx| async { Ok(Response::new(StatusCode::Accepted)) })
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.router().len(), 2);
    }

    #[test]
    fn settings_json_round_trip() {
        let settings = ServiceSettings::new("v3", "https://example.com/")
            .cached_files(["a.txt"])
            .integrity_policy(IntegrityPolicy::Repair);
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains(r#""integrity_policy":"repair""#));
        assert_eq!(ServiceSettings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            ServiceSettings::from_json("{\"scope\": 1}"),
            Err(ConfigError::Json(_))
        ));
    }
}
