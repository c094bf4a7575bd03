//! Per-request orchestration: cache, then routed handler, then network.
//!
//! The priority is fixed. A cache hit is never shadowed by a route, and a request the
//! manifest promises never reaches a handler or the network when its entry is missing.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheError, CacheLookup, CacheStore};
use crate::context::RequestContext;
use crate::host::{Host, Network, NetworkError};
use crate::http::{Request, Response, StatusCode};
use crate::pipeline::FilterPipeline;
use crate::router::Router;

/// Why an intercepted request could not be answered.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The manifest promises the resource but the current generation does not hold it.
    #[error("cached resource {url} is missing from the current generation")]
    CacheIntegrityLoss { url: String },

    #[error("no route matched and the network is unavailable")]
    NetworkUnavailable,

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("request aborted")]
    Aborted,
}

impl FetchError {
    /// The response handed to the client in place of this error.
    ///
    /// The status text carries the error description, except for `Aborted` which
    /// yields the bare network-error response.
    pub fn into_response(self) -> Response {
        let status = match &self {
            Self::CacheIntegrityLoss { .. } | Self::Cache(_) => StatusCode::InternalServerError,
            Self::NetworkUnavailable => StatusCode::ServiceUnavailable,
            Self::Network(_) => StatusCode::BadGateway,
            Self::Aborted => return Response::network_error(),
        };
        Response::new(status).with_status_text(self.to_string())
    }
}

/// Answers intercepted requests for an active worker.
pub struct DispatchEngine {
    store: Arc<CacheStore>,
    router: Router,
    pipeline: FilterPipeline,
    network: Arc<dyn Network>,
    host: Arc<dyn Host>,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<CacheStore>,
        router: Router,
        pipeline: FilterPipeline,
        network: Arc<dyn Network>,
        host: Arc<dyn Host>,
    ) -> Self {
        Self {
            store,
            router,
            pipeline,
            network,
            host,
        }
    }

    /// Answer `request`.
    ///
    /// # Errors
    ///
    /// - [`FetchError::CacheIntegrityLoss`] for a manifest entry missing from the cache.
    /// - [`FetchError::NetworkUnavailable`] when nothing matched and the host is offline.
    /// - [`FetchError::Network`] when the network fallback fails.
    /// - [`FetchError::Cache`] when the cache backend fails.
    pub async fn dispatch(&self, request: Request) -> Result<Response, FetchError> {
        match self.store.try_serve(&request, self.network.as_ref()).await? {
            CacheLookup::Hit(response) => return Ok(response),
            CacheLookup::Missing { url } => return Err(FetchError::CacheIntegrityLoss { url }),
            CacheLookup::NotFound | CacheLookup::Disabled => {}
        }

        if let Some((handler, captures)) = self.router.find(request.url()) {
            let ctx = RequestContext::new(request, captures);
            return Ok(self.pipeline.run(ctx, handler.as_ref()).await);
        }

        self.forward(request).await
    }

    /// Send `request` to the network unmodified, if the host is online.
    pub(crate) async fn forward(&self, request: Request) -> Result<Response, FetchError> {
        if !self.host.is_online() {
            debug!(url = %request.url(), "offline, nothing to answer with");
            return Err(FetchError::NetworkUnavailable);
        }
        debug!(method = %request.method(), url = %request.url(), "falling back to network");
        Ok(self.network.fetch(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStorage, Manifest, MemoryCacheStorage};
    use crate::config::IntegrityPolicy;
    use crate::router::{HandlerError, Route};
    use crate::testing::{MockHost, MockNetwork};
    use url::Url;

    fn scope() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    fn engine(
        storage: Arc<MemoryCacheStorage>,
        files: Option<&[&str]>,
        routes: Vec<Route>,
        network: Arc<MockNetwork>,
        host: MockHost,
    ) -> DispatchEngine {
        let manifest = files.map(|files| Manifest::resolve(&scope(), files).unwrap());
        let store = Arc::new(CacheStore::new(storage, "v1", manifest, IntegrityPolicy::Strict));
        let mut router = Router::new(&scope());
        for route in routes {
            router.push(Arc::new(route));
        }
        DispatchEngine::new(store, router, FilterPipeline::default(), network, Arc::new(host))
    }

    fn say_route() -> Route {
        Route::new(r"^/say/(.+)$", |ctx: RequestContext| async move {
            let word = ctx.captures().get(1).unwrap_or_default().to_owned();
            Ok(Response::new(StatusCode::Ok).body(format!("Said: {word}")))
        })
        .unwrap()
    }

    #[tokio::test]
    async fn cache_hit_wins_over_a_matching_route() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage
            .put("v1", "https://example.com/say/a.txt".into(), Response::new(StatusCode::Ok).body("cached"))
            .await
            .unwrap();
        let network = Arc::new(MockNetwork::new());
        let engine = engine(storage, Some(&["/say/a.txt"]), vec![say_route()], network.clone(), MockHost::online());

        let response = engine.dispatch(Request::get("https://example.com/say/a.txt").unwrap()).await.unwrap();
        assert_eq!(response.body_bytes().as_ref(), b"cached");
        assert_eq!(network.calls(), 0);
    }

    #[tokio::test]
    async fn missing_manifest_entry_never_falls_through() {
        let network = Arc::new(MockNetwork::new().respond("https://example.com/say/a.txt", "net"));
        let engine = engine(
            Arc::new(MemoryCacheStorage::new()),
            Some(&["/say/a.txt"]),
            vec![say_route()],
            network.clone(),
            MockHost::online(),
        );

        let err = engine.dispatch(Request::get("https://example.com/say/a.txt").unwrap()).await.unwrap_err();
        assert!(matches!(err, FetchError::CacheIntegrityLoss { .. }));
        assert_eq!(network.calls(), 0);
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let catch_all = Route::new(".*", |_ctx| async { Ok(Response::new(StatusCode::Ok).body("catch-all")) }).unwrap();
        let engine = engine(
            Arc::new(MemoryCacheStorage::new()),
            None,
            vec![say_route(), catch_all],
            Arc::new(MockNetwork::new()),
            MockHost::online(),
        );

        let said = engine.dispatch(Request::get("https://example.com/say/hi").unwrap()).await.unwrap();
        assert_eq!(said.body_bytes().as_ref(), b"Said: hi");
        let other = engine.dispatch(Request::get("https://example.com/other").unwrap()).await.unwrap();
        assert_eq!(other.body_bytes().as_ref(), b"catch-all");
    }

    #[tokio::test]
    async fn handler_failure_without_exception_handler_is_network_error() {
        let failing = Route::new(".*", |_ctx| async { Err(HandlerError::new("nope")) }).unwrap();
        let engine = engine(
            Arc::new(MemoryCacheStorage::new()),
            None,
            vec![failing],
            Arc::new(MockNetwork::new()),
            MockHost::online(),
        );
        let response = engine.dispatch(Request::get("https://example.com/x").unwrap()).await.unwrap();
        assert!(response.is_network_error());
    }

    #[tokio::test]
    async fn unrouted_request_goes_to_network_when_online() {
        let network = Arc::new(MockNetwork::new().respond("https://example.com/raw", "from network"));
        let engine = engine(Arc::new(MemoryCacheStorage::new()), None, vec![], network.clone(), MockHost::online());

        let response = engine.dispatch(Request::get("https://example.com/raw").unwrap()).await.unwrap();
        assert_eq!(response.body_bytes().as_ref(), b"from network");
        assert_eq!(network.requested(), vec!["https://example.com/raw"]);
    }

    #[tokio::test]
    async fn unrouted_request_offline_is_unavailable() {
        let network = Arc::new(MockNetwork::new());
        let engine = engine(Arc::new(MemoryCacheStorage::new()), None, vec![], network.clone(), MockHost::offline());

        let err = engine.dispatch(Request::get("https://example.com/raw").unwrap()).await.unwrap_err();
        assert!(matches!(err, FetchError::NetworkUnavailable));
        assert_eq!(network.calls(), 0);
    }

    #[tokio::test]
    async fn network_failure_is_reported() {
        let engine = engine(
            Arc::new(MemoryCacheStorage::new()),
            None,
            vec![],
            Arc::new(MockNetwork::new()),
            MockHost::online(),
        );
        let err = engine.dispatch(Request::get("https://example.com/raw").unwrap()).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }

    #[tokio::test]
    async fn network_status_passes_through_unchanged() {
        let network = Arc::new(
            MockNetwork::new()
                .respond_with("https://example.com/teapot", Response::new(StatusCode::Other(418)).with_status_text("I'm a teapot"))
                .respond_with("https://example.com/conflict", Response::new(StatusCode::Conflict)),
        );
        let engine = engine(Arc::new(MemoryCacheStorage::new()), None, vec![], network, MockHost::online());

        let teapot = engine.dispatch(Request::get("https://example.com/teapot").unwrap()).await.unwrap();
        assert_eq!(teapot.status().as_u16(), 418);
        assert_eq!(teapot.status_text(), "I'm a teapot");
        assert!(teapot.into_bytes().starts_with(b"HTTP/1.1 418 I'm a teapot\r\n"));

        let conflict = engine.dispatch(Request::get("https://example.com/conflict").unwrap()).await.unwrap();
        assert_eq!(conflict.status(), StatusCode::Conflict);
        assert_eq!(conflict.status_text(), "Conflict");
    }

    #[tokio::test]
    async fn out_of_scope_request_is_not_routed() {
        let scoped = Url::parse("https://example.com/app/").unwrap();
        let mut router = Router::new(&scoped);
        router.push(Arc::new(Route::new(".*", |_ctx| async { Ok(Response::new(StatusCode::Ok)) }).unwrap()));
        let store = Arc::new(CacheStore::new(
            Arc::new(MemoryCacheStorage::new()),
            "v1",
            None,
            IntegrityPolicy::Strict,
        ));
        let engine = DispatchEngine::new(
            store,
            router,
            FilterPipeline::default(),
            Arc::new(MockNetwork::new()),
            Arc::new(MockHost::offline()),
        );

        let err = engine.dispatch(Request::get("https://example.com/elsewhere").unwrap()).await.unwrap_err();
        assert!(matches!(err, FetchError::NetworkUnavailable));
    }

    #[test]
    fn errors_map_to_failure_responses() {
        let loss = FetchError::CacheIntegrityLoss { url: "https://example.com/a.txt".into() }.into_response();
        assert_eq!(loss.status(), StatusCode::InternalServerError);
        assert!(loss.status_text().contains("a.txt"));

        assert_eq!(FetchError::NetworkUnavailable.into_response().status(), StatusCode::ServiceUnavailable);

        let bad_gateway = FetchError::Network(NetworkError::new("https://x/", "reset")).into_response();
        assert_eq!(bad_gateway.status(), StatusCode::BadGateway);

        assert!(FetchError::Aborted.into_response().is_network_error());
    }
}
