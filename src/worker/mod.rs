//! The object a host constructs once and drives for the lifetime of the process.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{CacheStorage, CacheStore};
use crate::config::ServiceConfig;
use crate::dispatch::{DispatchEngine, FetchError};
use crate::host::{Host, Network};
use crate::http::{Request, Response};
use crate::lifecycle::{ActivationReport, LifecycleController, LifecycleError, LifecycleState};

/// Install, activate, then answer intercepted requests.
///
/// Until [`activate`](Self::activate) succeeds the worker does not control anything:
/// requests are passed straight through to the network.
pub struct ServiceWorker {
    version: String,
    lifecycle: LifecycleController,
    engine: DispatchEngine,
}

impl ServiceWorker {
    pub fn new(
        config: ServiceConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        host: Arc<dyn Host>,
    ) -> Self {
        let ServiceConfig {
            version,
            scope,
            manifest,
            integrity_policy,
            router,
            pipeline,
        } = config;

        info!(
            version = %version,
            scope = %scope,
            cached = manifest.as_ref().map_or(0, |m| m.len()),
            routes = router.len(),
            "service worker created"
        );

        let store = Arc::new(CacheStore::new(storage, version.clone(), manifest, integrity_policy));
        let lifecycle = LifecycleController::new(Arc::clone(&store), Arc::clone(&network), Arc::clone(&host));
        let engine = DispatchEngine::new(store, router, pipeline, network, host);

        Self {
            version,
            lifecycle,
            engine,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// See [`LifecycleController::install`].
    pub async fn install(&self) -> Result<(), LifecycleError> {
        self.lifecycle.install().await
    }

    /// See [`LifecycleController::activate`].
    pub async fn activate(&self) -> Result<ActivationReport, LifecycleError> {
        self.lifecycle.activate().await
    }

    /// Answer `request`, reporting failures as errors.
    ///
    /// # Errors
    ///
    /// See [`DispatchEngine::dispatch`]. Before activation only
    /// [`FetchError::NetworkUnavailable`] and [`FetchError::Network`] occur.
    pub async fn dispatch(&self, request: Request) -> Result<Response, FetchError> {
        if self.lifecycle.state() != LifecycleState::Active {
            debug!(state = %self.lifecycle.state(), url = %request.url(), "not active, passing through");
            return self.engine.forward(request).await;
        }
        self.engine.dispatch(request).await
    }

    /// Answer `request`. Never fails: errors become failure responses.
    pub async fn fetch(&self, request: Request) -> Response {
        let url = request.url().clone();
        self.dispatch(request).await.unwrap_or_else(|e| {
            warn!(url = %url, error = %e, "request failed");
            e.into_response()
        })
    }

    /// Answer `request` unless `abort` completes first.
    ///
    /// An aborted dispatch is dropped where it stands; nothing after its last await
    /// point runs.
    ///
    /// # Errors
    ///
    /// [`FetchError::Aborted`] if `abort` wins, otherwise as [`dispatch`](Self::dispatch).
    pub async fn fetch_until<A>(&self, request: Request, abort: A) -> Result<Response, FetchError>
    where
        A: Future<Output = ()>,
    {
        tokio::select! {
            result = self.dispatch(request) => result,
            () = abort => {
                debug!("request aborted");
                Err(FetchError::Aborted)
            }
        }
    }
}
