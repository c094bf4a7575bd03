//! Two-phase activation of a cache generation.
//!
//! ```text
//! Uninstalled ──install──▶ Installing ──ok──▶ Installed ──activate──▶ Activating ──▶ Active
//!      ▲                       │                                                   │
//!      │                      err                                          activate (cleanup again)
//!      └──── install ◀── InstallFailed
//! ```
//!
//! Install populates the generation named by the configured cache version with every
//! manifest entry, all or nothing. Activate claims the clients in scope and deletes
//! every other generation.

use std::fmt;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheError, CacheStore};
use crate::host::{Host, HostError, Network};
use crate::http::{Method, Request};
use crate::lock::{rw_read, rw_write};

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninstalled,
    Installing,
    Installed,
    Activating,
    Active,
    InstallFailed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninstalled => "uninstalled",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::InstallFailed => "install-failed",
        };
        f.write_str(name)
    }
}

/// Errors surfaced to the host by [`LifecycleController`].
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A manifest entry could not be fetched. The generation is discarded.
    #[error("install failed: {url} could not be cached: {reason}")]
    InstallFailure { url: String, reason: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("cannot {operation} while {from}")]
    InvalidTransition {
        from: LifecycleState,
        operation: &'static str,
    },
}

/// Outcome of a successful [`LifecycleController::activate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale generations that were deleted.
    pub deleted: Vec<String>,
    /// Stale generations whose deletion failed; they remain eligible next time.
    pub failed: Vec<String>,
}

/// Drives install and activate for one cache generation.
pub struct LifecycleController {
    store: Arc<CacheStore>,
    network: Arc<dyn Network>,
    host: Arc<dyn Host>,
    state: RwLock<LifecycleState>,
}

impl LifecycleController {
    pub fn new(store: Arc<CacheStore>, network: Arc<dyn Network>, host: Arc<dyn Host>) -> Self {
        Self {
            store,
            network,
            host,
            state: RwLock::new(LifecycleState::Uninstalled),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *rw_read(&self.state, "state")
    }

    /// Move to `to` if the current state is one of `allowed`.
    fn transition(
        &self,
        allowed: &[LifecycleState],
        to: LifecycleState,
        operation: &'static str,
    ) -> Result<(), LifecycleError> {
        let mut state = rw_write(&self.state, operation);
        if !allowed.contains(&state) {
            return Err(LifecycleError::InvalidTransition {
                from: *state,
                operation,
            });
        }
        debug!(from = %*state, to = %to, "lifecycle transition");
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: LifecycleState) {
        *rw_write(&self.state, "set_state") = to;
    }

    /// Install the generation.
    ///
    /// Skips the waiting phase, then fetches every manifest entry. Nothing is stored
    /// until every entry has been fetched with a 2xx response, so a failed install
    /// never leaves a partial generation behind.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::InvalidTransition`] unless uninstalled or after a failed
    ///   install.
    /// - [`LifecycleError::InstallFailure`] if any entry cannot be fetched.
    /// - [`LifecycleError::Cache`] if the cache backend fails.
    ///
    /// Every error except `InvalidTransition` leaves the controller in
    /// [`LifecycleState::InstallFailed`].
    pub async fn install(&self) -> Result<(), LifecycleError> {
        self.transition(
            &[LifecycleState::Uninstalled, LifecycleState::InstallFailed],
            LifecycleState::Installing,
            "install",
        )?;

        self.host.skip_waiting().await;

        match self.populate().await {
            Ok(count) => {
                self.set_state(LifecycleState::Installed);
                info!(version = %self.store.version(), entries = count, "generation installed");
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::InstallFailed);
                error!(version = %self.store.version(), error = %e, "install failed");
                Err(e)
            }
        }
    }

    async fn populate(&self) -> Result<usize, LifecycleError> {
        let Some(manifest) = self.store.manifest() else {
            return Ok(0);
        };

        let mut entries = Vec::with_capacity(manifest.len());
        for url in manifest.urls() {
            let request = Request::new(Method::Get, url.clone());
            let key = request.cache_key();

            let response = self
                .network
                .fetch(request)
                .await
                .map_err(|e| LifecycleError::InstallFailure {
                    url: key.clone(),
                    reason: e.reason,
                })?;
            if !response.is_ok() {
                return Err(LifecycleError::InstallFailure {
                    url: key,
                    reason: format!("unexpected status {}", response.status()),
                });
            }

            debug!(url = %key, "fetched for cache");
            entries.push((key, response));
        }

        let version = self.store.version();
        let storage = self.store.storage();
        storage.open(version).await?;

        let count = entries.len();
        storage.put_all(version, entries).await?;
        Ok(count)
    }

    /// Activate the generation: claim clients, then delete every other generation.
    ///
    /// Deletion is best-effort per generation; failures are logged and reported in
    /// [`ActivationReport::failed`]. Calling this again once active re-runs the cleanup,
    /// which deletes nothing if the first run succeeded.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::InvalidTransition`] unless installed or already active.
    /// - [`LifecycleError::Host`] if the host refuses to hand over its clients.
    /// - [`LifecycleError::Cache`] if the generation list cannot be read.
    ///
    /// On error the controller returns to the state it was in.
    pub async fn activate(&self) -> Result<ActivationReport, LifecycleError> {
        let previous = self.state();
        self.transition(
            &[LifecycleState::Installed, LifecycleState::Active],
            LifecycleState::Activating,
            "activate",
        )?;

        match self.claim_and_clean().await {
            Ok(report) => {
                self.set_state(LifecycleState::Active);
                info!(
                    version = %self.store.version(),
                    deleted = report.deleted.len(),
                    failed = report.failed.len(),
                    "generation active"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(previous);
                error!(version = %self.store.version(), error = %e, "activate failed");
                Err(e)
            }
        }
    }

    async fn claim_and_clean(&self) -> Result<ActivationReport, LifecycleError> {
        self.host.claim_clients().await?;

        let current = self.store.version();
        let storage = self.store.storage();
        let mut report = ActivationReport::default();

        for name in storage.keys().await? {
            if name == current {
                continue;
            }
            match storage.delete(&name).await {
                Ok(_) => {
                    info!(version = %name, "stale generation deleted");
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(version = %name, error = %e, "failed to delete stale generation");
                    report.failed.push(name);
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::cache::{CacheStorage, Manifest, MemoryCacheStorage};
    use crate::config::IntegrityPolicy;
    use crate::http::{Response, StatusCode};
    use crate::testing::{MockHost, MockNetwork, StubbornStorage};
    use url::Url;

    fn store(storage: Arc<dyn CacheStorage>, version: &str, files: Option<&[&str]>) -> Arc<CacheStore> {
        let scope = Url::parse("https://example.com/").unwrap();
        let manifest = files.map(|files| Manifest::resolve(&scope, files).unwrap());
        Arc::new(CacheStore::new(storage, version, manifest, IntegrityPolicy::Strict))
    }

    fn site() -> MockNetwork {
        MockNetwork::new()
            .respond("https://example.com/test.html", "<h1>hi</h1>")
            .respond("https://example.com/octocat.png", "png")
    }

    #[tokio::test]
    async fn install_without_manifest_is_trivial() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let host = Arc::new(MockHost::online());
        let network = Arc::new(MockNetwork::new());
        let lifecycle = LifecycleController::new(store(storage.clone(), "v1", None), network.clone(), host.clone());

        lifecycle.install().await.unwrap();

        assert_eq!(lifecycle.state(), LifecycleState::Installed);
        assert_eq!(host.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(network.calls(), 0);
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn install_caches_every_manifest_entry() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let lifecycle = LifecycleController::new(
            store(storage.clone(), "v1", Some(&["test.html", "octocat.png"])),
            Arc::new(site()),
            Arc::new(MockHost::online()),
        );

        lifecycle.install().await.unwrap();

        assert_eq!(storage.entry_count("v1"), Some(2));
        let cached = storage
            .match_key("v1", "https://example.com/test.html")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.body_bytes().as_ref(), b"<h1>hi</h1>");
    }

    #[tokio::test]
    async fn unfetchable_entry_fails_install_and_stores_nothing() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let lifecycle = LifecycleController::new(
            store(storage.clone(), "v1", Some(&["test.html", "missing.js"])),
            Arc::new(site()),
            Arc::new(MockHost::online()),
        );

        let err = lifecycle.install().await.unwrap_err();
        assert!(matches!(err, LifecycleError::InstallFailure { ref url, .. } if url == "https://example.com/missing.js"));
        assert_eq!(lifecycle.state(), LifecycleState::InstallFailed);
        assert_eq!(storage.entry_count("v1"), None);
    }

    #[tokio::test]
    async fn non_success_status_fails_install() {
        let network = MockNetwork::new().respond_with(
            "https://example.com/test.html",
            Response::new(StatusCode::NotFound),
        );
        let lifecycle = LifecycleController::new(
            store(Arc::new(MemoryCacheStorage::new()), "v1", Some(&["test.html"])),
            Arc::new(network),
            Arc::new(MockHost::online()),
        );

        let err = lifecycle.install().await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn failed_install_can_be_retried() {
        let lifecycle = LifecycleController::new(
            store(Arc::new(MemoryCacheStorage::new()), "v1", Some(&["gone.txt"])),
            Arc::new(MockNetwork::new()),
            Arc::new(MockHost::online()),
        );
        assert!(lifecycle.install().await.is_err());
        assert!(matches!(
            lifecycle.install().await,
            Err(LifecycleError::InstallFailure { .. })
        ));
    }

    #[tokio::test]
    async fn install_twice_is_an_invalid_transition() {
        let lifecycle = LifecycleController::new(
            store(Arc::new(MemoryCacheStorage::new()), "v1", None),
            Arc::new(MockNetwork::new()),
            Arc::new(MockHost::online()),
        );
        lifecycle.install().await.unwrap();

        let err = lifecycle.install().await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition { from: LifecycleState::Installed, operation: "install" }
        ));
        assert_eq!(err.to_string(), "cannot install while installed");
    }

    #[tokio::test]
    async fn activate_before_install_is_rejected() {
        let lifecycle = LifecycleController::new(
            store(Arc::new(MemoryCacheStorage::new()), "v1", None),
            Arc::new(MockNetwork::new()),
            Arc::new(MockHost::online()),
        );
        assert!(matches!(
            lifecycle.activate().await,
            Err(LifecycleError::InvalidTransition { from: LifecycleState::Uninstalled, .. })
        ));
    }

    #[tokio::test]
    async fn activate_deletes_stale_generations_and_is_idempotent() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage.open("v0").await.unwrap();
        storage.open("legacy").await.unwrap();
        let host = Arc::new(MockHost::online());
        let lifecycle = LifecycleController::new(
            store(storage.clone(), "v1", Some(&["test.html"])),
            Arc::new(site()),
            host.clone(),
        );
        lifecycle.install().await.unwrap();

        let first = lifecycle.activate().await.unwrap();
        assert_eq!(first.deleted, vec!["v0", "legacy"]);
        assert!(first.failed.is_empty());
        assert_eq!(lifecycle.state(), LifecycleState::Active);
        assert_eq!(storage.keys().await.unwrap(), vec!["v1"]);

        let second = lifecycle.activate().await.unwrap();
        assert_eq!(second, ActivationReport::default());
        assert_eq!(host.claimed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_deletion_does_not_stop_the_others() {
        let storage = Arc::new(StubbornStorage::new(&["v0"]));
        for name in ["v0", "v-1"] {
            storage.open(name).await.unwrap();
        }
        let lifecycle = LifecycleController::new(
            store(storage.clone(), "v1", None),
            Arc::new(MockNetwork::new()),
            Arc::new(MockHost::online()),
        );
        lifecycle.install().await.unwrap();

        let report = lifecycle.activate().await.unwrap();
        assert_eq!(report.deleted, vec!["v-1"]);
        assert_eq!(report.failed, vec!["v0"]);
        assert_eq!(lifecycle.state(), LifecycleState::Active);
        assert_eq!(storage.inner.keys().await.unwrap(), vec!["v0"]);
    }

    #[tokio::test]
    async fn refused_claim_fails_activation_and_restores_state() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage.open("v0").await.unwrap();
        let lifecycle = LifecycleController::new(
            store(storage.clone(), "v1", None),
            Arc::new(MockNetwork::new()),
            Arc::new(MockHost::refusing_claim()),
        );
        lifecycle.install().await.unwrap();

        assert!(matches!(lifecycle.activate().await, Err(LifecycleError::Host(_))));
        assert_eq!(lifecycle.state(), LifecycleState::Installed);
        assert_eq!(storage.keys().await.unwrap(), vec!["v0"]);
    }
}
