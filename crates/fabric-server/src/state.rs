//! Shared application state for the fabric control plane server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It holds the store, the HA coordinator, the
//! Supervisor handle, the rate limiter, and the resolved configuration.

use std::sync::Arc;

use fabric_core::ratelimit::RateLimiter;
use fabric_store::Store;

use crate::bundle::BundleService;
use crate::config::ServerConfig;
use crate::ha::HaCoordinator;
use crate::supervisor::Supervisor;
use crate::topology::TopologyService;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    pub store: Arc<Store>,
    pub ha: Arc<HaCoordinator>,
    pub supervisor: Arc<Supervisor>,
    pub rate_limiter: Arc<RateLimiter>,
    pub config: Arc<ServerConfig>,
    /// Copied out of `config.hmac_secret` at construction time so route
    /// handlers don't re-allocate an `Arc<[u8]>` on every request.
    hmac_secret: Arc<[u8]>,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        ha: Arc<HaCoordinator>,
        supervisor: Arc<Supervisor>,
        rate_limiter: Arc<RateLimiter>,
        config: Arc<ServerConfig>,
    ) -> Self {
        let hmac_secret = Arc::from(config.hmac_secret.as_slice());
        Self { store, ha, supervisor, rate_limiter, config, hmac_secret }
    }

    #[must_use]
    pub fn topology(&self) -> TopologyService {
        TopologyService::new(Arc::clone(&self.store), Arc::clone(&self.hmac_secret))
    }

    #[must_use]
    pub fn bundle_service(&self) -> BundleService {
        BundleService::new(Arc::clone(&self.store))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
