//! HA coordinator task wiring.
//!
//! The election math itself lives in [`fabric_core::ha::elect_master`] and
//! is pure; this module owns the only I/O-bound parts: upserting this
//! instance's replica row, running the heartbeat and prune background
//! tasks, and answering `IsMaster()` queries for the write-guard and the
//! `/health/master` route.

use std::sync::Arc;

use chrono::Utc;
use fabric_core::error::HaError;
use fabric_core::ha::{elect_master, Election, HaConfig};
use fabric_core::models::ReplicaRole;
use tokio::sync::watch;
use tracing::{info, warn};

use fabric_store::Store;

/// Coordinates this instance's membership in the replica set.
pub struct HaCoordinator {
    store: Arc<Store>,
    config: HaConfig,
}

impl HaCoordinator {
    #[must_use]
    pub fn new(store: Arc<Store>, config: HaConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    /// Upsert this instance's replica row and, if configured as master,
    /// fail fast when another row already claims `master` with a fresh
    /// heartbeat. Startup master-collision is fatal by design — two masters
    /// writing concurrently would corrupt `config_version` ordering.
    ///
    /// # Errors
    ///
    /// [`HaError::MasterCollision`] if another live master exists.
    /// [`HaError::Store`] on a store failure.
    pub async fn start(&self) -> Result<(), HaError> {
        self.store
            .upsert_replica(&self.config.instance_id, &self.config.address, self.config.mode)
            .await
            .map_err(|e| HaError::Store(e.to_string()))?;

        if self.config.mode == ReplicaRole::Master {
            let replicas = self
                .store
                .list_replicas()
                .await
                .map_err(|e| HaError::Store(e.to_string()))?;
            let cutoff = Utc::now()
                - chrono::Duration::from_std(self.config.heartbeat_threshold)
                    .unwrap_or(chrono::Duration::zero());

            if let Some(other) = replicas.iter().find(|r| {
                r.id != self.config.instance_id
                    && r.role == ReplicaRole::Master
                    && r.last_seen_at > cutoff
            }) {
                return Err(HaError::MasterCollision {
                    existing_master: other.id.clone(),
                });
            }
        }

        Ok(())
    }

    /// Answer `IsMaster()` by re-deriving the election from the current
    /// replica snapshot. Consulted by the write-guard on every mutating
    /// request and by the `/health/master` route.
    ///
    /// # Errors
    ///
    /// [`HaError::Store`] if the replica snapshot cannot be read.
    pub async fn is_master(&self) -> Result<Election, HaError> {
        let replicas = self
            .store
            .list_replicas()
            .await
            .map_err(|e| HaError::Store(e.to_string()))?;

        let election = elect_master(
            &replicas,
            Utc::now(),
            self.config.heartbeat_threshold,
            &self.config.instance_id,
            &self.config.address,
        );

        if election.degraded_fallback {
            warn!(
                replica_count = replicas.len(),
                "election fell back to self-as-master: no healthy replica row observed"
            );
        }

        Ok(election)
    }

    /// Delete this instance's own replica row. Called on graceful shutdown.
    pub async fn stop(&self) {
        if let Err(err) = self.store.delete_replica(&self.config.instance_id).await {
            warn!(%err, "failed to remove own replica row on shutdown");
        }
    }

    /// Background task: refresh `last_seen_at` every `heartbeat_interval`.
    /// Logs and continues on transient store errors — a heartbeat task must
    /// never exit on anything but shutdown.
    pub async fn run_heartbeat_task(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        info!(interval = ?self.config.heartbeat_interval, "heartbeat task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.store.heartbeat_replica(&self.config.instance_id).await {
                        warn!(%err, "heartbeat update failed, will retry next tick");
                    }
                }
                _ = shutdown.changed() => {
                    info!("heartbeat task shutting down");
                    return;
                }
            }
        }
    }

    /// Background task: every `prune_interval`, delete replica rows whose
    /// `last_seen_at` is older than `heartbeat_threshold * prune_multiplier`.
    pub async fn run_prune_task(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.prune_interval);
        let stale_after = self
            .config
            .heartbeat_threshold
            .saturating_mul(self.config.prune_multiplier);
        info!(interval = ?self.config.prune_interval, ?stale_after, "prune task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cutoff = Utc::now()
                        - chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::zero());
                    match self.store.prune_stale_replicas(cutoff).await {
                        Ok(removed) if removed > 0 => {
                            info!(removed, "prune tick: removed stale replicas");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(%err, "prune tick failed, will retry next cycle"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("prune task shutting down");
                    return;
                }
            }
        }
    }
}
