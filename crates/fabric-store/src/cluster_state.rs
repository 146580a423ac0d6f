//! Per-(cluster, instance) convergence state, read and written by the
//! Lighthouse Supervisor.

use chrono::Utc;
use fabric_core::models::ClusterState;
use uuid::Uuid;

use crate::error::StoreError;
use crate::Store;

impl Store {
    /// Record (or update) the config version this instance's Supervisor has
    /// converged to for a cluster.
    pub async fn set_running_version(
        &self,
        cluster_id: Uuid,
        instance_id: &str,
        running_config_version: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO cluster_state (cluster_id, instance_id, running_config_version, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (cluster_id, instance_id) DO UPDATE SET \
                running_config_version = excluded.running_config_version, \
                updated_at = excluded.updated_at",
        )
        .bind(cluster_id)
        .bind(instance_id)
        .bind(running_config_version)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetch this instance's convergence state for a cluster. Missing rows
    /// are a normal "never converged yet" state, not an error — callers
    /// that need the "treat missing as 0" semantics should match on
    /// `StoreError::NotFound` rather than calling this speculatively.
    pub async fn get_running_version(
        &self,
        cluster_id: Uuid,
        instance_id: &str,
    ) -> Result<ClusterState, StoreError> {
        sqlx::query_as::<_, ClusterState>(
            "SELECT cluster_id, instance_id, running_config_version, updated_at \
             FROM cluster_state WHERE cluster_id = ? AND instance_id = ?",
        )
        .bind(cluster_id)
        .bind(instance_id)
        .fetch_one(self.pool())
        .await
        .map_err(StoreError::from)
    }
}
