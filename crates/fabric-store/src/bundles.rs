//! Config bundle upload, download, and version read.
//!
//! A bundle's `version` is the cluster's `config_version` after the bump
//! this upload causes — see `clusters.rs` for why the two counters are one
//! and the same. Two concurrent uploads against the same cluster each take
//! an exclusive SQLite transaction, so they serialize: both succeed, and
//! the loser simply lands on the next integer.

use chrono::Utc;
use fabric_core::models::ConfigBundle;
use uuid::Uuid;

use crate::clusters::bump_config_version;
use crate::error::StoreError;
use crate::Store;

impl Store {
    /// Insert a new bundle for `cluster_id`, assigning it the cluster's
    /// next `config_version`. Returns the inserted bundle.
    pub async fn upload_bundle(
        &self,
        cluster_id: Uuid,
        tenant_id: Uuid,
        data: &[u8],
        created_by: Option<Uuid>,
    ) -> Result<ConfigBundle, StoreError> {
        let mut tx = self.pool().begin().await?;

        let version = bump_config_version(&mut tx, cluster_id).await?;
        let created_at = Utc::now();

        sqlx::query(
            "INSERT INTO config_bundles (cluster_id, version, tenant_id, data, created_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(cluster_id)
        .bind(version)
        .bind(tenant_id)
        .bind(data)
        .bind(created_by)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ConfigBundle {
            cluster_id,
            version,
            tenant_id,
            data: data.to_vec(),
            created_by,
            created_at,
        })
    }

    /// Fetch the most recently uploaded bundle for a cluster.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no bundle has ever been uploaded.
    pub async fn latest_bundle(&self, cluster_id: Uuid) -> Result<ConfigBundle, StoreError> {
        sqlx::query_as::<_, ConfigBundle>(
            "SELECT cluster_id, version, tenant_id, data, created_by, created_at \
             FROM config_bundles WHERE cluster_id = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(cluster_id)
        .fetch_one(self.pool())
        .await
        .map_err(StoreError::from)
    }
}
