//! Cluster CRUD and the shared `config_version` counter.
//!
//! `config_version` is the single authoritative mutation counter for a
//! cluster: every topology change (PKI, node set, lighthouse/relay
//! assignment, routes) and every config-bundle upload increments it by
//! exactly one, inside the same transaction as the mutation itself. A
//! freshly uploaded bundle's `version` is whatever `config_version` becomes
//! after that increment — the two are the same counter, not two
//! independently advancing sequences, which is what keeps "the bundle at
//! version N" and "the cluster is at version N" the same statement.

use chrono::Utc;
use fabric_core::models::Cluster;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use crate::error::StoreError;
use crate::Store;

impl Store {
    /// Create a cluster within a tenant, starting at `config_version = 1`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if `(tenant_id, name)` already exists.
    pub async fn create_cluster(
        &self,
        tenant_id: Uuid,
        name: &str,
        cluster_token_hash: &str,
        provide_lighthouse: bool,
        lighthouse_port: Option<i32>,
    ) -> Result<Cluster, StoreError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();

        sqlx::query(
            "INSERT INTO clusters \
                (id, tenant_id, name, cluster_token_hash, provide_lighthouse, lighthouse_port, \
                 config_version, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(name)
        .bind(cluster_token_hash)
        .bind(provide_lighthouse)
        .bind(lighthouse_port)
        .bind(created_at)
        .execute(self.pool())
        .await?;

        self.get_cluster(id).await
    }

    /// Fetch a cluster by id.
    pub async fn get_cluster(&self, id: Uuid) -> Result<Cluster, StoreError> {
        sqlx::query_as::<_, Cluster>(
            "SELECT id, tenant_id, name, cluster_token_hash, provide_lighthouse, \
                    lighthouse_port, config_version, ca_cert, ca_key, crl, created_at \
             FROM clusters WHERE id = ?",
        )
        .bind(id)
        .fetch_one(self.pool())
        .await
        .map_err(StoreError::from)
    }

    /// Resolve a cluster by the hash of its plaintext cluster token. Used by
    /// the cluster-token authentication middleware.
    pub async fn get_cluster_by_token_hash(&self, hash: &str) -> Result<Cluster, StoreError> {
        sqlx::query_as::<_, Cluster>(
            "SELECT id, tenant_id, name, cluster_token_hash, provide_lighthouse, \
                    lighthouse_port, config_version, ca_cert, ca_key, crl, created_at \
             FROM clusters WHERE cluster_token_hash = ?",
        )
        .bind(hash)
        .fetch_one(self.pool())
        .await
        .map_err(StoreError::from)
    }

    /// List every cluster that opted into running its own lighthouse. Polled
    /// by the Supervisor on every tick.
    pub async fn list_lighthouse_clusters(&self) -> Result<Vec<Cluster>, StoreError> {
        sqlx::query_as::<_, Cluster>(
            "SELECT id, tenant_id, name, cluster_token_hash, provide_lighthouse, \
                    lighthouse_port, config_version, ca_cert, ca_key, crl, created_at \
             FROM clusters WHERE provide_lighthouse = 1",
        )
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::from)
    }

    /// Replace the cluster's PKI blobs (CA cert/key, CRL) and bump
    /// `config_version`. Used when a bundle upload refreshes the trust
    /// material as well as when an operator rotates the CA out of band.
    pub async fn set_cluster_pki(
        &self,
        cluster_id: Uuid,
        ca_cert: &[u8],
        ca_key: &[u8],
        crl: &[u8],
    ) -> Result<Cluster, StoreError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("UPDATE clusters SET ca_cert = ?, ca_key = ?, crl = ? WHERE id = ?")
            .bind(ca_cert)
            .bind(ca_key)
            .bind(crl)
            .bind(cluster_id)
            .execute(&mut *tx)
            .await?;

        bump_config_version(&mut tx, cluster_id).await?;
        tx.commit().await?;

        self.get_cluster(cluster_id).await
    }

    /// Rewrite the cluster token hash. Does not bump `config_version` — the
    /// cluster token is local authentication material, not part of the
    /// topology shipped to nodes.
    pub async fn rotate_cluster_token(
        &self,
        cluster_id: Uuid,
        new_hash: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE clusters SET cluster_token_hash = ? WHERE id = ?")
            .bind(new_hash)
            .bind(cluster_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete a cluster and cascade to its nodes, bundles, and convergence
    /// state.
    pub async fn delete_cluster(&self, cluster_id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM cluster_state WHERE cluster_id = ?")
            .bind(cluster_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM config_bundles WHERE cluster_id = ?")
            .bind(cluster_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM nodes WHERE cluster_id = ?")
            .bind(cluster_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM clusters WHERE id = ?")
            .bind(cluster_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Increment `config_version` by exactly one and return the new value.
/// Callers run this inside the same transaction as the mutation it
/// accompanies, so the bump is atomic with the change that caused it.
pub(crate) async fn bump_config_version(
    tx: &mut Transaction<'_, Sqlite>,
    cluster_id: Uuid,
) -> Result<i64, StoreError> {
    let (version,): (i64,) = sqlx::query_as(
        "UPDATE clusters SET config_version = config_version + 1 WHERE id = ? RETURNING config_version",
    )
    .bind(cluster_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(version)
}
