//! HA replica-set storage: registration, heartbeat, pruning.
//!
//! This module only persists rows — the actual election math (who is
//! master, given a snapshot and the current time) lives in
//! `fabric_core::ha::elect_master` and is deliberately kept out of any
//! store-touching code so it can be unit-tested without a database.

use chrono::{DateTime, Utc};
use fabric_core::models::{Replica, ReplicaRole};

use crate::error::StoreError;
use crate::Store;

impl Store {
    /// Upsert this instance's own replica row. Called once at HA coordinator
    /// startup, and again by every heartbeat tick.
    pub async fn upsert_replica(
        &self,
        id: &str,
        address: &str,
        role: ReplicaRole,
    ) -> Result<Replica, StoreError> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO replicas (id, address, role, created_at, last_seen_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
                address = excluded.address, \
                role = excluded.role, \
                last_seen_at = excluded.last_seen_at",
        )
        .bind(id)
        .bind(address)
        .bind(role)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_replica(id).await
    }

    /// Fetch a single replica row by id.
    pub async fn get_replica(&self, id: &str) -> Result<Replica, StoreError> {
        sqlx::query_as::<_, Replica>(
            "SELECT id, address, role, created_at, last_seen_at FROM replicas WHERE id = ?",
        )
        .bind(id)
        .fetch_one(self.pool())
        .await
        .map_err(StoreError::from)
    }

    /// Bump `last_seen_at` for this instance's row to now.
    pub async fn heartbeat_replica(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE replicas SET last_seen_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Snapshot of every replica row, used to feed `elect_master`.
    pub async fn list_replicas(&self) -> Result<Vec<Replica>, StoreError> {
        sqlx::query_as::<_, Replica>(
            "SELECT id, address, role, created_at, last_seen_at FROM replicas ORDER BY created_at",
        )
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::from)
    }

    /// Delete this instance's own row. Called on graceful shutdown.
    pub async fn delete_replica(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM replicas WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Delete every row whose `last_seen_at` is older than `cutoff`. Returns
    /// the number of rows removed. Run periodically by the prune task.
    pub async fn prune_stale_replicas(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM replicas WHERE last_seen_at < ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store;

    #[tokio::test]
    async fn upsert_then_heartbeat_advances_last_seen() {
        let store = test_store().await;
        let first = store
            .upsert_replica("a", "10.0.0.1:8080", ReplicaRole::Master)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.heartbeat_replica("a").await.unwrap();
        let after = store.get_replica("a").await.unwrap();

        assert!(after.last_seen_at >= first.last_seen_at);
    }

    #[tokio::test]
    async fn prune_removes_only_stale_rows() {
        let store = test_store().await;
        store
            .upsert_replica("fresh", "10.0.0.1:8080", ReplicaRole::Replica)
            .await
            .unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(60);
        let removed = store.prune_stale_replicas(cutoff).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.list_replicas().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_replica_removes_own_row() {
        let store = test_store().await;
        store
            .upsert_replica("a", "10.0.0.1:8080", ReplicaRole::Master)
            .await
            .unwrap();
        store.delete_replica("a").await.unwrap();
        assert!(store.get_replica("a").await.is_err());
    }
}
