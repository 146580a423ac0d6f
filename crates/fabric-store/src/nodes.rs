//! Node CRUD, MTU/lighthouse/relay flag updates, and route registration.
//!
//! Every mutation that changes what a node's peers need to know about it —
//! creation, deletion, MTU (shipped in the per-node Nebula config), the
//! lighthouse/relay flags, or its route set — bumps the owning cluster's
//! `config_version` in the same transaction. Token rotation does not: the
//! token is local auth material, invisible to every node but the one it
//! belongs to.

use chrono::Utc;
use fabric_core::models::Node;
use uuid::Uuid;

use crate::clusters::bump_config_version;
use crate::error::StoreError;
use crate::Store;

impl Store {
    /// Create a node in a cluster, bumping `config_version`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if `(cluster_id, name)` already exists.
    pub async fn create_node(
        &self,
        tenant_id: Uuid,
        cluster_id: Uuid,
        name: &str,
        is_admin: bool,
        token_hash: &str,
        mtu: i32,
    ) -> Result<Node, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO nodes \
                (id, tenant_id, cluster_id, name, is_admin, token_hash, mtu, routes, \
                 is_lighthouse, lighthouse_public_ip, lighthouse_port, is_relay, \
                 created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, '', 0, NULL, NULL, 0, ?, ?)",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(cluster_id)
        .bind(name)
        .bind(is_admin)
        .bind(token_hash)
        .bind(mtu)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        bump_config_version(&mut tx, cluster_id).await?;
        tx.commit().await?;

        self.get_node(id).await
    }

    const NODE_COLUMNS: &'static str = "id, tenant_id, cluster_id, name, is_admin, token_hash, \
         mtu, routes, is_lighthouse, lighthouse_public_ip, lighthouse_port, is_relay, \
         created_at, updated_at";

    /// Fetch a node by id.
    pub async fn get_node(&self, id: Uuid) -> Result<Node, StoreError> {
        let sql = format!("SELECT {} FROM nodes WHERE id = ?", Self::NODE_COLUMNS);
        sqlx::query_as::<_, Node>(&sql)
            .bind(id)
            .fetch_one(self.pool())
            .await
            .map_err(StoreError::from)
    }

    /// Resolve a node by the hash of its plaintext node token. Used by the
    /// node-token authentication middleware.
    pub async fn get_node_by_token_hash(&self, hash: &str) -> Result<Node, StoreError> {
        let sql = format!("SELECT {} FROM nodes WHERE token_hash = ?", Self::NODE_COLUMNS);
        sqlx::query_as::<_, Node>(&sql)
            .bind(hash)
            .fetch_one(self.pool())
            .await
            .map_err(StoreError::from)
    }

    /// List every node in a cluster.
    pub async fn list_nodes_for_cluster(&self, cluster_id: Uuid) -> Result<Vec<Node>, StoreError> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE cluster_id = ? ORDER BY created_at",
            Self::NODE_COLUMNS
        );
        sqlx::query_as::<_, Node>(&sql)
            .bind(cluster_id)
            .fetch_all(self.pool())
            .await
            .map_err(StoreError::from)
    }

    /// Delete a node, bumping `config_version`.
    pub async fn delete_node(&self, cluster_id: Uuid, node_id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query("DELETE FROM nodes WHERE id = ? AND cluster_id = ?")
            .bind(node_id)
            .bind(cluster_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        bump_config_version(&mut tx, cluster_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Update a node's MTU, bumping `config_version`.
    pub async fn update_node_mtu(
        &self,
        cluster_id: Uuid,
        node_id: Uuid,
        mtu: i32,
    ) -> Result<Node, StoreError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query("UPDATE nodes SET mtu = ?, updated_at = ? WHERE id = ? AND cluster_id = ?")
            .bind(mtu)
            .bind(Utc::now())
            .bind(node_id)
            .bind(cluster_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        bump_config_version(&mut tx, cluster_id).await?;
        tx.commit().await?;
        self.get_node(node_id).await
    }

    /// Replace a node's token hash. Does not bump `config_version`.
    pub async fn rotate_node_token(
        &self,
        cluster_id: Uuid,
        node_id: Uuid,
        new_hash: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE nodes SET token_hash = ?, updated_at = ? WHERE id = ? AND cluster_id = ?",
        )
        .bind(new_hash)
        .bind(Utc::now())
        .bind(node_id)
        .bind(cluster_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Set (or clear) a node's lighthouse flag, public address, and port.
    /// Bumps `config_version`.
    pub async fn set_node_lighthouse(
        &self,
        cluster_id: Uuid,
        node_id: Uuid,
        is_lighthouse: bool,
        public_ip: Option<&str>,
        port: Option<i32>,
    ) -> Result<Node, StoreError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE nodes SET is_lighthouse = ?, lighthouse_public_ip = ?, lighthouse_port = ?, \
             updated_at = ? WHERE id = ? AND cluster_id = ?",
        )
        .bind(is_lighthouse)
        .bind(public_ip)
        .bind(port)
        .bind(Utc::now())
        .bind(node_id)
        .bind(cluster_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        bump_config_version(&mut tx, cluster_id).await?;
        tx.commit().await?;
        self.get_node(node_id).await
    }

    /// Set (or clear) a node's relay flag. Bumps `config_version`.
    pub async fn set_node_relay(
        &self,
        cluster_id: Uuid,
        node_id: Uuid,
        is_relay: bool,
    ) -> Result<Node, StoreError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE nodes SET is_relay = ?, updated_at = ? WHERE id = ? AND cluster_id = ?",
        )
        .bind(is_relay)
        .bind(Utc::now())
        .bind(node_id)
        .bind(cluster_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        bump_config_version(&mut tx, cluster_id).await?;
        tx.commit().await?;
        self.get_node(node_id).await
    }

    /// Replace a node's route set. Bumps `config_version` only if the set
    /// actually changed (an empty list clears routes, which is itself a
    /// change if routes previously existed).
    pub async fn register_node_routes(
        &self,
        cluster_id: Uuid,
        node_id: Uuid,
        routes: &[String],
    ) -> Result<Node, StoreError> {
        let current = self.get_node(node_id).await?;
        let encoded = Node::encode_routes(routes);

        if current.routes == encoded {
            return Ok(current);
        }

        let mut tx = self.pool().begin().await?;

        let result =
            sqlx::query("UPDATE nodes SET routes = ?, updated_at = ? WHERE id = ? AND cluster_id = ?")
                .bind(&encoded)
                .bind(Utc::now())
                .bind(node_id)
                .bind(cluster_id)
                .execute(&mut *tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        bump_config_version(&mut tx, cluster_id).await?;
        tx.commit().await?;
        self.get_node(node_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store;

    async fn seed_cluster(store: &Store) -> (Uuid, Uuid) {
        let tenant = store.create_tenant("Acme").await.unwrap();
        let cluster = store
            .create_cluster(tenant.id, "prod", "chash", false, None)
            .await
            .unwrap();
        (tenant.id, cluster.id)
    }

    #[tokio::test]
    async fn create_node_bumps_cluster_version() {
        let store = test_store().await;
        let (tenant_id, cluster_id) = seed_cluster(&store).await;

        let node = store
            .create_node(tenant_id, cluster_id, "root", true, "nhash", 1300)
            .await
            .unwrap();
        assert_eq!(node.mtu, 1300);

        let cluster = store.get_cluster(cluster_id).await.unwrap();
        assert_eq!(cluster.config_version, 2);
    }

    #[tokio::test]
    async fn duplicate_name_in_cluster_conflicts() {
        let store = test_store().await;
        let (tenant_id, cluster_id) = seed_cluster(&store).await;
        store
            .create_node(tenant_id, cluster_id, "root", true, "h1", 1300)
            .await
            .unwrap();
        let err = store
            .create_node(tenant_id, cluster_id, "root", false, "h2", 1300)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn register_routes_no_op_does_not_bump_version() {
        let store = test_store().await;
        let (tenant_id, cluster_id) = seed_cluster(&store).await;
        let node = store
            .create_node(tenant_id, cluster_id, "root", true, "h1", 1300)
            .await
            .unwrap();

        let before = store.get_cluster(cluster_id).await.unwrap().config_version;
        // Registering the same empty set is a no-op.
        store
            .register_node_routes(cluster_id, node.id, &[])
            .await
            .unwrap();
        let after = store.get_cluster(cluster_id).await.unwrap().config_version;
        assert_eq!(before, after);

        store
            .register_node_routes(cluster_id, node.id, &["10.0.0.0/24".to_owned()])
            .await
            .unwrap();
        let bumped = store.get_cluster(cluster_id).await.unwrap().config_version;
        assert_eq!(bumped, before + 1);
    }

    #[tokio::test]
    async fn rotate_token_does_not_bump_version() {
        let store = test_store().await;
        let (tenant_id, cluster_id) = seed_cluster(&store).await;
        let node = store
            .create_node(tenant_id, cluster_id, "root", true, "h1", 1300)
            .await
            .unwrap();
        let before = store.get_cluster(cluster_id).await.unwrap().config_version;

        store
            .rotate_node_token(cluster_id, node.id, "h2")
            .await
            .unwrap();

        let after = store.get_cluster(cluster_id).await.unwrap().config_version;
        assert_eq!(before, after);
        assert!(store.get_node_by_token_hash("h1").await.is_err());
        assert!(store.get_node_by_token_hash("h2").await.is_ok());
    }
}
