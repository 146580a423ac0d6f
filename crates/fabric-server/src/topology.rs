//! Topology service: node/cluster CRUD, route and lighthouse/relay
//! assignment, all wrapped with the validation the raw `fabric-store`
//! repository methods don't perform themselves.

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;

use fabric_core::identity::{generate_token, hash_token};
use fabric_core::models::{Cluster, Node};
use fabric_store::error::StoreError;
use fabric_store::Store;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by topology operations, beyond what the store itself
/// raises.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("invalid lighthouse address: {0}")]
    InvalidAddress(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("invalid field: {0}")]
    InvalidField(String),
}

/// A freshly created node's plaintext token, returned exactly once.
pub struct CreatedNode {
    pub node: Node,
    pub plaintext_token: String,
}

/// A freshly rotated token, returned exactly once.
pub struct RotatedToken {
    pub plaintext_token: String,
}

/// Full read-only view of a cluster's topology.
pub struct ClusterTopology {
    pub cluster: Cluster,
    pub nodes: Vec<Node>,
}

pub struct TopologyService {
    store: Arc<Store>,
    hmac_secret: Arc<[u8]>,
}

impl TopologyService {
    #[must_use]
    pub fn new(store: Arc<Store>, hmac_secret: Arc<[u8]>) -> Self {
        Self { store, hmac_secret }
    }

    /// Create a node, generating and hashing its token. Returns the
    /// plaintext token exactly once.
    pub async fn create_node(
        &self,
        tenant_id: Uuid,
        cluster_id: Uuid,
        name: &str,
        is_admin: bool,
        mtu: i32,
    ) -> Result<CreatedNode, TopologyError> {
        let mtu = mtu.clamp(Node::MIN_MTU, Node::MAX_MTU);
        let plaintext_token = generate_token();
        let token_hash = hash_token(&self.hmac_secret, &plaintext_token);

        let node = self
            .store
            .create_node(tenant_id, cluster_id, name, is_admin, &token_hash, mtu)
            .await?;

        Ok(CreatedNode { node, plaintext_token })
    }

    pub async fn list_nodes(&self, cluster_id: Uuid) -> Result<Vec<Node>, TopologyError> {
        Ok(self.store.list_nodes_for_cluster(cluster_id).await?)
    }

    pub async fn delete_node(&self, cluster_id: Uuid, node_id: Uuid) -> Result<(), TopologyError> {
        Ok(self.store.delete_node(cluster_id, node_id).await?)
    }

    pub async fn update_mtu(
        &self,
        cluster_id: Uuid,
        node_id: Uuid,
        mtu: i32,
    ) -> Result<Node, TopologyError> {
        if !(Node::MIN_MTU..=Node::MAX_MTU).contains(&mtu) {
            return Err(TopologyError::InvalidField(format!(
                "mtu {mtu} outside allowed range [{}, {}]",
                Node::MIN_MTU,
                Node::MAX_MTU
            )));
        }
        Ok(self.store.update_node_mtu(cluster_id, node_id, mtu).await?)
    }

    /// Rotate a node's token. The old token becomes invalid the instant
    /// this returns.
    pub async fn rotate_node_token(
        &self,
        cluster_id: Uuid,
        node_id: Uuid,
    ) -> Result<RotatedToken, TopologyError> {
        let plaintext_token = generate_token();
        let token_hash = hash_token(&self.hmac_secret, &plaintext_token);
        self.store
            .rotate_node_token(cluster_id, node_id, &token_hash)
            .await?;
        Ok(RotatedToken { plaintext_token })
    }

    /// Rotate a cluster's own token.
    pub async fn rotate_cluster_token(
        &self,
        cluster_id: Uuid,
    ) -> Result<RotatedToken, TopologyError> {
        let plaintext_token = generate_token();
        let token_hash = hash_token(&self.hmac_secret, &plaintext_token);
        self.store.rotate_cluster_token(cluster_id, &token_hash).await?;
        Ok(RotatedToken { plaintext_token })
    }

    /// Set or clear a node's lighthouse flag. Validates the public address
    /// as IPv4 and the port range when enabling.
    pub async fn set_node_lighthouse(
        &self,
        cluster_id: Uuid,
        node_id: Uuid,
        is_lighthouse: bool,
        public_ip: Option<&str>,
        port: Option<i32>,
    ) -> Result<Node, TopologyError> {
        if is_lighthouse {
            let ip = public_ip.ok_or_else(|| {
                TopologyError::InvalidAddress("lighthouse_public_ip is required".to_owned())
            })?;
            Ipv4Addr::from_str(ip)
                .map_err(|_| TopologyError::InvalidAddress(format!("'{ip}' is not an IPv4 address")))?;

            let port = port.ok_or_else(|| {
                TopologyError::InvalidPort("lighthouse_port is required".to_owned())
            })?;
            validate_port(port)?;
        }

        Ok(self
            .store
            .set_node_lighthouse(cluster_id, node_id, is_lighthouse, public_ip, port)
            .await?)
    }

    pub async fn set_node_relay(
        &self,
        cluster_id: Uuid,
        node_id: Uuid,
        is_relay: bool,
    ) -> Result<Node, TopologyError> {
        Ok(self.store.set_node_relay(cluster_id, node_id, is_relay).await?)
    }

    /// Parse and validate every CIDR in `routes`, then replace the node's
    /// route set. An empty list clears routes.
    pub async fn register_routes(
        &self,
        cluster_id: Uuid,
        node_id: Uuid,
        routes: &[String],
    ) -> Result<Node, TopologyError> {
        let mut validated = Vec::with_capacity(routes.len());
        for cidr in routes {
            validated.push(validate_cidr(cidr)?);
        }
        Ok(self.store.register_node_routes(cluster_id, node_id, &validated).await?)
    }

    pub async fn get_topology(&self, cluster_id: Uuid) -> Result<ClusterTopology, TopologyError> {
        let cluster = self.store.get_cluster(cluster_id).await?;
        let nodes = self.store.list_nodes_for_cluster(cluster_id).await?;
        Ok(ClusterTopology { cluster, nodes })
    }

    /// Cluster-wide route map: `(node_id, node_name) -> routes`.
    pub async fn cluster_routes(&self, cluster_id: Uuid) -> Result<Vec<Node>, TopologyError> {
        Ok(self.store.list_nodes_for_cluster(cluster_id).await?)
    }
}

/// Validate a CIDR string of the form `a.b.c.d/n`. Deliberately dependency-free
/// (no `ipnetwork`/`cidr` crate in the workspace) — the format is simple
/// enough that a hand-rolled parser is both correct and auditable.
fn validate_cidr(raw: &str) -> Result<String, TopologyError> {
    let (addr, prefix) = raw
        .split_once('/')
        .ok_or_else(|| TopologyError::InvalidRoute(format!("'{raw}' is missing a /prefix")))?;

    Ipv4Addr::from_str(addr)
        .map_err(|_| TopologyError::InvalidRoute(format!("'{raw}' has an invalid address")))?;

    let prefix_len: u8 = prefix
        .parse()
        .map_err(|_| TopologyError::InvalidRoute(format!("'{raw}' has a non-numeric prefix")))?;

    if prefix_len > 32 {
        return Err(TopologyError::InvalidRoute(format!(
            "'{raw}' prefix length must be in [0, 32]"
        )));
    }

    Ok(raw.to_owned())
}

fn validate_port(port: i32) -> Result<(), TopologyError> {
    if (1..=65535).contains(&port) {
        Ok(())
    } else {
        Err(TopologyError::InvalidPort(format!(
            "{port} outside allowed range [1, 65535]"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    async fn service() -> (TopologyService, NamedTempFile) {
        let db = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::connect(db.path().to_str().unwrap()).await.unwrap());
        (TopologyService::new(store, Arc::from(b"a-32-byte-test-hmac-secret-key!!".as_slice())), db)
    }

    #[tokio::test]
    async fn create_node_returns_token_meeting_minimum_length() {
        let (svc, _db) = service().await;
        let tenant = svc.store.create_tenant("Acme").await.unwrap();
        let cluster = svc
            .store
            .create_cluster(tenant.id, "prod", "chash", false, None)
            .await
            .unwrap();

        let created = svc
            .create_node(tenant.id, cluster.id, "root", true, 1300)
            .await
            .unwrap();
        assert!(created.plaintext_token.len() >= fabric_core::identity::MIN_TOKEN_LEN);
    }

    #[tokio::test]
    async fn register_routes_rejects_malformed_cidr() {
        let (svc, _db) = service().await;
        let tenant = svc.store.create_tenant("Acme").await.unwrap();
        let cluster = svc
            .store
            .create_cluster(tenant.id, "prod", "chash", false, None)
            .await
            .unwrap();
        let created = svc
            .create_node(tenant.id, cluster.id, "root", true, 1300)
            .await
            .unwrap();

        let err = svc
            .register_routes(cluster.id, created.node.id, &["not-a-cidr".to_owned()])
            .await
            .unwrap_err();
        assert!(matches!(err, TopologyError::InvalidRoute(_)));
    }

    #[tokio::test]
    async fn register_routes_accepts_valid_cidr() {
        let (svc, _db) = service().await;
        let tenant = svc.store.create_tenant("Acme").await.unwrap();
        let cluster = svc
            .store
            .create_cluster(tenant.id, "prod", "chash", false, None)
            .await
            .unwrap();
        let created = svc
            .create_node(tenant.id, cluster.id, "root", true, 1300)
            .await
            .unwrap();

        let node = svc
            .register_routes(cluster.id, created.node.id, &["10.0.0.0/24".to_owned()])
            .await
            .unwrap();
        assert_eq!(node.route_list(), vec!["10.0.0.0/24".to_owned()]);
    }

    #[tokio::test]
    async fn set_lighthouse_rejects_invalid_port() {
        let (svc, _db) = service().await;
        let tenant = svc.store.create_tenant("Acme").await.unwrap();
        let cluster = svc
            .store
            .create_cluster(tenant.id, "prod", "chash", false, None)
            .await
            .unwrap();
        let created = svc
            .create_node(tenant.id, cluster.id, "root", true, 1300)
            .await
            .unwrap();

        let err = svc
            .set_node_lighthouse(cluster.id, created.node.id, true, Some("10.0.0.1"), Some(70000))
            .await
            .unwrap_err();
        assert!(matches!(err, TopologyError::InvalidPort(_)));
    }
}
