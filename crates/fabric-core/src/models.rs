//! Shared data model.
//!
//! Domain types for tenants, clusters, nodes, config bundles, HA replicas,
//! and per-instance cluster convergence state. All ids are UUIDs. Hash
//! fields are `#[serde(skip)]` so a row can be handed straight to
//! `axum::Json` without leaking the stored MAC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Tenants ──────────────────────────────────────────────────────────

/// A tenant — the top-level ownership boundary. Name is unique globally.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ── Clusters ─────────────────────────────────────────────────────────

/// A cluster within a tenant — the unit of topology and config distribution.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Cluster {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    #[serde(skip)]
    pub cluster_token_hash: String,
    pub provide_lighthouse: bool,
    pub lighthouse_port: Option<i32>,
    pub config_version: i64,
    pub ca_cert: Option<Vec<u8>>,
    pub ca_key: Option<Vec<u8>>,
    pub crl: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

// ── Nodes ────────────────────────────────────────────────────────────

/// A node enrolled into a cluster.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Node {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub cluster_id: Uuid,
    pub name: String,
    pub is_admin: bool,
    #[serde(skip)]
    pub token_hash: String,
    pub mtu: i32,
    /// Stored as a newline-joined list of CIDR strings; see `routes()`.
    pub routes: String,
    pub is_lighthouse: bool,
    pub lighthouse_public_ip: Option<String>,
    pub lighthouse_port: Option<i32>,
    pub is_relay: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Minimum allowed MTU (IPv6 minimum path MTU).
    pub const MIN_MTU: i32 = 1280;
    /// Maximum allowed MTU (jumbo frame ceiling used by Nebula-style overlays).
    pub const MAX_MTU: i32 = 9000;

    /// Parsed route set, skipping blank lines.
    #[must_use]
    pub fn route_list(&self) -> Vec<String> {
        self.routes
            .lines()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Serialize a route set back into storage form.
    #[must_use]
    pub fn encode_routes(routes: &[String]) -> String {
        routes.join("\n")
    }
}

// ── Config bundles ───────────────────────────────────────────────────

/// A single immutable, versioned configuration archive for a cluster.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConfigBundle {
    pub cluster_id: Uuid,
    pub version: i64,
    pub tenant_id: Uuid,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Maximum accepted bundle size in bytes (10 MiB).
pub const MAX_BUNDLE_BYTES: usize = 10 * 1024 * 1024;

/// The file set every bundle archive must contain.
pub const REQUIRED_BUNDLE_FILES: &[&str] =
    &["config.yml", "ca.crt", "crl.pem", "host.crt", "host.key"];

// ── HA replicas ──────────────────────────────────────────────────────

/// Role a replica row currently claims at startup. Live master identity is
/// always re-derived from [`crate::ha::elect_master`], never read off this
/// field directly once the process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ReplicaRole {
    Master,
    Replica,
}

impl std::fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Replica => write!(f, "replica"),
        }
    }
}

impl std::str::FromStr for ReplicaRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "master" => Ok(Self::Master),
            "replica" => Ok(Self::Replica),
            other => Err(format!("unknown replica mode: {other}")),
        }
    }
}

/// A row in the HA replica set.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Replica {
    pub id: String,
    pub address: String,
    pub role: ReplicaRole,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

// ── Cluster convergence state ────────────────────────────────────────

/// Per-(cluster, instance) record of which config version the local
/// Supervisor has actually converged to.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClusterState {
    pub cluster_id: Uuid,
    pub instance_id: String,
    pub running_config_version: i64,
    pub updated_at: DateTime<Utc>,
}
