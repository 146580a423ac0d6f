//! Relational store for the fabric control plane.
//!
//! A single `SqlitePool` backs every table described in the data model:
//! tenants, clusters, nodes, config bundles, HA replicas, and per-instance
//! cluster convergence state. There is exactly one writer process at a
//! time (the elected master); replicas open the same database read-only
//! for their own queries (health, topology reads, config downloads) and
//! never issue a statement that mutates a row.
//!
//! This crate knows nothing about HTTP — it returns [`error::StoreError`],
//! which `fabric-server::error::AppError` maps onto status codes.

pub mod bundles;
pub mod cluster_state;
pub mod clusters;
pub mod error;
pub mod nodes;
pub mod replicas;
pub mod tenants;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use error::StoreError;

/// Handle to the durable store. Cheap to clone — wraps a pooled connection.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (creating if absent) the SQLite database at `path` and run
    /// pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection or migration fails.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Backend(format!("invalid database path '{path}': {e}")))?
            .create_if_missing(true)
            .foreign_keys(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to open '{path}': {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Build a store directly from an existing pool — used by tests that
    /// open an in-memory database and want to share it across connections.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for callers that need a raw connection (the
    /// bundle upload/version-bump transaction, for instance).
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
pub(crate) async fn test_store() -> Store {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Store::from_pool(pool)
}
