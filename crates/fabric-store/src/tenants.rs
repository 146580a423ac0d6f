//! Tenant CRUD — the top-level ownership boundary. Name is unique globally.

use chrono::Utc;
use fabric_core::models::Tenant;
use uuid::Uuid;

use crate::error::StoreError;
use crate::Store;

impl Store {
    /// Create a tenant with the given name.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if the name is already taken.
    pub async fn create_tenant(&self, name: &str) -> Result<Tenant, StoreError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();

        sqlx::query("INSERT INTO tenants (id, name, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(created_at)
            .execute(self.pool())
            .await?;

        Ok(Tenant {
            id,
            name: name.to_owned(),
            created_at,
        })
    }

    /// Fetch a tenant by id.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no tenant has that id.
    pub async fn get_tenant(&self, id: Uuid) -> Result<Tenant, StoreError> {
        sqlx::query_as::<_, Tenant>("SELECT id, name, created_at FROM tenants WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool())
            .await
            .map_err(StoreError::from)
    }

    /// List every tenant, ordered by creation time.
    pub async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        sqlx::query_as::<_, Tenant>("SELECT id, name, created_at FROM tenants ORDER BY created_at")
            .fetch_all(self.pool())
            .await
            .map_err(StoreError::from)
    }
}
