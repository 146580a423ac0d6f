//! Unauthenticated `/v1/replicas` route — a list of healthy replicas,
//! useful for a client or load balancer discovering the current set
//! without going through the election logic itself.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use fabric_core::models::Replica;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_replicas))
}

async fn list_replicas(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Replica>>, AppError> {
    let replicas = state.store.list_replicas().await?;
    let cutoff = Utc::now()
        - chrono::Duration::from_std(state.config.heartbeat_threshold).unwrap_or(chrono::Duration::zero());
    let healthy = replicas.into_iter().filter(|r| r.last_seen_at > cutoff).collect();
    Ok(Json(healthy))
}
