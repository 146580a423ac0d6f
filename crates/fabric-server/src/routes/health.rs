//! Unauthenticated health routes: `/health/live`, `/health/ready`, `/health/master`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/master", get(master))
}

async fn live() -> StatusCode {
    StatusCode::OK
}

/// Readiness means the store can answer a trivial query.
async fn ready(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    sqlx::query("SELECT 1")
        .execute(state.store.pool())
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    Ok(StatusCode::OK)
}

#[derive(Serialize)]
struct MasterResponse {
    is_master: bool,
    instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    master_address: Option<String>,
}

async fn master(State(state): State<Arc<AppState>>) -> Result<Json<MasterResponse>, AppError> {
    let election = state.ha.is_master().await?;
    Ok(Json(MasterResponse {
        is_master: election.is_master,
        instance_id: state.ha.instance_id().to_owned(),
        master_address: (!election.is_master).then_some(election.master_address),
    }))
}
