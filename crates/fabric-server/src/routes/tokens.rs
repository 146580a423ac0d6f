//! `/v1/tokens/cluster/rotate` — cluster-token-scoped token rotation.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde::Serialize;

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/cluster/rotate", post(rotate_cluster_token))
}

#[derive(Serialize)]
struct RotatedTokenResponse {
    token: String,
}

async fn rotate_cluster_token(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<RotatedTokenResponse>, AppError> {
    let rotated = state.topology().rotate_cluster_token(auth.cluster_id).await?;
    Ok(Json(RotatedTokenResponse { token: rotated.plaintext_token }))
}
