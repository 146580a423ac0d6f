//! `/v1/nodes` — admin-node-scoped node CRUD.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, patch, post};
use axum::{Extension, Json, Router};
use fabric_core::models::Node;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_node).get(list_nodes))
        .route("/{id}", delete(delete_node))
        .route("/{id}/mtu", patch(update_mtu))
        .route("/{id}/token", post(rotate_token))
}

#[derive(Deserialize)]
struct CreateNodeRequest {
    name: String,
    #[serde(default)]
    is_admin: bool,
    mtu: i32,
}

#[derive(Serialize)]
struct CreatedNodeResponse {
    node: Node,
    token: String,
}

async fn create_node(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateNodeRequest>,
) -> Result<(StatusCode, Json<CreatedNodeResponse>), AppError> {
    let created = state.topology()
        .create_node(auth.tenant_id, auth.cluster_id, &body.name, body.is_admin, body.mtu)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedNodeResponse {
            node: created.node,
            token: created.plaintext_token,
        }),
    ))
}

async fn list_nodes(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Node>>, AppError> {
    let nodes = state.topology().list_nodes(auth.cluster_id).await?;
    Ok(Json(nodes))
}

async fn delete_node(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.topology().delete_node(auth.cluster_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct UpdateMtuRequest {
    mtu: i32,
}

async fn update_mtu(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateMtuRequest>,
) -> Result<Json<Node>, AppError> {
    let node = state.topology().update_mtu(auth.cluster_id, id, body.mtu).await?;
    Ok(Json(node))
}

#[derive(Serialize)]
struct RotatedTokenResponse {
    token: String,
}

async fn rotate_token(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<RotatedTokenResponse>, AppError> {
    let rotated = state.topology().rotate_node_token(auth.cluster_id, id).await?;
    Ok(Json(RotatedTokenResponse { token: rotated.plaintext_token }))
}
