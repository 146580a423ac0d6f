//! `/v1/topology`, `/v1/topology/lighthouse`, `/v1/topology/relay` —
//! cluster-token-scoped topology reads and lighthouse/relay assignment.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use fabric_core::models::Node;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_topology))
        .route("/lighthouse", post(set_lighthouse))
        .route("/relay", post(set_relay))
}

#[derive(Serialize)]
struct TopologyResponse {
    cluster: fabric_core::models::Cluster,
    nodes: Vec<Node>,
}

async fn get_topology(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<TopologyResponse>, AppError> {
    let topology = state.topology().get_topology(auth.cluster_id).await?;
    Ok(Json(TopologyResponse { cluster: topology.cluster, nodes: topology.nodes }))
}

#[derive(Deserialize)]
struct SetLighthouseRequest {
    node_id: Uuid,
    is_lighthouse: bool,
    public_ip: Option<String>,
    port: Option<i32>,
}

async fn set_lighthouse(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<SetLighthouseRequest>,
) -> Result<Json<Node>, AppError> {
    let node = state
        .topology()
        .set_node_lighthouse(
            auth.cluster_id,
            body.node_id,
            body.is_lighthouse,
            body.public_ip.as_deref(),
            body.port,
        )
        .await?;
    Ok(Json(node))
}

#[derive(Deserialize)]
struct SetRelayRequest {
    node_id: Uuid,
    is_relay: bool,
}

async fn set_relay(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<SetRelayRequest>,
) -> Result<Json<Node>, AppError> {
    let node = state.topology().set_node_relay(auth.cluster_id, body.node_id, body.is_relay).await?;
    Ok(Json(node))
}
