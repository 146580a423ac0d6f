//! `/v1/routes` and `/v1/routes/cluster` — node-scoped route registration
//! and the cluster-wide route map every node needs to build its tunnel
//! firewall/next-hop table.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", put(register_routes).get(get_own_routes))
        .route("/cluster", get(cluster_routes))
}

fn own_node_id(auth: &AuthContext) -> Result<Uuid, AppError> {
    auth.node_id
        .ok_or_else(|| AppError::Internal("node-token auth context is missing a node id".to_owned()))
}

#[derive(Deserialize)]
struct RegisterRoutesRequest {
    routes: Vec<String>,
}

#[derive(Serialize)]
struct RoutesResponse {
    routes: Vec<String>,
}

async fn register_routes(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<RegisterRoutesRequest>,
) -> Result<Json<RoutesResponse>, AppError> {
    let node_id = own_node_id(&auth)?;
    let node = state.topology().register_routes(auth.cluster_id, node_id, &body.routes).await?;
    Ok(Json(RoutesResponse { routes: node.route_list() }))
}

async fn get_own_routes(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<RoutesResponse>, AppError> {
    let node_id = own_node_id(&auth)?;
    let node = state.store.get_node(node_id).await?;
    Ok(Json(RoutesResponse { routes: node.route_list() }))
}

#[derive(Serialize)]
struct ClusterRouteEntry {
    node_id: Uuid,
    name: String,
    routes: Vec<String>,
}

async fn cluster_routes(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<ClusterRouteEntry>>, AppError> {
    let nodes = state.topology().cluster_routes(auth.cluster_id).await?;
    let entries = nodes
        .into_iter()
        .map(|n| ClusterRouteEntry { node_id: n.id, name: n.name.clone(), routes: n.route_list() })
        .collect();
    Ok(Json(entries))
}
