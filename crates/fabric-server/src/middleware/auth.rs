//! Authentication middleware: node-token, admin-node, and cluster-token.
//!
//! Every failure mode — missing header, too-short token, no matching row,
//! hash mismatch — collapses to the same generic 401 so a client can never
//! learn which half of "token exists" vs. "token is correct" it got wrong.
//! No log statement in this module interpolates a raw token header value.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use fabric_core::identity::verify_token;
use fabric_core::ratelimit::{Decision, RateLimitClass};
use fabric_store::error::StoreError;

use crate::error::AppError;
use crate::middleware::rate_limit::client_ip;
use crate::state::AppState;

pub const NODE_TOKEN_HEADER: &str = "x-fabric-node-token";
pub const CLUSTER_TOKEN_HEADER: &str = "x-fabric-cluster-token";

/// Capability set attached to the request once authentication succeeds.
/// Handlers read this; middleware is the only code that constructs it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: Uuid,
    pub cluster_id: Uuid,
    pub node_id: Option<Uuid>,
    pub is_admin: bool,
}

/// Validate the `x-fabric-node-token` header and attach an [`AuthContext`].
pub async fn require_node_token(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    check_auth_attempt_budget(&state, &req).await?;

    let token = extract_header(&req, NODE_TOKEN_HEADER).ok_or(AppError::Unauthorized)?;

    if token.len() < fabric_core::identity::MIN_TOKEN_LEN {
        return Err(AppError::Unauthorized);
    }

    let node = lookup_node_by_token(&state, &token).await?;

    req.extensions_mut().insert(AuthContext {
        tenant_id: node.tenant_id,
        cluster_id: node.cluster_id,
        node_id: Some(node.id),
        is_admin: node.is_admin,
    });

    Ok(next.run(req).await)
}

/// Requires a prior [`require_node_token`] pass where `is_admin = true`.
pub async fn require_admin_node(
    axum::Extension(auth): axum::Extension<AuthContext>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !auth.is_admin {
        return Err(AppError::Forbidden);
    }
    Ok(next.run(req).await)
}

/// Validate the `x-fabric-cluster-token` header and attach an
/// [`AuthContext`] with `node_id = None`.
pub async fn require_cluster_token(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    check_auth_attempt_budget(&state, &req).await?;

    let token = extract_header(&req, CLUSTER_TOKEN_HEADER).ok_or(AppError::Unauthorized)?;

    if token.len() < fabric_core::identity::MIN_TOKEN_LEN {
        return Err(AppError::Unauthorized);
    }

    let cluster = lookup_cluster_by_token(&state, &token).await?;

    req.extensions_mut().insert(AuthContext {
        tenant_id: cluster.tenant_id,
        cluster_id: cluster.id,
        node_id: None,
        is_admin: false,
    });

    Ok(next.run(req).await)
}

/// `auth_failure` class, keyed by client IP, spent on every attempt
/// regardless of outcome — this bounds the rate of brute-force guesses a
/// single address can make, not just the rate of failures it accumulates.
async fn check_auth_attempt_budget(state: &AppState, req: &Request) -> Result<(), AppError> {
    let ip = client_ip(req);
    match state.rate_limiter.check(RateLimitClass::AuthFailure, &ip).await {
        Decision::Allowed => Ok(()),
        Decision::Denied { retry_after } => Err(AppError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        }),
    }
}

fn extract_header(req: &Request, name: &str) -> Option<String> {
    req.headers().get(name)?.to_str().ok().map(str::to_owned)
}

async fn lookup_node_by_token(
    state: &AppState,
    token: &str,
) -> Result<fabric_core::models::Node, AppError> {
    let hash = fabric_core::identity::hash_token(&state.config.hmac_secret, token);
    match state.store.get_node_by_token_hash(&hash).await {
        Ok(node) => {
            verify_token(&state.config.hmac_secret, token, &node.token_hash)
                .map_err(|_| AppError::Unauthorized)?;
            Ok(node)
        }
        Err(StoreError::NotFound) => Err(AppError::Unauthorized),
        Err(err) => Err(err.into()),
    }
}

async fn lookup_cluster_by_token(
    state: &AppState,
    token: &str,
) -> Result<fabric_core::models::Cluster, AppError> {
    let hash = fabric_core::identity::hash_token(&state.config.hmac_secret, token);
    match state.store.get_cluster_by_token_hash(&hash).await {
        Ok(cluster) => {
            verify_token(&state.config.hmac_secret, token, &cluster.cluster_token_hash)
                .map_err(|_| AppError::Unauthorized)?;
            Ok(cluster)
        }
        Err(StoreError::NotFound) => Err(AppError::Unauthorized),
        Err(err) => Err(err.into()),
    }
}
