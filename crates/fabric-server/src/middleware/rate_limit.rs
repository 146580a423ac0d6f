//! Per-identity rate-limit middleware, wrapping [`fabric_core::ratelimit`].
//!
//! Each function below checks one [`RateLimitClass`], keyed by the
//! identity source §4.4 specifies for that class, and turns a [`Decision::Denied`]
//! into `AppError::RateLimited`. Auth-class limiting lives in
//! [`crate::middleware::auth`] since only that module sees a request before
//! its token is parsed.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use fabric_core::ratelimit::{Decision, RateLimitClass};

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::state::AppState;

/// Extract the caller's address as recorded by `into_make_service_with_connect_info`.
pub fn client_ip(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Pipeline-wide `request` class check keyed by client IP, applied before
/// auth and the write-guard to every request regardless of route. The
/// per-route [`request_rate_limit`] below re-checks the same class keyed by
/// node id once auth has run — the two use distinct bucket keys and do not
/// double-count the same identity.
pub async fn global_rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    check(&state, RateLimitClass::Request, &client_ip(&req)).await?;
    Ok(next.run(req).await)
}

/// `health_check` class, keyed by client IP. Mounted on `/health/*`.
pub async fn health_check_rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    check(&state, RateLimitClass::HealthCheck, &client_ip(&req)).await?;
    Ok(next.run(req).await)
}

/// `request` class, keyed by node id. Requires a prior node-token pass;
/// falls back to client IP if no [`AuthContext`] is present (e.g. a
/// cluster-scoped route).
pub async fn request_rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = req
        .extensions()
        .get::<AuthContext>()
        .and_then(|auth| auth.node_id)
        .map(|id| id.to_string())
        .unwrap_or_else(|| client_ip(&req));

    check(&state, RateLimitClass::Request, &identity).await?;
    Ok(next.run(req).await)
}

/// `bundle_upload` class, keyed by cluster id. Mounted only on the bundle
/// upload route, after cluster/admin-node auth has attached [`AuthContext`].
pub async fn bundle_upload_rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let cluster_id = req
        .extensions()
        .get::<AuthContext>()
        .map(|auth| auth.cluster_id.to_string())
        .unwrap_or_else(|| client_ip(&req));

    check(&state, RateLimitClass::BundleUpload, &cluster_id).await?;
    Ok(next.run(req).await)
}

async fn check(state: &AppState, class: RateLimitClass, identity: &str) -> Result<(), AppError> {
    match state.rate_limiter.check(class, identity).await {
        Decision::Allowed => Ok(()),
        Decision::Denied { retry_after } => Err(AppError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        }),
    }
}
