//! Route modules and full router assembly.
//!
//! Pipeline order (outermost to innermost): panic recovery → metrics hook →
//! request-id assignment + tracing span → CORS → global per-IP rate limit →
//! write-guard → route dispatch. Auth and per-identity rate limiting are
//! layered per route group below this.

pub mod bundle;
pub mod health;
pub mod nodes;
pub mod replicas;
pub mod routes;
pub mod tokens;
pub mod topology;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware::from_fn_with_state;
use axum::extract::Request;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::field::Empty;

use fabric_core::models::MAX_BUNDLE_BYTES;

use crate::middleware::auth::{require_admin_node, require_cluster_token, require_node_token};
use crate::middleware::rate_limit::{
    bundle_upload_rate_limit, global_rate_limit, health_check_rate_limit, request_rate_limit,
};
use crate::middleware::request_id::assign_request_id;
use crate::middleware::write_guard::write_guard;
use crate::middleware::metrics::record_metrics;
use crate::state::AppState;

/// Build the full application router over a shared [`AppState`].
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state);

    let health_routes = health::router()
        .route_layer(from_fn_with_state(Arc::clone(&state), health_check_rate_limit));

    let public_routes = Router::new()
        .nest("/health", health_routes)
        .nest("/v1/replicas", replicas::router());

    let node_scoped = Router::new()
        .nest("/v1/config", bundle_router(&state))
        .nest("/v1/routes", routes::router())
        .route_layer(from_fn_with_state(Arc::clone(&state), request_rate_limit))
        .route_layer(from_fn_with_state(Arc::clone(&state), require_node_token));

    let admin_scoped = Router::new()
        .nest("/v1/nodes", nodes::router())
        .route_layer(from_fn_with_state(Arc::clone(&state), request_rate_limit))
        .route_layer(from_fn_with_state(Arc::clone(&state), require_admin_node))
        .route_layer(from_fn_with_state(Arc::clone(&state), require_node_token));

    let cluster_scoped = Router::new()
        .nest("/v1/topology", topology::router())
        .nest("/v1/tokens", tokens::router())
        .route_layer(from_fn_with_state(Arc::clone(&state), request_rate_limit))
        .route_layer(from_fn_with_state(Arc::clone(&state), require_cluster_token));

    Router::new()
        .merge(public_routes)
        .merge(node_scoped)
        .merge(admin_scoped)
        .merge(cluster_scoped)
        .route_layer(from_fn_with_state(Arc::clone(&state), write_guard))
        .route_layer(from_fn_with_state(Arc::clone(&state), global_rate_limit))
        .layer(cors)
        .layer(axum::middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = Empty,
            )
        }))
        .layer(axum::middleware::from_fn(record_metrics))
        .layer(CatchPanicLayer::new())
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

/// `/v1/config/{version,bundle}`: reads are node-scoped, upload is
/// admin-node-scoped and additionally rate-limited by cluster id. Built
/// separately from the generic node-scoped group above because the upload
/// route needs its own auth layer and a raised body-size limit.
fn bundle_router(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let upload_only = Router::new()
        .route("/bundle", axum::routing::post(bundle::upload_bundle_handler))
        .route_layer(from_fn_with_state(Arc::clone(state), bundle_upload_rate_limit))
        .route_layer(from_fn_with_state(Arc::clone(state), require_admin_node))
        .layer(DefaultBodyLimit::max(MAX_BUNDLE_BYTES + 4096));

    bundle::router().merge(upload_only)
}

fn build_cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
        .max_age(Duration::from_secs(3600));

    if state.config.cors_origins.iter().any(|o| o == "*") {
        layer.allow_origin(tower_http::cors::Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
