//! `/v1/config/version` and `/v1/config/bundle` — versioned config
//! distribution. Reads are node-scoped; upload is admin-node-scoped.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crate::bundle::DownloadOutcome;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::state::AppState;

/// Node-scoped reads only. The upload route (admin-node-scoped, with its
/// own rate-limit class and raised body limit) is assembled separately in
/// [`crate::routes::bundle_router`].
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/version", get(get_version))
        .route("/bundle", get(download_bundle))
}

#[derive(Serialize)]
struct VersionResponse {
    version: i64,
}

async fn get_version(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<VersionResponse>, AppError> {
    let version = state.bundle_service().version(auth.cluster_id).await?;
    Ok(Json(VersionResponse { version }))
}

#[derive(Deserialize)]
struct DownloadQuery {
    current_version: Option<i64>,
}

async fn download_bundle(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<axum::response::Response, AppError> {
    use axum::response::IntoResponse;

    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());

    match state
        .bundle_service()
        .download(auth.cluster_id, query.current_version, if_none_match)
        .await?
    {
        DownloadOutcome::NotModified { version } => {
            let mut resp = StatusCode::NOT_MODIFIED.into_response();
            if let Ok(etag) = HeaderValue::from_str(&format!("\"v{version}\"")) {
                resp.headers_mut().insert(header::ETAG, etag);
            }
            Ok(resp)
        }
        DownloadOutcome::Body(bundle) => {
            let mut resp = bundle.data.clone().into_response();
            let headers = resp.headers_mut();
            if let Ok(etag) = HeaderValue::from_str(&format!("\"v{}\"", bundle.version)) {
                headers.insert(header::ETAG, etag);
            }
            if let Ok(version) = HeaderValue::from_str(&bundle.version.to_string()) {
                headers.insert("X-Config-Version", version);
            }
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/gzip"));
            if let Ok(disposition) = HeaderValue::from_str(&format!(
                "attachment; filename=\"bundle-v{}.tar.gz\"",
                bundle.version
            )) {
                headers.insert(header::CONTENT_DISPOSITION, disposition);
            }
            Ok(resp)
        }
    }
}

#[derive(Serialize)]
struct UploadResponse {
    version: i64,
}

pub async fn upload_bundle_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let bundle = state
        .bundle_service()
        .upload(auth.cluster_id, auth.tenant_id, content_type, &body, auth.node_id)
        .await?;

    Ok((StatusCode::CREATED, Json(UploadResponse { version: bundle.version })))
}
