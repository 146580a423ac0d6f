//! The unified, HTTP-facing error type.
//!
//! Every domain error enum in this workspace (`fabric_store::StoreError`,
//! `fabric_core::TokenError`, `fabric_core::HaError`, and this crate's own
//! `ha`/`topology`/`bundle`/`supervisor` error types) is folded into
//! [`AppError`] via `#[from]`. This is the only type in the workspace that
//! knows about HTTP status codes — nothing upstream of it mentions axum.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use fabric_core::error::{HaError, TokenError};
use fabric_store::error::StoreError;

use crate::bundle::BundleError;
use crate::middleware::request_id::current_request_id;
use crate::supervisor::SupervisorError;
use crate::topology::TopologyError;

/// The application-wide error type returned from handlers and middleware.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("replica is read-only, master is at {master_address}")]
    ReplicaReadOnly { master_address: String },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    master_address: Option<String>,
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Conflict(_) => "conflict",
            Self::PayloadTooLarge => "payload_too_large",
            Self::RateLimited { .. } => "rate_limited",
            Self::ReplicaReadOnly { .. } => "replica_read_only",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ReplicaReadOnly { .. } | Self::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let request_id = current_request_id();

        // Authentication failures collapse to one generic message so a
        // client cannot distinguish "no such token" from "wrong token".
        let message = match &self {
            Self::Unauthorized => "authentication failed".to_owned(),
            other => other.to_string(),
        };

        let master_address = match &self {
            Self::ReplicaReadOnly { master_address } => Some(master_address.clone()),
            _ => None,
        };

        let mut response = (
            status,
            axum::Json(ErrorBody {
                code,
                message,
                request_id,
                master_address: master_address.clone(),
            }),
        )
            .into_response();

        if let Self::RateLimited { retry_after_secs } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        if let Some(addr) = master_address {
            if let Ok(value) = HeaderValue::from_str(&addr) {
                response.headers_mut().insert("X-Fabric-Master-Address", value);
            }
        }

        response
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Backend(msg) => Self::Internal(msg),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(_: TokenError) -> Self {
        // TooShort, Mismatch, and MalformedHash are all auth failures from
        // the client's point of view — collapsed to prevent enumeration.
        Self::Unauthorized
    }
}

impl From<HaError> for AppError {
    fn from(err: HaError) -> Self {
        match err {
            HaError::MasterCollision { .. } => Self::Internal(err.to_string()),
            HaError::Store(msg) => Self::ServiceUnavailable(msg),
        }
    }
}

impl From<TopologyError> for AppError {
    fn from(err: TopologyError) -> Self {
        match err {
            TopologyError::Store(inner) => inner.into(),
            TopologyError::InvalidRoute(msg)
            | TopologyError::InvalidAddress(msg)
            | TopologyError::InvalidPort(msg)
            | TopologyError::InvalidField(msg) => Self::InvalidRequest(msg),
        }
    }
}

impl From<BundleError> for AppError {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::Store(inner) => inner.into(),
            BundleError::TooLarge => Self::PayloadTooLarge,
            BundleError::UnsupportedContentType(msg)
            | BundleError::MalformedArchive(msg)
            | BundleError::MissingFiles(msg)
            | BundleError::InvalidYaml(msg) => Self::InvalidRequest(msg),
        }
    }
}

impl From<SupervisorError> for AppError {
    fn from(err: SupervisorError) -> Self {
        Self::Internal(err.to_string())
    }
}
