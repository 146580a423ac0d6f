//! Write-guard middleware: rejects mutating requests on a non-master
//! replica with 503, carrying the current master's address so the client
//! can retry against it directly.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::AppError;
use crate::state::AppState;

/// Permits `GET`/`HEAD` unconditionally. For every other method, consults
/// [`crate::ha::HaCoordinator::is_master`]; if this instance is not master,
/// responds 503 with the current master's address. Fails closed: an error
/// resolving the election is itself a 503.
///
/// Can be bypassed entirely via `config.disable_write_guard`, for
/// single-instance development deployments.
pub async fn write_guard(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.config.disable_write_guard || matches!(*req.method(), Method::GET | Method::HEAD) {
        return Ok(next.run(req).await);
    }

    let election = state
        .ha
        .is_master()
        .await
        .map_err(|err| AppError::ServiceUnavailable(err.to_string()))?;

    if !election.is_master {
        return Err(AppError::ReplicaReadOnly {
            master_address: election.master_address,
        });
    }

    Ok(next.run(req).await)
}
