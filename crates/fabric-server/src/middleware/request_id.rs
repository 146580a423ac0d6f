//! Per-request id assignment.
//!
//! Every request gets a fresh `uuid::Uuid`, recorded onto the `request_id`
//! field the `TraceLayer` span declares (see `make_span_with` in
//! `routes::build_router`) and stamped on the `X-Request-Id` response
//! header, so a single grep across JSON logs reconstructs one request's
//! lifecycle across auth, write-guard, and handler.
//!
//! [`AppError::into_response`](crate::error::AppError) needs this id too,
//! to put it in the JSON error body — but a `Response` doesn't carry the
//! `Request` it came from. A `tokio::task_local!` scoped around the rest of
//! the middleware chain lets any code running inside this request's task
//! read it back without threading it through every handler signature.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

tokio::task_local! {
    static REQUEST_ID: Uuid;
}

/// Assign a request id, scope it as a task-local for the duration of the
/// downstream middleware chain and handler, and stamp it on the response.
pub async fn assign_request_id(req: Request, next: Next) -> Response {
    let id = Uuid::new_v4();

    REQUEST_ID
        .scope(id, async move {
            let span = tracing::Span::current();
            span.record("request_id", tracing::field::display(id));

            let mut response = next.run(req).await;
            if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
                response.headers_mut().insert("X-Request-Id", value);
            }
            response
        })
        .await
}

/// The current request's id, or `"unknown"` if called outside the scope
/// `assign_request_id` establishes (e.g. a unit test that builds an
/// `AppError` directly).
#[must_use]
pub fn current_request_id() -> String {
    REQUEST_ID
        .try_with(Uuid::to_string)
        .unwrap_or_else(|_| "unknown".to_owned())
}
