//! Maps internal [`conclave_domain::Error`] to the `{code, message}`
//! JSON error body per spec, following the teacher's per-handler
//! `(StatusCode, Json<Value>)` convention rather than a blanket
//! `IntoResponse` impl (status codes here depend on request context,
//! not solely on the error kind — e.g. "not found" vs "validation").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use conclave_domain::error::Error;

/// Render an [`Error`] as an HTTP response, picking a status code from
/// the §7 error taxonomy.
pub fn to_response(err: &Error) -> axum::response::Response {
    let (status, code) = match err {
        Error::Validation(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
        Error::Auth(_) => (StatusCode::UNAUTHORIZED, "AuthError"),
        Error::NoValidBids(_) => (StatusCode::CONFLICT, "NoValidBidsError"),
        Error::BudgetExceeded(_) => (StatusCode::CONFLICT, "BudgetExceededError"),
        Error::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TimeoutError"),
        Error::Upstream(_) => (StatusCode::BAD_GATEWAY, "UpstreamError"),
        Error::CircuitOpen { .. } => (StatusCode::SERVICE_UNAVAILABLE, "CircuitOpenError"),
        Error::Transport(_) => (StatusCode::BAD_GATEWAY, "TransportError"),
        Error::Config(_) | Error::Invariant(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        Error::Io(_) | Error::Json(_) | Error::Other(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
        }
    };
    (
        status,
        Json(serde_json::json!({ "code": code, "message": err.to_string() })),
    )
        .into_response()
}

pub fn not_found(message: impl Into<String>) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "code": "NotFound", "message": message.into() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn validation_error_maps_to_bad_request() {
        let resp = to_response(&Error::Validation("bad topic".into()));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn no_valid_bids_maps_to_conflict() {
        let resp = to_response(&Error::NoValidBids("stalled".into()));
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
