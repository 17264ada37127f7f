//! Bearer-token extraction middleware.
//!
//! Identity and credential verification are an external collaborator
//! per the data model ("authentication and identity" is out of scope,
//! "treated as an opaque `userId`"): this middleware does not verify
//! the token, it only resolves it to the `userId` every protected
//! handler needs, mirroring the teacher's `require_api_token` shape
//! without the local secret comparison it has nothing upstream of it
//! to check against.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct UserId(pub String);

pub async fn require_bearer_user_id(
    State(_state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> axum::response::Response {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    match token {
        Some(user_id) => {
            req.extensions_mut().insert(UserId(user_id));
            next.run(req).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "code": "AuthError",
                "message": "missing or empty Authorization: Bearer token",
            })),
        )
            .into_response(),
    }
}
