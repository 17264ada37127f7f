pub mod auth;
pub mod conversations;
pub mod error;
pub mod ws;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router, split into public (no auth) and
/// protected (bearer-resolved-to-`userId`) halves, per the teacher's
/// `api::router` convention.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws::upgrade));

    let protected = Router::new()
        .route("/conversations", post(conversations::create))
        .route("/conversations/:id", get(conversations::get))
        .route("/conversations/:id/join", post(conversations::join))
        .route("/conversations/:id/start", post(conversations::start))
        .route("/conversations/:id/pause", post(conversations::pause))
        .route("/conversations/:id/resume", post(conversations::resume))
        .route("/conversations/:id/cancel", post(conversations::cancel))
        .route("/conversations/:id/events", get(conversations::events_sse))
        .route("/tickets", post(ws::issue_ticket))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_bearer_user_id,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}
