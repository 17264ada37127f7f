//! Ticket-authenticated bidirectional session protocol for human
//! observers.
//!
//! Lifecycle grounded on the teacher's `nodes::ws::handle_socket`:
//! upgrade → welcome → outbound mpsc channel → registry registration
//! → split reader/writer tasks → cleanup on any exit path. Simplified
//! from the teacher's hello/handshake wait (no inbound hello is
//! required here — the ticket in the query string already identifies
//! the user before upgrade).

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use conclave_protocol::{ClientFrame, ServerFrame};
use conclave_registry::ClientSession;

use crate::api::auth::UserId;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    pub ticket: String,
    pub expires_in_ms: u64,
}

/// `POST /tickets` — exchange a resolved `userId` for a short-lived,
/// single-use WS ticket.
pub async fn issue_ticket(
    State(state): State<AppState>,
    axum::Extension(UserId(user_id)): axum::Extension<UserId>,
) -> impl IntoResponse {
    let ttl_ms = state.config.server.ticket_ttl_ms;
    let ticket = state.tickets.issue(&user_id, ttl_ms);
    Json(TicketResponse {
        ticket,
        expires_in_ms: ttl_ms,
    })
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub ticket: String,
}

/// `GET /ws?ticket=...` — upgrade to a bidirectional observer session.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let Some(user_id) = state.tickets.consume(&query.ticket) else {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            "invalid or expired ticket",
        )
            .into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let session_id = Uuid::new_v4().to_string();

    let welcome = ServerFrame::connected(session_id.clone(), Utc::now().timestamp_millis());
    if send_frame(&mut ws_sink, &welcome).await.is_err() {
        tracing::warn!(user_id = %user_id, "failed to send connected frame");
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(64);
    state.registry.add(ClientSession {
        user_id: user_id.clone(),
        session_id: session_id.clone(),
        connected_at: Utc::now(),
        last_ping_at: Utc::now(),
        sink: outbound_tx,
    });
    tracing::info!(user_id = %user_id, session_id = %session_id, "observer connected");

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if send_frame(&mut ws_sink, &frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                if let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) {
                    handle_inbound(&state, &user_id, frame).await;
                } else {
                    tracing::debug!(user_id = %user_id, "ignoring unparseable client frame");
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                state.registry.ping(&user_id);
            }
            _ => {}
        }
    }

    writer.abort();
    state.registry.remove(&user_id);
    tracing::info!(user_id = %user_id, session_id = %session_id, "observer disconnected");
}

async fn handle_inbound(state: &AppState, user_id: &str, frame: ClientFrame) {
    state.registry.ping(user_id);
    match frame {
        ClientFrame::Ping { .. } => {
            let _ = state
                .registry
                .send_to_user(user_id, ServerFrame::pong(Utc::now().timestamp_millis()));
        }
        ClientFrame::Subscribe { payload } => {
            state.registry.subscribe(user_id, &payload.conversation_id);
        }
        ClientFrame::Unsubscribe { payload } => {
            state.registry.unsubscribe(user_id, &payload.conversation_id);
        }
        ClientFrame::Typing { .. } => {
            // Typing indicators from human observers aren't delivered
            // anywhere in this system yet — there's no agent consumer
            // for them; acknowledged by the ping above only.
        }
    }
}

async fn send_frame(
    sink: &mut (impl SinkExt<Message> + Unpin),
    frame: &ServerFrame,
) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}
