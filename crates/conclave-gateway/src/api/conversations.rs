//! `/conversations` resource: create, join, start, inspect, and
//! pause/cancel/resume a run. Grounded on the teacher's
//! `api::tasks`/`api::schedules` request/response + SSE shape.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use conclave_domain::error::Error;
use conclave_domain::model::{
    Agent, Conversation, ConversationMode, ConversationStatus, Participant, Provider,
};
use conclave_registry::ClientSession;

use crate::api::auth::UserId;
use crate::api::error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub topic: String,
    #[serde(default)]
    pub goal: Option<String>,
    pub mode: ConversationMode,
    pub max_turns: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationResponse {
    pub conversation_id: String,
    pub status: ConversationStatus,
}

/// `POST /conversations`
pub async fn create(
    State(state): State<AppState>,
    axum::Extension(UserId(user_id)): axum::Extension<UserId>,
    Json(body): Json<CreateConversationRequest>,
) -> axum::response::Response {
    if body.topic.trim().is_empty() {
        return error::to_response(&Error::Validation("topic must not be empty".into()));
    }
    if body.max_turns == 0 {
        return error::to_response(&Error::Validation("maxTurns must be at least 1".into()));
    }

    let conversation = Conversation::new(body.topic, body.goal, body.mode, body.max_turns, user_id.clone());
    let id = conversation.conversation_id.clone();
    if let Err(err) = state.store.put(conversation) {
        return error::to_response(&err);
    }
    let _ = state.store.add_user_to_conversation(&user_id, &id);

    (
        axum::http::StatusCode::CREATED,
        Json(CreateConversationResponse {
            conversation_id: id,
            status: ConversationStatus::Pending,
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigBody {
    pub display_name: String,
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub personality: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinConversationRequest {
    pub agent_id: String,
    pub agent_config: AgentConfigBody,
}

/// `POST /conversations/{id}/join`
pub async fn join(
    State(state): State<AppState>,
    axum::Extension(UserId(user_id)): axum::Extension<UserId>,
    Path(conversation_id): Path<String>,
    Json(body): Json<JoinConversationRequest>,
) -> axum::response::Response {
    let mut conversation = match state.store.get(&conversation_id) {
        Ok(c) => c,
        Err(_) => return error::not_found(format!("no such conversation: {conversation_id}")),
    };
    if conversation.status != ConversationStatus::Pending {
        return error::to_response(&Error::Validation(
            "cannot join a conversation that has already started".into(),
        ));
    }
    if conversation.participants.len() >= conclave_domain::model::MAX_PARTICIPANTS {
        return error::to_response(&Error::Validation("conversation is full".into()));
    }

    let Some(provider) = Provider::from_registry_key(&body.agent_config.provider) else {
        return error::to_response(&Error::Validation(format!(
            "unknown provider: {}",
            body.agent_config.provider
        )));
    };

    // Personality folds into the system prompt at ingestion — there's
    // no separate field for it on `Agent`.
    let system_prompt = match (body.agent_config.system_prompt, body.agent_config.personality) {
        (Some(prompt), Some(personality)) => Some(format!("{prompt}\n\n{personality}")),
        (Some(prompt), None) => Some(prompt),
        (None, Some(personality)) => Some(personality),
        (None, None) => None,
    };

    // Join requests never carry a raw API key — only the provider's
    // configured env-var name, which doubles as the opaque handle.
    let api_key_handle = state
        .config
        .providers
        .iter()
        .find(|p| p.provider == provider.registry_key())
        .and_then(|p| p.auth.as_ref())
        .map(|a| a.api_key_env.clone())
        .unwrap_or_else(|| "none".to_string());

    state.agents.insert(Agent {
        agent_id: body.agent_id.clone(),
        user_id: user_id.clone(),
        display_name: body.agent_config.display_name,
        provider,
        model_id: body.agent_config.model_id,
        temperature: 0.7,
        max_tokens: 1024,
        system_prompt,
    });

    conversation
        .participants
        .push(Participant::new(body.agent_id, user_id, api_key_handle));
    if let Err(err) = state.store.put(conversation) {
        return error::to_response(&err);
    }

    axum::http::StatusCode::NO_CONTENT.into_response()
}

/// `POST /conversations/{id}/start`
pub async fn start(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> axum::response::Response {
    let mut conversation = match state.store.get(&conversation_id) {
        Ok(c) => c,
        Err(_) => return error::not_found(format!("no such conversation: {conversation_id}")),
    };
    if conversation.status != ConversationStatus::Pending {
        return error::to_response(&Error::Validation(
            "conversation has already been started".into(),
        ));
    }
    if !conversation.has_valid_participant_count() {
        return error::to_response(&Error::Validation(
            "conversation does not have a valid participant count".into(),
        ));
    }

    conversation.status = ConversationStatus::Active;
    if let Err(err) = state.store.put(conversation) {
        return error::to_response(&err);
    }

    state.control.register(&conversation_id);
    tokio::spawn(crate::orchestrator::run(state.clone(), conversation_id));

    axum::http::StatusCode::ACCEPTED.into_response()
}

/// `GET /conversations/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> axum::response::Response {
    match state.store.get(&conversation_id) {
        Ok(conversation) => Json(conversation).into_response(),
        Err(_) => error::not_found(format!("no such conversation: {conversation_id}")),
    }
}

/// `POST /conversations/{id}/pause`
pub async fn pause(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> axum::response::Response {
    if state.control.pause(&conversation_id) {
        axum::http::StatusCode::NO_CONTENT.into_response()
    } else {
        error::not_found(format!("no active run for conversation: {conversation_id}"))
    }
}

/// `POST /conversations/{id}/resume` — supplement: the spec names
/// `pause`/`cancel`; resuming a paused run needs a symmetric endpoint
/// or the pause is permanent.
pub async fn resume(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> axum::response::Response {
    if state.control.resume(&conversation_id) {
        axum::http::StatusCode::NO_CONTENT.into_response()
    } else {
        error::not_found(format!("no active run for conversation: {conversation_id}"))
    }
}

/// `POST /conversations/{id}/cancel`
pub async fn cancel(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> axum::response::Response {
    if state.control.cancel(&conversation_id) {
        axum::http::StatusCode::NO_CONTENT.into_response()
    } else {
        error::not_found(format!("no active run for conversation: {conversation_id}"))
    }
}

/// `GET /conversations/{id}/events` — supplement: a debug SSE stream
/// of the same `ServerFrame`s live WS observers receive, reusing the
/// connection registry's subscription mechanism with a synthetic
/// session key rather than a second parallel pub/sub system.
pub async fn events_sse(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    let session_id = format!("sse:{}", Uuid::new_v4());
    let (tx, rx) = tokio::sync::mpsc::channel(32);
    state.registry.add(ClientSession {
        user_id: session_id.clone(),
        session_id: session_id.clone(),
        connected_at: chrono::Utc::now(),
        last_ping_at: chrono::Utc::now(),
        sink: tx,
    });
    state.registry.subscribe(&session_id, &conversation_id);

    let stream = make_event_stream(rx);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn make_event_stream(
    mut rx: tokio::sync::mpsc::Receiver<conclave_protocol::ServerFrame>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            let data = serde_json::to_string(&frame).unwrap_or_default();
            yield Ok(Event::default().data(data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AgentDirectory, ControlMap, TicketStore};
    use conclave_domain::config::Config;
    use conclave_domain::store::MemoryConversationStore;
    use conclave_registry::{ConnectionRegistry, PushTokenStore};
    use std::sync::Arc;

    fn make_state() -> AppState {
        let store: Arc<dyn conclave_domain::store::ConversationStore> =
            Arc::new(MemoryConversationStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let push_tokens = Arc::new(PushTokenStore::new());
        let delivery = Arc::new(
            conclave_delivery::DeliveryCoordinator::new(
                registry.clone(),
                push_tokens.clone(),
                conclave_domain::config::PushConfig::default(),
            )
            .unwrap(),
        );
        AppState {
            config: Arc::new(Config::default()),
            store,
            providers: Arc::new(conclave_providers::ProviderRegistry::new()),
            agents: Arc::new(AgentDirectory::new()),
            registry,
            push_tokens,
            delivery,
            control: Arc::new(ControlMap::new()),
            tickets: Arc::new(TicketStore::new()),
        }
    }

    #[tokio::test]
    async fn create_indexes_conversation_under_the_initiator() {
        let state = make_state();
        let create_resp = create(
            State(state.clone()),
            axum::Extension(UserId("user-1".to_string())),
            Json(CreateConversationRequest {
                topic: "topic".into(),
                goal: None,
                mode: ConversationMode::Bts,
                max_turns: 5,
            }),
        )
        .await;
        assert_eq!(create_resp.status(), axum::http::StatusCode::CREATED);

        let conversations = state.store.list_by_user("user-1").unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].topic, "topic");
    }

    #[tokio::test]
    async fn join_rejects_unknown_provider() {
        let state = make_state();
        let convo = Conversation::new("t".into(), None, ConversationMode::Bts, 5, "user-1".into());
        let id = convo.conversation_id.clone();
        state.store.put(convo).unwrap();

        let resp = join(
            State(state),
            axum::Extension(UserId("user-1".to_string())),
            Path(id),
            Json(JoinConversationRequest {
                agent_id: "a1".into(),
                agent_config: AgentConfigBody {
                    display_name: "A1".into(),
                    provider: "carrier-pigeon".into(),
                    model_id: "m".into(),
                    system_prompt: None,
                    personality: None,
                },
            }),
        )
        .await;
        assert_eq!(resp.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_rejects_conversation_with_no_participants() {
        let state = make_state();
        let convo = Conversation::new("t".into(), None, ConversationMode::Bts, 5, "user-1".into());
        let id = convo.conversation_id.clone();
        state.store.put(convo).unwrap();

        let resp = start(State(state), Path(id)).await;
        assert_eq!(resp.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pause_without_a_running_conversation_is_not_found() {
        let state = make_state();
        let resp = pause(State(state), Path("ghost".to_string())).await;
        assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
