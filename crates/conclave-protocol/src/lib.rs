//! Wire frames for the bidirectional human-observer session protocol.
//!
//! Mirrors the node-handshake envelope shape (`#[serde(tag = "type")]`,
//! one variant per frame kind) but adapted from node registration to
//! ticket-authenticated observer sessions; fields are `camelCase` on
//! the wire to match the browser/mobile clients on the other end.

use conclave_domain::model::{BidScores, TurnMessage};
use serde::{Deserialize, Serialize};

/// Server → client frame. `conversation_id`/`timestamp` are top-level
/// per the envelope; `payload` carries the frame-specific body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected {
        payload: ConnectedPayload,
        timestamp: i64,
    },
    ConversationUpdate {
        conversation_id: String,
        payload: ConversationUpdate,
        timestamp: i64,
    },
    Typing {
        conversation_id: String,
        payload: TypingPayload,
        timestamp: i64,
    },
    Pong {
        payload: PongPayload,
        timestamp: i64,
    },
    Error {
        payload: ErrorPayload,
        timestamp: i64,
    },
}

impl ServerFrame {
    pub fn connected(session_id: impl Into<String>, now_ms: i64) -> Self {
        Self::Connected {
            payload: ConnectedPayload {
                session_id: session_id.into(),
            },
            timestamp: now_ms,
        }
    }

    pub fn pong(now_ms: i64) -> Self {
        Self::Pong {
            payload: PongPayload {},
            timestamp: now_ms,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>, now_ms: i64) -> Self {
        Self::Error {
            payload: ErrorPayload {
                code: code.into(),
                message: message.into(),
            },
            timestamp: now_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongPayload {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub agent_id: String,
}

/// The nested `conversation_update` payload kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationUpdate {
    ConversationStart {
        topic: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        goal: Option<String>,
        #[serde(rename = "participantIds")]
        participant_ids: Vec<String>,
    },
    TurnStart {
        turn_number: u32,
        agent_id: String,
    },
    Message {
        message: TurnMessage,
    },
    ConversationEnd {
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Client → server frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping {
        #[serde(default)]
        payload: EmptyPayload,
    },
    Subscribe {
        payload: SubscribePayload,
    },
    Unsubscribe {
        payload: SubscribePayload,
    },
    Typing {
        payload: SubscribePayload,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    pub conversation_id: String,
}

/// A balanced, self-reported bid frame submitted by a provider adapter
/// during bid collection (internal wire between the orchestrator and
/// the adapter invocation, not exposed to human observers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidFrame {
    pub agent_id: String,
    pub scores: BidScores,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_frame_serializes_with_snake_case_type_tag() {
        let frame = ServerFrame::connected("sess-1", 1000);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["payload"]["sessionId"], "sess-1");
    }

    #[test]
    fn conversation_update_message_round_trips() {
        let message = TurnMessage::new(
            "c1".into(),
            1,
            "a1".into(),
            "Agent One".into(),
            "hi".into(),
            10,
            5,
            100,
        );
        let frame = ServerFrame::ConversationUpdate {
            conversation_id: "c1".into(),
            payload: ConversationUpdate::Message { message },
            timestamp: 1234,
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        match back {
            ServerFrame::ConversationUpdate { conversation_id, .. } => {
                assert_eq!(conversation_id, "c1");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn client_subscribe_frame_parses() {
        let raw = r#"{"type":"subscribe","payload":{"conversationId":"c1"}}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ClientFrame::Subscribe { payload } => assert_eq!(payload.conversation_id, "c1"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn client_ping_frame_parses_without_payload() {
        let raw = r#"{"type":"ping"}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        assert!(matches!(frame, ClientFrame::Ping { .. }));
    }
}
