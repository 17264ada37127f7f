use serde::Serialize;

/// Structured trace events emitted across all Conclave crates.
///
/// These are logged (not collected into any in-process ring buffer);
/// `emit` is the single choke point so log shape stays consistent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    BidCollected {
        conversation_id: String,
        turn_number: u32,
        agent_id: String,
        decision: String,
    },
    BidTimedOut {
        conversation_id: String,
        turn_number: u32,
        agent_id: String,
    },
    TurnWon {
        conversation_id: String,
        turn_number: u32,
        agent_id: String,
        final_score: f64,
        tie_break: Option<String>,
    },
    TurnCompleted {
        conversation_id: String,
        turn_number: u32,
        agent_id: String,
        duration_ms: u64,
        input_tokens: u32,
        output_tokens: u32,
    },
    TurnSkipped {
        conversation_id: String,
        turn_number: u32,
        reason: String,
    },
    ContextCompacted {
        conversation_id: String,
        current_turn: u32,
        summary_chars: usize,
    },
    DeliveryResult {
        conversation_id: String,
        message_id: String,
        user_id: String,
        via: String,
    },
    SessionSuperseded {
        user_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "conclave_event");
    }
}
