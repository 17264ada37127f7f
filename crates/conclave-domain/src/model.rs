//! Core data model: Agent, Conversation, Participant, Message, Bid,
//! Client Session, Push Token.
//!
//! These are the wire-and-storage types shared by every Conclave
//! crate; they carry no behavior beyond small constructors and the
//! invariant-preserving helpers that belong next to the data.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The provider backing an [`Agent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Claude,
    OpenAi,
    Gemini,
    Groq,
    Mock,
}

impl Provider {
    /// The provider-registry string this variant resolves to; matches
    /// the `provider` field applications put in `ProviderConfig`.
    pub fn registry_key(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::Groq => "groq",
            Provider::Mock => "mock",
        }
    }

    /// Inverse of [`Provider::registry_key`], used by the HTTP layer
    /// to parse the `provider` string a join request carries (which
    /// is the registry string, not this type's snake_case wire form).
    pub fn from_registry_key(key: &str) -> Option<Self> {
        match key {
            "claude" => Some(Provider::Claude),
            "openai" => Some(Provider::OpenAi),
            "gemini" => Some(Provider::Gemini),
            "groq" => Some(Provider::Groq),
            "mock" => Some(Provider::Mock),
            _ => None,
        }
    }
}

/// An AI participant definition, owned by external persistence.
///
/// `Agent` is polymorphic over the capability set (generate a turn
/// response, generate bid scores, self-health-check) via the
/// `ProviderAdapter` trait in `conclave-providers`; this struct is only
/// the configuration record, not the adapter instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub agent_id: String,
    pub user_id: String,
    pub display_name: String,
    pub provider: Provider,
    pub model_id: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    /// Behind-the-scenes: agents see each other's full turns.
    Bts,
    /// Campfire: a looser, social framing of the same turn loop.
    Campfire,
    /// Solo: a single agent holds the floor; bidding always trivially
    /// resolves to that agent (still runs through the same engine so
    /// fairness bookkeeping and context stay uniform).
    Solo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Cancelled,
}

/// Minimum and maximum participant counts, shared by validation and
/// by the HTTP layer's request checks.
pub const MIN_PARTICIPANTS: usize = 1;
pub const MAX_PARTICIPANTS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: String,
    pub topic: String,
    #[serde(default)]
    pub goal: Option<String>,
    pub mode: ConversationMode,
    pub max_turns: u32,
    pub status: ConversationStatus,
    pub current_turn: u32,
    pub participants: Vec<Participant>,
    pub messages: Vec<TurnMessage>,
    pub initiator_user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(
        topic: String,
        goal: Option<String>,
        mode: ConversationMode,
        max_turns: u32,
        initiator_user_id: String,
    ) -> Self {
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            topic,
            goal,
            mode,
            max_turns,
            status: ConversationStatus::Pending,
            current_turn: 0,
            participants: Vec::new(),
            messages: Vec::new(),
            initiator_user_id,
            created_at: Utc::now(),
        }
    }

    /// `true` once `participants.len()` is within the legal range.
    pub fn has_valid_participant_count(&self) -> bool {
        (MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&self.participants.len())
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.agent_id.clone()).collect()
    }

    pub fn find_participant(&self, agent_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.agent_id == agent_id)
    }

    pub fn find_participant_mut(&mut self, agent_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.agent_id == agent_id)
    }

    /// Append a completed turn's message, bumping `current_turn`.
    ///
    /// Callers must have already validated `message.turn_number ==
    /// self.current_turn + 1` — this only performs the append + bump,
    /// kept atomic by the orchestrator's single-task-per-conversation
    /// discipline rather than a lock here.
    pub fn append_message(&mut self, message: TurnMessage) {
        self.current_turn = message.turn_number;
        self.messages.push(message);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Participant
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantStats {
    pub turns_taken: u32,
    pub tokens_used: u64,
    pub avg_bid_score: f64,
    #[serde(default)]
    pub last_spoke_at: Option<DateTime<Utc>>,
}

impl ParticipantStats {
    /// Fold in a newly-completed turn's bid score and token usage.
    pub fn record_turn(&mut self, bid_score: f64, tokens: u64, at: DateTime<Utc>) {
        let n = self.turns_taken as f64;
        self.avg_bid_score = (self.avg_bid_score * n + bid_score) / (n + 1.0);
        self.turns_taken += 1;
        self.tokens_used += tokens;
        self.last_spoke_at = Some(at);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub participant_id: String,
    pub agent_id: String,
    pub user_id: String,
    /// Opaque handle into the external secret store; never the raw key.
    pub api_key_handle: String,
    #[serde(default)]
    pub stats: ParticipantStats,
    /// Set once the conversation's first message is emitted; a
    /// `Participant` must not be mutated (beyond `stats`) afterward.
    #[serde(default)]
    pub joined_before_first_turn: bool,
}

impl Participant {
    pub fn new(agent_id: String, user_id: String, api_key_handle: String) -> Self {
        Self {
            participant_id: Uuid::new_v4().to_string(),
            agent_id,
            user_id,
            api_key_handle,
            stats: ParticipantStats::default(),
            joined_before_first_turn: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message (one completed turn)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An immutable record of one completed turn.
///
/// Named `TurnMessage` (rather than `Message`) to keep it distinct
/// from the provider-facing chat message type in `conclave-providers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub turn_number: u32,
    pub agent_id: String,
    pub agent_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
}

impl TurnMessage {
    pub fn new(
        conversation_id: String,
        turn_number: u32,
        agent_id: String,
        agent_name: String,
        content: String,
        input_tokens: u32,
        output_tokens: u32,
        latency_ms: u64,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            conversation_id,
            turn_number,
            agent_id,
            agent_name,
            content,
            created_at: Utc::now(),
            input_tokens,
            output_tokens,
            latency_ms,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bid
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The four self-reported utility scores, each clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidScores {
    pub relevance: f64,
    pub confidence: f64,
    pub novelty: f64,
    pub urgency: f64,
}

impl BidScores {
    /// Clamp every field into `[0, 1]`. Called on ingest, per the
    /// spec's "score fields clamped to [0,1] on ingest" invariant.
    pub fn clamped(self) -> Self {
        Self {
            relevance: self.relevance.clamp(0.0, 1.0),
            confidence: self.confidence.clamp(0.0, 1.0),
            novelty: self.novelty.clamp(0.0, 1.0),
            urgency: self.urgency.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum BidDecision {
    Bid,
    Pass,
    Defer { target_agent_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub bid_id: String,
    pub conversation_id: String,
    pub turn_number: u32,
    pub agent_id: String,
    pub scores: BidScores,
    pub decision: BidDecision,
    pub submitted_at: DateTime<Utc>,
}

impl Bid {
    pub fn new(
        conversation_id: String,
        turn_number: u32,
        agent_id: String,
        scores: BidScores,
        decision: BidDecision,
    ) -> Self {
        Self {
            bid_id: Uuid::new_v4().to_string(),
            conversation_id,
            turn_number,
            agent_id,
            scores: scores.clamped(),
            decision,
            submitted_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CompactContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry in `CompactContext::last` — the rolling window of recent
/// turns kept verbatim (as a key point) instead of folded into `sum`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPoint {
    pub turn_number: u32,
    pub agent_id: String,
    pub key_point: String,
}

/// The per-conversation working memory fed to every agent call.
///
/// Owned exclusively by the orchestrator for the conversation's active
/// lifetime; `conclave-context` supplies the pure functions that
/// transform it, it holds no state of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactContext {
    pub conversation_id: String,
    pub current_turn: u32,
    pub sum: String,
    pub last: Vec<KeyPoint>,
    pub topic: String,
    pub goal: Option<String>,
    pub participant_ids: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client Session / Push Token
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A live bidirectional transport session for one human `user_id`.
///
/// The registry (not this struct) enforces "at most one active
/// session per user_id"; this is a plain value tracked by it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user_id: String,
    pub subscriptions: HashSet<String>,
    pub connected_at: DateTime<Utc>,
    pub last_ping_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushEnvironment {
    Production,
    Sandbox,
}

/// A `(user_id, device_token, environment)` triple used by the
/// Delivery Coordinator when no session is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushToken {
    pub user_id: String,
    pub device_token: String,
    pub environment: PushEnvironment,
}
