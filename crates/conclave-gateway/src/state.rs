//! Shared application state and the two small process-wide registries
//! that have no direct teacher analogue (`TicketStore`, `AgentDirectory`).
//!
//! Grounded on the teacher's flat `#[derive(Clone)] AppState` of `Arc<...>`
//! services grouped by concern (`gateway::state::AppState`).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use conclave_delivery::DeliveryCoordinator;
use conclave_domain::config::Config;
use conclave_domain::model::Agent;
use conclave_domain::store::ConversationStore;
use conclave_providers::ProviderRegistry;
use conclave_registry::{ConnectionRegistry, PushTokenStore};

/// A per-conversation pause/cancel signal, checked by the orchestrator
/// task at its next safe point between turn rounds.
///
/// Simplified from the teacher's `runtime::cancel::CancelToken` by
/// dropping the cascading parent/child group feature (no nested
/// sub-agent runs in this system) and adding a `paused` flag alongside
/// `cancelled`, since conversations support both semantics.
#[derive(Clone)]
pub struct ControlToken {
    cancelled: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl ControlToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

impl Default for ControlToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks one [`ControlToken`] per running conversation.
pub struct ControlMap {
    tokens: RwLock<HashMap<String, ControlToken>>,
}

impl Default for ControlMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlMap {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Create and register a fresh token for `conversation_id`,
    /// replacing any stale one left over from a prior run.
    pub fn register(&self, conversation_id: &str) -> ControlToken {
        let token = ControlToken::new();
        self.tokens
            .write()
            .insert(conversation_id.to_string(), token.clone());
        token
    }

    pub fn get(&self, conversation_id: &str) -> Option<ControlToken> {
        self.tokens.read().get(conversation_id).cloned()
    }

    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.tokens.read().get(conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn pause(&self, conversation_id: &str) -> bool {
        match self.tokens.read().get(conversation_id) {
            Some(token) => {
                token.pause();
                true
            }
            None => false,
        }
    }

    pub fn resume(&self, conversation_id: &str) -> bool {
        match self.tokens.read().get(conversation_id) {
            Some(token) => {
                token.resume();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, conversation_id: &str) {
        self.tokens.write().remove(conversation_id);
    }
}

/// Single-use, short-lived tickets exchanged for a `userId` at WS
/// upgrade time — no direct teacher analogue (the teacher authenticates
/// node sockets with a static pre-shared token, not a single-use
/// ticket); shaped like the registry's other `RwLock<HashMap<...>>`
/// stores.
pub struct TicketStore {
    tickets: RwLock<HashMap<String, (String, DateTime<Utc>)>>,
}

impl Default for TicketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketStore {
    pub fn new() -> Self {
        Self {
            tickets: RwLock::new(HashMap::new()),
        }
    }

    pub fn issue(&self, user_id: &str, ttl_ms: u64) -> String {
        let ticket = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + chrono::Duration::milliseconds(ttl_ms as i64);
        self.tickets
            .write()
            .insert(ticket.clone(), (user_id.to_string(), expires_at));
        ticket
    }

    /// Consume a ticket: single-use (removed on any lookup) and valid
    /// only if not yet expired.
    pub fn consume(&self, ticket: &str) -> Option<String> {
        let (user_id, expires_at) = self.tickets.write().remove(ticket)?;
        if Utc::now() > expires_at {
            None
        } else {
            Some(user_id)
        }
    }
}

/// In-memory cache of `Agent` records supplied inline by `POST
/// /conversations/{id}/join`. `Agent` is owned by external persistence
/// per the data model; this is a thin read-through cache of what join
/// requests have told us, not a system of record.
pub struct AgentDirectory {
    agents: RwLock<HashMap<String, Agent>>,
}

impl Default for AgentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, agent: Agent) {
        self.agents.write().insert(agent.agent_id.clone(), agent);
    }

    pub fn get(&self, agent_id: &str) -> Option<Agent> {
        self.agents.read().get(agent_id).cloned()
    }
}

/// Which human `userId`s should receive a turn's output: currently the
/// set of conversation participants' owning users.
pub fn participant_user_ids(participants: &[conclave_domain::model::Participant]) -> Vec<String> {
    let mut seen = HashSet::new();
    participants
        .iter()
        .filter(|p| seen.insert(p.user_id.clone()))
        .map(|p| p.user_id.clone())
        .collect()
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ConversationStore>,
    pub providers: Arc<ProviderRegistry>,
    pub agents: Arc<AgentDirectory>,
    pub registry: Arc<ConnectionRegistry>,
    pub push_tokens: Arc<PushTokenStore>,
    pub delivery: Arc<DeliveryCoordinator>,
    pub control: Arc<ControlMap>,
    pub tickets: Arc<TicketStore>,
}
