//! In-memory registry of connected human-observer sessions and their
//! per-conversation subscriptions, grounded on the teacher's
//! `gateway::nodes::registry::NodeRegistry`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use conclave_protocol::ServerFrame;

/// A frame the gateway can push to a connected observer's transport.
pub type SessionSink = mpsc::Sender<ServerFrame>;

/// A live bidirectional session for one human `userId`.
pub struct ClientSession {
    pub user_id: String,
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_ping_at: DateTime<Utc>,
    pub sink: SessionSink,
}

/// Summary info returned by list/debug endpoints.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub user_id: String,
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_ping_at: DateTime<Utc>,
    pub subscription_count: usize,
}

/// Thread-safe registry of live observer sessions and their
/// per-conversation subscriptions.
///
/// Maintains `userId -> Session` and the reverse `conversationId ->
/// Set<userId>`. All operations are non-blocking.
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, ClientSession>>,
    subscriptions: RwLock<HashMap<String, HashSet<String>>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session. If a prior session exists for this
    /// `user_id`, it is sent a well-defined error frame and replaced
    /// atomically (best-effort close — a full outbound queue or a
    /// sink the reader already dropped is not a registration failure).
    pub fn add(&self, session: ClientSession) {
        let user_id = session.user_id.clone();
        let mut sessions = self.sessions.write();
        if let Some(old) = sessions.get(&user_id) {
            let _ = old.sink.try_send(ServerFrame::error(
                "superseded",
                "a new connection was established for this user",
                Utc::now().timestamp_millis(),
            ));
            tracing::info!(user_id = %user_id, "superseding prior session");
            conclave_domain::trace::TraceEvent::SessionSuperseded {
                user_id: user_id.clone(),
            }
            .emit();
        }
        tracing::info!(user_id = %user_id, session_id = %session.session_id, "session registered");
        sessions.insert(user_id, session);
    }

    /// Remove a session and drop it from every subscription set.
    /// Subscription sets left empty are garbage-collected.
    pub fn remove(&self, user_id: &str) {
        let removed = self.sessions.write().remove(user_id).is_some();
        if !removed {
            return;
        }
        let mut subs = self.subscriptions.write();
        subs.retain(|_, users| {
            users.remove(user_id);
            !users.is_empty()
        });
        tracing::info!(user_id = %user_id, "session removed");
    }

    /// Idempotent: subscribe `user_id` to `conversation_id`.
    pub fn subscribe(&self, user_id: &str, conversation_id: &str) {
        self.subscriptions
            .write()
            .entry(conversation_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    /// Idempotent: unsubscribe `user_id` from `conversation_id`.
    /// Empty subscription sets are garbage-collected.
    pub fn unsubscribe(&self, user_id: &str, conversation_id: &str) {
        let mut subs = self.subscriptions.write();
        if let Some(users) = subs.get_mut(conversation_id) {
            users.remove(user_id);
            if users.is_empty() {
                subs.remove(conversation_id);
            }
        }
    }

    /// Attempt delivery to `user_id`. Returns `true` if the session
    /// exists and the transport accepted the write. On any write
    /// failure the session is removed from the registry.
    pub fn send_to_user(&self, user_id: &str, frame: ServerFrame) -> bool {
        let ok = {
            let sessions = self.sessions.read();
            match sessions.get(user_id) {
                Some(session) => session.sink.try_send(frame).is_ok(),
                None => return false,
            }
        };
        if !ok {
            self.remove(user_id);
        }
        ok
    }

    /// Attempt `send_to_user` for every subscriber of `conversation_id`.
    /// Returns the user ids for which delivery failed.
    pub fn broadcast(&self, conversation_id: &str, frame: ServerFrame) -> Vec<String> {
        let subscribers: Vec<String> = self
            .subscriptions
            .read()
            .get(conversation_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default();

        let mut unreachable = Vec::new();
        for user_id in subscribers {
            if !self.send_to_user(&user_id, frame.clone()) {
                unreachable.push(user_id);
            }
        }
        unreachable
    }

    /// Refresh `last_ping_at` for a session.
    pub fn ping(&self, user_id: &str) {
        if let Some(session) = self.sessions.write().get_mut(user_id) {
            session.last_ping_at = Utc::now();
        }
    }

    /// Evict sessions whose last ping is older than `idle_timeout_secs`.
    pub fn prune_stale(&self, idle_timeout_secs: i64) {
        let now = Utc::now();
        let stale: Vec<String> = self
            .sessions
            .read()
            .values()
            .filter(|s| now.signed_duration_since(s.last_ping_at).num_seconds() >= idle_timeout_secs)
            .map(|s| s.user_id.clone())
            .collect();
        for user_id in &stale {
            self.remove(user_id);
        }
        if !stale.is_empty() {
            tracing::info!(pruned = stale.len(), "pruned idle sessions");
        }
    }

    pub fn is_subscribed(&self, user_id: &str, conversation_id: &str) -> bool {
        self.subscriptions
            .read()
            .get(conversation_id)
            .is_some_and(|users| users.contains(user_id))
    }

    pub fn has_session(&self, user_id: &str) -> bool {
        self.sessions.read().contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let subs = self.subscriptions.read();
        self.sessions
            .read()
            .values()
            .map(|s| SessionInfo {
                user_id: s.user_id.clone(),
                session_id: s.session_id.clone(),
                connected_at: s.connected_at,
                last_ping_at: s.last_ping_at,
                subscription_count: subs
                    .values()
                    .filter(|users| users.contains(&s.user_id))
                    .count(),
            })
            .collect()
    }
}

/// In-memory push-token store: `userId -> PushToken`. Tokens are
/// supplied by an external mobile-registration flow and read-only
/// from this system's perspective past initial ingest.
pub struct PushTokenStore {
    tokens: RwLock<HashMap<String, conclave_domain::model::PushToken>>,
}

impl Default for PushTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PushTokenStore {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, token: conclave_domain::model::PushToken) {
        self.tokens.write().insert(token.user_id.clone(), token);
    }

    pub fn get(&self, user_id: &str) -> Option<conclave_domain::model::PushToken> {
        self.tokens.read().get(user_id).cloned()
    }

    pub fn remove(&self, user_id: &str) {
        self.tokens.write().remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_session(user_id: &str) -> (ClientSession, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(8);
        let session = ClientSession {
            user_id: user_id.to_string(),
            session_id: format!("sess-{user_id}"),
            connected_at: Utc::now(),
            last_ping_at: Utc::now(),
            sink: tx,
        };
        (session, rx)
    }

    #[test]
    fn add_replaces_prior_session_and_notifies_it() {
        let registry = ConnectionRegistry::new();
        let (s1, mut rx1) = make_session("u1");
        registry.add(s1);
        let (s2, _rx2) = make_session("u1");
        registry.add(s2);

        assert_eq!(registry.len(), 1);
        let frame = rx1.try_recv().expect("old session notified");
        match frame {
            ServerFrame::Error { payload, .. } => assert_eq!(payload.code, "superseded"),
            _ => panic!("expected error frame"),
        }
    }

    #[test]
    fn subscribe_and_broadcast_reach_all_subscribers() {
        let registry = ConnectionRegistry::new();
        let (s1, mut rx1) = make_session("u1");
        let (s2, mut rx2) = make_session("u2");
        registry.add(s1);
        registry.add(s2);
        registry.subscribe("u1", "conv1");
        registry.subscribe("u2", "conv1");

        let frame = ServerFrame::pong(Utc::now().timestamp_millis());
        let unreachable = registry.broadcast("conv1", frame);
        assert!(unreachable.is_empty());
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn broadcast_reports_unsubscribed_users_as_unaffected() {
        let registry = ConnectionRegistry::new();
        let (s1, _rx1) = make_session("u1");
        registry.add(s1);
        registry.subscribe("u1", "conv1");
        registry.unsubscribe("u1", "conv1");

        let unreachable = registry.broadcast("conv1", ServerFrame::pong(Utc::now().timestamp_millis()));
        assert!(unreachable.is_empty());
        assert!(!registry.is_subscribed("u1", "conv1"));
    }

    #[test]
    fn send_to_user_false_and_session_removed_on_full_channel() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        // Fill the channel's single slot so the next try_send fails.
        tx.try_send(ServerFrame::pong(Utc::now().timestamp_millis())).unwrap();
        let session = ClientSession {
            user_id: "u1".to_string(),
            session_id: "s1".to_string(),
            connected_at: Utc::now(),
            last_ping_at: Utc::now(),
            sink: tx,
        };
        registry.add(session);

        let ok = registry.send_to_user("u1", ServerFrame::pong(Utc::now().timestamp_millis()));
        assert!(!ok);
        assert!(!registry.has_session("u1"));
    }

    #[test]
    fn remove_garbage_collects_empty_subscription_sets() {
        let registry = ConnectionRegistry::new();
        let (s1, _rx1) = make_session("u1");
        registry.add(s1);
        registry.subscribe("u1", "conv1");
        registry.remove("u1");

        assert!(registry.is_empty());
        assert!(!registry.is_subscribed("u1", "conv1"));
    }

    #[test]
    fn prune_stale_evicts_sessions_past_idle_threshold() {
        let registry = ConnectionRegistry::new();
        let (mut session, _rx) = make_session("u1");
        session.last_ping_at = Utc::now() - chrono::Duration::seconds(120);
        registry.add(session);

        registry.prune_stale(90);
        assert!(registry.is_empty());
    }

    #[test]
    fn ping_refreshes_last_ping_at() {
        let registry = ConnectionRegistry::new();
        let (mut session, _rx) = make_session("u1");
        session.last_ping_at = Utc::now() - chrono::Duration::seconds(120);
        registry.add(session);

        registry.ping("u1");
        registry.prune_stale(90);
        assert!(registry.has_session("u1"));
    }

    #[test]
    fn push_token_store_round_trips() {
        use conclave_domain::model::{PushEnvironment, PushToken};
        let store = PushTokenStore::new();
        store.set(PushToken {
            user_id: "u1".to_string(),
            device_token: "dev-abc".to_string(),
            environment: PushEnvironment::Production,
        });
        assert!(store.get("u1").is_some());
        store.remove("u1");
        assert!(store.get("u1").is_none());
    }
}
