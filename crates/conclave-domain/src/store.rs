//! `ConversationStore`: the persistence boundary named as out-of-scope
//! external collaborator in the spec. This crate ships only the
//! in-memory implementation; a networked one is a drop-in.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::model::Conversation;

/// CRUD + per-user index over conversations.
///
/// Implementations must be safe to share across conversation tasks
/// (`Send + Sync`); the orchestrator holds one `Arc<dyn
/// ConversationStore>` for the process lifetime.
pub trait ConversationStore: Send + Sync {
    fn get(&self, conversation_id: &str) -> Result<Conversation>;
    fn put(&self, conversation: Conversation) -> Result<()>;
    fn list_by_user(&self, user_id: &str) -> Result<Vec<Conversation>>;
    fn add_user_to_conversation(&self, user_id: &str, conversation_id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct Inner {
    conversations: HashMap<String, Conversation>,
    by_user: HashMap<String, Vec<String>>,
}

/// In-memory `ConversationStore`. No TTL eviction — the spec's 7-day
/// TTL is a property of a networked backend, not this reference one.
#[derive(Debug, Default, Clone)]
pub struct MemoryConversationStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for MemoryConversationStore {
    fn get(&self, conversation_id: &str) -> Result<Conversation> {
        self.inner
            .read()
            .conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("no such conversation: {conversation_id}")))
    }

    fn put(&self, conversation: Conversation) -> Result<()> {
        self.inner
            .write()
            .conversations
            .insert(conversation.conversation_id.clone(), conversation);
        Ok(())
    }

    fn list_by_user(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let inner = self.inner.read();
        let ids = inner.by_user.get(user_id).cloned().unwrap_or_default();
        Ok(ids
            .into_iter()
            .filter_map(|id| inner.conversations.get(&id).cloned())
            .collect())
    }

    fn add_user_to_conversation(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner.by_user.entry(user_id.to_string()).or_default();
        if !entry.iter().any(|id| id == conversation_id) {
            entry.push(conversation_id.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Conversation, ConversationMode};

    fn sample() -> Conversation {
        Conversation::new(
            "topic".into(),
            None,
            ConversationMode::Bts,
            10,
            "user-1".into(),
        )
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = MemoryConversationStore::new();
        let convo = sample();
        let id = convo.conversation_id.clone();
        store.put(convo).unwrap();
        let fetched = store.get(&id).unwrap();
        assert_eq!(fetched.conversation_id, id);
    }

    #[test]
    fn get_missing_conversation_errors() {
        let store = MemoryConversationStore::new();
        assert!(store.get("does-not-exist").is_err());
    }

    #[test]
    fn list_by_user_reflects_index() {
        let store = MemoryConversationStore::new();
        let convo = sample();
        let id = convo.conversation_id.clone();
        store.put(convo).unwrap();
        store.add_user_to_conversation("user-1", &id).unwrap();
        store.add_user_to_conversation("user-1", &id).unwrap();
        let listed = store.list_by_user("user-1").unwrap();
        assert_eq!(listed.len(), 1);
    }
}
