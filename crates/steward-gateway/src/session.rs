//! Conversation session management
//!
//! In-memory conversation history keyed by conversation id. History is
//! capped per conversation; the knowledge store is the durable memory,
//! this is just the working transcript the LLM collaborator sees.

use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use steward_core::{now, Timestamp};

use crate::llm::ChatMessage;

/// Maximum messages retained per conversation
const MAX_TURNS: usize = 40;

/// One live conversation
#[derive(Debug, Clone)]
pub struct Conversation {
    /// Conversation id
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// Transcript, oldest first
    pub messages: Vec<ChatMessage>,
    /// Creation time
    pub created_at: Timestamp,
    /// Last activity
    pub updated_at: Timestamp,
}

/// In-memory conversation registry
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: RwLock<HashMap<Uuid, Conversation>>,
}

impl ConversationStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an existing conversation for this user or start a new one.
    /// A stale or foreign id starts a fresh conversation rather than
    /// leaking another user's transcript.
    pub fn get_or_create(&self, user_id: &str, conversation_id: Option<Uuid>) -> Uuid {
        let mut conversations = self.conversations.write();

        if let Some(id) = conversation_id {
            if conversations
                .get(&id)
                .is_some_and(|c| c.user_id == user_id)
            {
                return id;
            }
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            messages: Vec::new(),
            created_at: now(),
            updated_at: now(),
        };
        let id = conversation.id;
        conversations.insert(id, conversation);
        id
    }

    /// Append a message, trimming the transcript to the cap
    pub fn append(&self, conversation_id: Uuid, message: ChatMessage) {
        let mut conversations = self.conversations.write();
        if let Some(conversation) = conversations.get_mut(&conversation_id) {
            conversation.messages.push(message);
            if conversation.messages.len() > MAX_TURNS {
                let excess = conversation.messages.len() - MAX_TURNS;
                conversation.messages.drain(..excess);
            }
            conversation.updated_at = now();
        }
    }

    /// Current transcript for a conversation
    pub fn history(&self, conversation_id: Uuid) -> Vec<ChatMessage> {
        self.conversations
            .read()
            .get(&conversation_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// Number of live conversations
    pub fn len(&self) -> usize {
        self.conversations.read().len()
    }

    /// Whether no conversations exist
    pub fn is_empty(&self) -> bool {
        self.conversations.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_conversation_per_user() {
        let store = ConversationStore::new();
        let id = store.get_or_create("owner-1", None);
        assert_eq!(store.get_or_create("owner-1", Some(id)), id);
        // Another user presenting the same id gets a fresh conversation
        assert_ne!(store.get_or_create("owner-2", Some(id)), id);
    }

    #[test]
    fn test_history_appends_in_order() {
        let store = ConversationStore::new();
        let id = store.get_or_create("owner-1", None);

        store.append(id, ChatMessage::user("rent status?"));
        store.append(id, ChatMessage::assistant("two tenancies overdue"));

        let history = store.history(id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
    }

    #[test]
    fn test_transcript_is_capped() {
        let store = ConversationStore::new();
        let id = store.get_or_create("owner-1", None);

        for i in 0..(MAX_TURNS + 10) {
            store.append(id, ChatMessage::user(format!("message {i}")));
        }

        let history = store.history(id);
        assert_eq!(history.len(), MAX_TURNS);
        assert_eq!(history[0].content, "message 10");
    }
}
