//! Conversation persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::models::{pair_key, ChatMessage, Conversation};

/// Writes are idempotent on ids, so redelivered events are harmless.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Store the conversation unless one with the same id exists. `true`
    /// when this call created it.
    async fn create_conversation_if_absent(&self, conversation: &Conversation) -> Result<bool, AppError>;

    /// Direct conversation between two users, in either order.
    async fn find_conversation(&self, a: &str, b: &str) -> Result<Option<Conversation>, AppError>;

    /// Append unless a message with the same id exists and touch the
    /// conversation. `true` when this call stored it.
    async fn append_message(&self, message: &ChatMessage) -> Result<bool, AppError>;

    /// Messages of a conversation, oldest first.
    async fn messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

#[derive(Default)]
struct ChatState {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, ChatMessage>,
}

#[derive(Default)]
pub struct InMemoryChatStore {
    state: Mutex<ChatState>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn touch(conversation: &mut Conversation, at: DateTime<Utc>) {
    if at > conversation.updated_utc {
        conversation.updated_utc = at;
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn create_conversation_if_absent(&self, conversation: &Conversation) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.conversations.contains_key(&conversation.conversation_id) {
            return Ok(false);
        }
        state
            .conversations
            .insert(conversation.conversation_id.clone(), conversation.clone());
        Ok(true)
    }

    async fn find_conversation(&self, a: &str, b: &str) -> Result<Option<Conversation>, AppError> {
        Ok(self.state.lock().await.conversations.get(&pair_key(a, b)).cloned())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.messages.contains_key(&message.message_id) {
            return Ok(false);
        }
        state
            .messages
            .insert(message.message_id.clone(), message.clone());
        if let Some(conversation) = state.conversations.get_mut(&message.conversation_id) {
            touch(conversation, message.created_utc);
        }
        Ok(true)
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        let state = self.state.lock().await;
        let mut messages: Vec<ChatMessage> = state
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_utc.cmp(&b.created_utc));
        Ok(messages)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_are_idempotent() {
        let store = InMemoryChatStore::new();
        let now = Utc::now();
        let conversation = Conversation::direct(("u1", "buyer"), ("u2", "seller"), now);

        assert!(store.create_conversation_if_absent(&conversation).await.unwrap());
        assert!(!store.create_conversation_if_absent(&conversation).await.unwrap());
        assert!(store.find_conversation("u2", "u1").await.unwrap().is_some());

        let message = ChatMessage::system(&conversation.conversation_id, "e1", "hello".into(), now);
        assert!(store.append_message(&message).await.unwrap());
        assert!(!store.append_message(&message).await.unwrap());
        assert_eq!(store.messages(&conversation.conversation_id).await.unwrap().len(), 1);
    }
}
