//! In-memory arena store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::{ContentPart, Conversation, Message};
use crate::store::MessageStore;

#[derive(Default)]
struct Arena {
    messages: HashMap<Uuid, Message>,
    conversations: HashMap<Uuid, Conversation>,
}

/// Id-indexed in-memory store. All rows live in flat maps behind one lock;
/// each operation takes the lock once, so single-row updates are atomic.
#[derive(Default)]
pub struct MemoryStore {
    arena: Mutex<Arena>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let arena = self.arena.lock().await;
        Ok(arena.messages.get(&id).cloned())
    }

    async fn create_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut arena = self.arena.lock().await;
        if arena.messages.contains_key(&message.id) {
            return Err(StoreError::Conflict {
                entity: "message".into(),
                id: message.id,
            });
        }
        arena.messages.insert(message.id, message.clone());
        debug!(id = %message.id, role = ?message.role, "Message inserted");
        Ok(())
    }

    async fn update_message_content(
        &self,
        id: Uuid,
        content: Vec<ContentPart>,
        reasoning: Option<String>,
    ) -> Result<Message, StoreError> {
        let mut arena = self.arena.lock().await;
        let message = arena.messages.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "message".into(),
            id,
        })?;
        message.content = content;
        message.reasoning = reasoning;
        message.updated_at = Utc::now();
        debug!(id = %id, "Message content updated");
        Ok(message.clone())
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let arena = self.arena.lock().await;
        let mut messages: Vec<Message> = arena
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        let arena = self.arena.lock().await;
        Ok(arena.conversations.get(&id).cloned())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut arena = self.arena.lock().await;
        if arena.conversations.contains_key(&conversation.id) {
            return Err(StoreError::Conflict {
                entity: "conversation".into(),
                id: conversation.id,
            });
        }
        arena.conversations.insert(conversation.id, conversation.clone());
        debug!(id = %conversation.id, "Conversation inserted");
        Ok(())
    }

    async fn update_conversation_title(&self, id: Uuid, title: &str) -> Result<(), StoreError> {
        let mut arena = self.arena.lock().await;
        let conversation = arena
            .conversations
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "conversation".into(),
                id,
            })?;
        conversation.title = title.to_string();
        conversation.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[tokio::test]
    async fn create_and_get_message() {
        let store = MemoryStore::new();
        let msg = Message::user(Uuid::new_v4(), "hello", None);
        store.create_message(&msg).await.unwrap();

        let loaded = store.get_message(msg.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, msg.id);
        assert_eq!(loaded.text(), "hello");
        assert_eq!(loaded.role, Role::User);
    }

    #[tokio::test]
    async fn duplicate_message_id_conflicts() {
        let store = MemoryStore::new();
        let msg = Message::user(Uuid::new_v4(), "hello", None);
        store.create_message(&msg).await.unwrap();

        let result = store.create_message(&msg).await;
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn update_overwrites_content_and_reasoning_in_place() {
        let store = MemoryStore::new();
        let conv_id = Uuid::new_v4();
        let parent = Uuid::new_v4();
        let msg = Message::assistant_placeholder(conv_id, "\u{2026}", Some(parent));
        store.create_message(&msg).await.unwrap();

        let updated = store
            .update_message_content(
                msg.id,
                vec![ContentPart::text("the real reply")],
                Some("because reasons".into()),
            )
            .await
            .unwrap();

        assert_eq!(updated.id, msg.id);
        assert_eq!(updated.text(), "the real reply");
        assert_eq!(updated.reasoning.as_deref(), Some("because reasons"));
        // Parent back-reference never changes.
        assert_eq!(updated.parent_message_id, Some(parent));
        assert!(updated.updated_at >= msg.updated_at);
    }

    #[tokio::test]
    async fn update_missing_message_is_not_found() {
        let store = MemoryStore::new();
        let result = store
            .update_message_content(Uuid::new_v4(), vec![ContentPart::text("x")], None)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_messages_is_chronological_and_scoped() {
        let store = MemoryStore::new();
        let conv_a = Uuid::new_v4();
        let conv_b = Uuid::new_v4();

        let m1 = Message::user(conv_a, "first", None);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let m2 = Message::user(conv_a, "second", Some(m1.id));
        let other = Message::user(conv_b, "elsewhere", None);

        store.create_message(&m2).await.unwrap();
        store.create_message(&other).await.unwrap();
        store.create_message(&m1).await.unwrap();

        let listed = store.list_messages(conv_a).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, m1.id);
        assert_eq!(listed[1].id, m2.id);
    }

    #[tokio::test]
    async fn conversation_title_update() {
        let store = MemoryStore::new();
        let conv = Conversation::new(crate::message::PLACEHOLDER_TITLE);
        store.create_conversation(&conv).await.unwrap();

        store
            .update_conversation_title(conv.id, "Rust questions")
            .await
            .unwrap();

        let loaded = store.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Rust questions");
        assert!(!loaded.has_placeholder_title());
    }
}
