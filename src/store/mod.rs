//! Message persistence — trait seam plus the in-memory arena implementation.
//!
//! Conversations own a forest of messages; both live in flat id-indexed maps
//! so ancestor walks are plain lookups and nothing holds live cross-message
//! pointers.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::{ContentPart, Conversation, Message};

/// Backend-agnostic message store. Updates to a single message must be
/// atomic with respect to concurrent readers.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Get a message by id.
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError>;

    /// Insert a new message. Fails on id conflict.
    async fn create_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Overwrite a message's content and reasoning in place.
    /// `reasoning: None` clears any previous reasoning.
    async fn update_message_content(
        &self,
        id: Uuid,
        content: Vec<ContentPart>,
        reasoning: Option<String>,
    ) -> Result<Message, StoreError>;

    /// List all messages in a conversation, oldest first.
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError>;

    /// Get a conversation by id.
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError>;

    /// Insert a new conversation. Fails on id conflict.
    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Replace a conversation's title.
    async fn update_conversation_title(&self, id: Uuid, title: &str) -> Result<(), StoreError>;
}
