//! Conversation and message data model.
//!
//! Messages form a forest per conversation: each message carries an optional
//! `parent_message_id` back-reference by id (never a live pointer), so
//! ancestor walks are explicit iterative lookups against the store. A
//! message's parent, once set, never changes; regenerating a reply overwrites
//! the existing assistant message in place rather than creating a new node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One part of a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },

    /// An image reference. Dimensions are optional; token estimation assumes
    /// a fixed size when they are missing.
    Image {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },

    /// A citation attached to an assistant reply.
    Citation {
        title: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        snippet: Option<String>,
    },

    /// A tool invocation recorded in the transcript.
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },

    /// An attachment uploaded for this message. May carry extracted inline
    /// text (e.g. from a text or PDF file).
    TemporaryFile {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

impl ContentPart {
    /// Convenience constructor for a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    /// Ordered content parts.
    pub content: Vec<ContentPart>,
    /// Model reasoning text, if the backend emitted any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Back-reference to the message this one replies to. `None` for roots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Create a user message with a single text part.
    pub fn user(conversation_id: Uuid, text: impl Into<String>, parent: Option<Uuid>) -> Self {
        Self::new(conversation_id, Role::User, vec![ContentPart::text(text)], parent)
    }

    /// Create an assistant placeholder message. The marker must be non-empty
    /// since empty text means "absent".
    pub fn assistant_placeholder(
        conversation_id: Uuid,
        marker: &str,
        parent: Option<Uuid>,
    ) -> Self {
        debug_assert!(!marker.is_empty());
        Self::new(
            conversation_id,
            Role::Assistant,
            vec![ContentPart::text(marker)],
            parent,
        )
    }

    fn new(
        conversation_id: Uuid,
        role: Role,
        content: Vec<ContentPart>,
        parent: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content,
            reasoning: None,
            parent_message_id: parent,
            created_at: now,
            updated_at: now,
        }
    }

    /// Concatenated text of all plain-text parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if let ContentPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// Default title assigned to a conversation before one is generated.
pub const PLACEHOLDER_TITLE: &str = "New conversation";

/// A conversation grouping a forest of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    /// Model selection override for this conversation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    /// Free-form settings blob.
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            project_id: None,
            model_override: None,
            settings: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the title is still the untouched placeholder.
    pub fn has_placeholder_title(&self) -> bool {
        self.title == PLACEHOLDER_TITLE || self.title.is_empty()
    }
}
