//! Error types for the streaming core.

use uuid::Uuid;

use crate::message::Role;
use crate::stream::lifecycle::ReplyPhase;

/// Top-level error type for the streaming pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),
}

/// Configuration-related errors. These are fatal: the backend is unusable
/// and nothing in this core retries them.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Message store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: Uuid },

    #[error("Conflict: {entity} with id {id} already exists")]
    Conflict { entity: String, id: Uuid },

    #[error("Query failed: {0}")]
    Query(String),
}

/// AI backend errors. Retry policy belongs to the backend collaborator,
/// not to this core — these surface through the Errored terminal state.
/// Clone so backends can replay scripted event sequences.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Backend request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Backend rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Stream interrupted: {reason}")]
    StreamInterrupted { reason: String },
}

/// Generation lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Message {id} not found")]
    MessageNotFound { id: Uuid },

    #[error("Conversation {id} not found")]
    ConversationNotFound { id: Uuid },

    #[error("Message {id} has role {role:?}, expected assistant")]
    RoleMismatch { id: Uuid, role: Role },

    #[error("Reply {id} already in phase {phase:?}, cannot transition to {target:?}")]
    InvalidTransition {
        id: Uuid,
        phase: ReplyPhase,
        target: ReplyPhase,
    },

    #[error("Reply {id} generation was superseded by a newer one")]
    Superseded { id: Uuid },
}

/// Result type alias for the streaming pipeline.
pub type Result<T> = std::result::Result<T, Error>;
