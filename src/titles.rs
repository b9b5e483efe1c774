//! Title generation seam.
//!
//! The actual title heuristics live outside this core; the generator only
//! owns the trigger contract: after the first exchange settles, a best-effort
//! idempotent attempt is made while the conversation title is still the
//! placeholder.

use async_trait::async_trait;
use uuid::Uuid;

/// External title generation service.
#[async_trait]
pub trait TitleService: Send + Sync {
    /// Attempt to give `conversation_id` a real title. Best-effort: failures
    /// are logged by the caller and never surfaced.
    async fn generate_title(&self, conversation_id: Uuid);
}
