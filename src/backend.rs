//! AI backend seam.
//!
//! The backend's network protocol, retries, and timeouts live outside this
//! core. It is consumed as a stream of typed events; cancellation is
//! cooperative — the orchestrator simply stops polling once the flag is set,
//! and the backend must cease emitting once no longer consumed.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BackendError;
use crate::message::Message;

/// One event in a backend reply stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Start,
    ReasoningStart,
    ReasoningDelta(String),
    ReasoningEnd,
    TextDelta(String),
    /// Stream completed. May carry the backend's own assembled final text,
    /// which takes precedence over the accumulated deltas.
    Finish { final_text: Option<String> },
    Error(BackendError),
}

/// Options for one generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    /// Model override (conversation-level setting), if any.
    pub model: Option<String>,
}

/// A generation request: ordered context plus options.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// Context messages, oldest to newest.
    pub context: Vec<Message>,
    pub options: GenerationOptions,
}

/// The external AI backend.
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Open a streaming reply for `request`. A configuration problem (e.g.
    /// missing credentials) fails here; transient errors arrive in-stream as
    /// [`StreamEvent::Error`].
    async fn stream_reply(
        &self,
        request: BackendRequest,
    ) -> Result<BoxStream<'static, StreamEvent>, BackendError>;
}
