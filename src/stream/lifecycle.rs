//! Per-message streaming lifecycle.
//!
//! One [`ReplyLifecycle`] drives a single generation from the persisted
//! placeholder through the streaming phases to exactly one terminal state.
//! Incoming deltas pass through the chunk buffer; the buffer's sink routes
//! applied chunks back into the lifecycle's accumulator and emits the
//! corresponding consumer events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, GenerationError};
use crate::events::{ChatEvent, EventSink};
use crate::message::{ContentPart, Message};
use crate::store::MessageStore;
use crate::stream::buffer::{ChunkBuffer, ChunkKey, ChunkPayload, ChunkSink, StreamChannel};

/// Lifecycle phase of a streaming reply.
///
/// `Idle → Started → {TextActive, ReasoningActive}* → terminal`, where the
/// terminals (`Completed`, `Cancelled`, `Errored`) are mutually exclusive and
/// final. Text and reasoning phases may interleave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyPhase {
    Idle,
    Started,
    TextActive,
    ReasoningActive,
    Completed,
    Cancelled,
    Errored,
}

impl ReplyPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Errored)
    }
}

/// Transient per-generation state: the accumulated buffers and the phase.
/// Created when generation begins, discarded when it settles.
#[derive(Debug)]
pub struct ReplyProgress {
    pub phase: ReplyPhase,
    pub text: String,
    pub reasoning: String,
    /// A reasoning phase was opened and not yet explicitly closed.
    pub reasoning_open: bool,
    pub started_at: DateTime<Utc>,
}

impl ReplyProgress {
    fn new() -> Self {
        Self {
            phase: ReplyPhase::Idle,
            text: String::new(),
            reasoning: String::new(),
            reasoning_open: false,
            started_at: Utc::now(),
        }
    }
}

/// Registry of in-flight reply accumulators, keyed by message id. The chunk
/// buffer's sink routes applied chunks through this map; entries are removed
/// when the lifecycle settles, so late flushes for settled ids are dropped.
#[derive(Default)]
pub struct ActiveReplies {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<ReplyProgress>>>>,
}

impl ActiveReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh accumulator for `id`, superseding any existing one.
    fn register(&self, id: Uuid) -> Arc<Mutex<ReplyProgress>> {
        let progress = Arc::new(Mutex::new(ReplyProgress::new()));
        let previous = self
            .inner
            .lock()
            .expect("active replies poisoned")
            .insert(id, Arc::clone(&progress));
        if previous.is_some() {
            debug!(message_id = %id, "Superseding active reply state");
        }
        progress
    }

    fn get(&self, id: Uuid) -> Option<Arc<Mutex<ReplyProgress>>> {
        self.inner
            .lock()
            .expect("active replies poisoned")
            .get(&id)
            .cloned()
    }

    /// Whether `progress` is still the registered accumulator for `id`.
    fn holds(&self, id: Uuid, progress: &Arc<Mutex<ReplyProgress>>) -> bool {
        self.inner
            .lock()
            .expect("active replies poisoned")
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, progress))
    }

    /// Remove `id`'s entry only while `progress` is the registered one, so a
    /// superseded lifecycle settling late cannot evict its successor.
    fn remove_if(&self, id: Uuid, progress: &Arc<Mutex<ReplyProgress>>) {
        let mut inner = self.inner.lock().expect("active replies poisoned");
        if inner
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, progress))
        {
            inner.remove(&id);
        }
    }

    /// Whether a generation is currently tracked for `id`.
    pub fn is_active(&self, id: Uuid) -> bool {
        self.inner
            .lock()
            .expect("active replies poisoned")
            .contains_key(&id)
    }
}

/// Chunk sink that appends applied chunks to the owning reply's accumulator
/// and emits the matching consumer event.
pub struct ReplySink {
    active: Arc<ActiveReplies>,
    events: Arc<dyn EventSink>,
}

impl ReplySink {
    pub fn new(active: Arc<ActiveReplies>, events: Arc<dyn EventSink>) -> Self {
        Self { active, events }
    }
}

impl ChunkSink for ReplySink {
    fn apply(&self, key: ChunkKey, payload: ChunkPayload) {
        let ChunkPayload::Text(delta) = payload else {
            debug!(message_id = %key.message_id, "Dropping non-text chunk payload");
            return;
        };
        let Some(progress) = self.active.get(key.message_id) else {
            debug!(message_id = %key.message_id, "Chunk for settled reply dropped");
            return;
        };

        {
            let mut progress = progress.lock().expect("reply progress poisoned");
            match key.channel {
                StreamChannel::Text => progress.text.push_str(&delta),
                StreamChannel::Reasoning => progress.reasoning.push_str(&delta),
            }
        }

        let event = match key.channel {
            StreamChannel::Text => ChatEvent::StreamingChunk {
                message_id: key.message_id,
                delta,
            },
            StreamChannel::Reasoning => ChatEvent::ReasoningChunk {
                message_id: key.message_id,
                delta,
            },
        };
        self.events.emit(event);
    }
}

/// Drives one assistant reply through its streaming lifecycle.
pub struct ReplyLifecycle {
    message_id: Uuid,
    conversation_id: Uuid,
    parent_message_id: Option<Uuid>,
    store: Arc<dyn MessageStore>,
    events: Arc<dyn EventSink>,
    buffer: Arc<ChunkBuffer>,
    active: Arc<ActiveReplies>,
    progress: Arc<Mutex<ReplyProgress>>,
    placeholder_marker: String,
    error_marker: String,
}

impl ReplyLifecycle {
    /// Create a lifecycle for `message_id` and register its accumulator.
    /// Only one lifecycle is authoritative per id; creating a second one
    /// supersedes the first's accumulator (last writer wins).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_id: Uuid,
        conversation_id: Uuid,
        parent_message_id: Option<Uuid>,
        store: Arc<dyn MessageStore>,
        events: Arc<dyn EventSink>,
        buffer: Arc<ChunkBuffer>,
        active: Arc<ActiveReplies>,
        placeholder_marker: String,
        error_marker: String,
    ) -> Self {
        let progress = active.register(message_id);
        Self {
            message_id,
            conversation_id,
            parent_message_id,
            store,
            events,
            buffer,
            active,
            progress,
            placeholder_marker,
            error_marker,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Whether a newer lifecycle has taken over this message id. Superseded
    /// lifecycles refuse further transitions and never persist.
    pub fn is_superseded(&self) -> bool {
        !self.active.holds(self.message_id, &self.progress)
    }

    /// A lifecycle that already settled itself is past the guard; its calls
    /// fall through to the terminal-finality check instead.
    fn guard_current(&self) -> Result<(), Error> {
        if self.is_superseded() && !self.lock_progress().phase.is_terminal() {
            return Err(GenerationError::Superseded {
                id: self.message_id,
            }
            .into());
        }
        Ok(())
    }

    /// Persist the placeholder: create the assistant message if it does not
    /// exist yet, otherwise reset its content and reasoning in place.
    pub async fn init(&self) -> Result<Message, Error> {
        // Discard chunks a superseded generation left buffered for this id.
        self.buffer.clear(self.message_id);
        let message = match self.store.get_message(self.message_id).await? {
            Some(_) => {
                self.store
                    .update_message_content(
                        self.message_id,
                        vec![ContentPart::text(&self.placeholder_marker)],
                        None,
                    )
                    .await?
            }
            None => {
                let mut message = Message::assistant_placeholder(
                    self.conversation_id,
                    &self.placeholder_marker,
                    self.parent_message_id,
                );
                message.id = self.message_id;
                self.store.create_message(&message).await?;
                message
            }
        };
        self.events.emit(ChatEvent::Added {
            message_id: self.message_id,
        });
        Ok(message)
    }

    /// The backend opened the stream.
    pub fn on_start(&self) -> Result<(), Error> {
        self.guard_current()?;
        self.transition(ReplyPhase::Started)?;
        self.events.emit(ChatEvent::StreamingStart {
            message_id: self.message_id,
        });
        Ok(())
    }

    pub fn on_reasoning_start(&self) -> Result<(), Error> {
        self.guard_current()?;
        self.transition(ReplyPhase::ReasoningActive)?;
        self.lock_progress().reasoning_open = true;
        self.events.emit(ChatEvent::ReasoningStart {
            message_id: self.message_id,
        });
        Ok(())
    }

    pub fn on_reasoning_chunk(&self, delta: impl Into<String>) -> Result<(), Error> {
        self.guard_current()?;
        self.ensure_not_settled(ReplyPhase::ReasoningActive)?;
        self.buffer.enqueue(
            ChunkKey::reasoning(self.message_id),
            ChunkPayload::Text(delta.into()),
        );
        Ok(())
    }

    pub fn on_reasoning_end(&self) -> Result<(), Error> {
        self.guard_current()?;
        // Apply any tail reasoning chunks before announcing the end.
        self.buffer.finalize(self.message_id);
        self.lock_progress().reasoning_open = false;
        self.events.emit(ChatEvent::ReasoningEnd {
            message_id: self.message_id,
        });
        Ok(())
    }

    pub fn on_text_start(&self) -> Result<(), Error> {
        self.guard_current()?;
        self.close_dangling_reasoning()?;
        self.transition(ReplyPhase::TextActive)?;
        Ok(())
    }

    /// Buffer one text delta. If a reasoning phase was opened but never
    /// closed, the missing reasoning-end is synthesized first, so every
    /// reasoning-start has a matching reasoning-end before text begins.
    pub fn on_text_chunk(&self, delta: impl Into<String>) -> Result<(), Error> {
        self.guard_current()?;
        self.close_dangling_reasoning()?;
        if self.lock_progress().phase != ReplyPhase::TextActive {
            self.transition(ReplyPhase::TextActive)?;
        }
        self.buffer.enqueue(
            ChunkKey::text(self.message_id),
            ChunkPayload::Text(delta.into()),
        );
        Ok(())
    }

    pub fn on_text_end(&self) -> Result<(), Error> {
        self.guard_current()?;
        self.buffer.finalize(self.message_id);
        Ok(())
    }

    /// Force-apply buffered-but-unapplied chunks for this message.
    pub fn flush(&self) {
        self.buffer.finalize(self.message_id);
    }

    /// Persist the final content and settle as Completed.
    ///
    /// A final text supplied by the backend wins over the accumulation;
    /// reasoning always comes from the accumulation.
    pub async fn complete(&self, final_text: Option<String>) -> Result<Message, Error> {
        self.guard_current()?;
        self.flush();
        self.transition(ReplyPhase::Completed)?;
        let (accumulated_text, reasoning) = self.snapshot();
        self.active.remove_if(self.message_id, &self.progress);

        let text = match final_text {
            Some(text) if !text.is_empty() => text,
            _ => accumulated_text,
        };
        let message = self
            .store
            .update_message_content(self.message_id, vec![ContentPart::text(text)], reasoning)
            .await?;

        self.events.emit(ChatEvent::StreamingEnd {
            message_id: self.message_id,
        });
        debug!(message_id = %self.message_id, "Reply completed");
        Ok(message)
    }

    /// Settle as Cancelled, persisting whatever content was applied up to
    /// the cancellation point (possibly none). Chunks still buffered at the
    /// moment of cancellation are applied first, preserving maximal partial
    /// output.
    pub async fn cancelled(&self) -> Result<Message, Error> {
        self.guard_current()?;
        self.flush();
        self.transition(ReplyPhase::Cancelled)?;
        let (text, reasoning) = self.snapshot();
        self.active.remove_if(self.message_id, &self.progress);

        let message = if text.is_empty() && reasoning.is_none() {
            // Nothing streamed; leave the placeholder untouched.
            self.store
                .get_message(self.message_id)
                .await?
                .ok_or(GenerationError::MessageNotFound {
                    id: self.message_id,
                })?
        } else {
            self.store
                .update_message_content(self.message_id, vec![ContentPart::text(text)], reasoning)
                .await?
        };

        self.events.emit(ChatEvent::StreamingCancelled {
            message_id: self.message_id,
        });
        debug!(message_id = %self.message_id, "Reply cancelled");
        Ok(message)
    }

    /// Settle as Errored. Partial content that already streamed is
    /// preserved; otherwise a user-facing error message is persisted.
    pub async fn error(&self, error: &Error, interrupted_mid_stream: bool) -> Result<Message, Error> {
        self.guard_current()?;
        self.flush();
        self.transition(ReplyPhase::Errored)?;
        let (text, reasoning) = self.snapshot();
        self.active.remove_if(self.message_id, &self.progress);

        let content = if text.is_empty() {
            vec![ContentPart::text(&self.error_marker)]
        } else {
            vec![ContentPart::text(text)]
        };
        let message = self
            .store
            .update_message_content(self.message_id, content, reasoning)
            .await?;

        warn!(
            message_id = %self.message_id,
            error = %error,
            interrupted_mid_stream,
            "Reply errored"
        );
        self.events.emit(ChatEvent::StreamingError {
            message_id: self.message_id,
            message: error.to_string(),
        });
        Ok(message)
    }

    fn close_dangling_reasoning(&self) -> Result<(), Error> {
        let open = self.lock_progress().reasoning_open;
        if open {
            self.on_reasoning_end()?;
        }
        Ok(())
    }

    /// Accumulated text plus reasoning (None when empty).
    fn snapshot(&self) -> (String, Option<String>) {
        let progress = self.lock_progress();
        let reasoning = if progress.reasoning.is_empty() {
            None
        } else {
            Some(progress.reasoning.clone())
        };
        (progress.text.clone(), reasoning)
    }

    fn transition(&self, target: ReplyPhase) -> Result<(), Error> {
        let mut progress = self.lock_progress();
        if progress.phase.is_terminal() {
            return Err(GenerationError::InvalidTransition {
                id: self.message_id,
                phase: progress.phase,
                target,
            }
            .into());
        }
        progress.phase = target;
        Ok(())
    }

    fn ensure_not_settled(&self, target: ReplyPhase) -> Result<(), Error> {
        let progress = self.lock_progress();
        if progress.phase.is_terminal() {
            return Err(GenerationError::InvalidTransition {
                id: self.message_id,
                phase: progress.phase,
                target,
            }
            .into());
        }
        Ok(())
    }

    fn lock_progress(&self) -> std::sync::MutexGuard<'_, ReplyProgress> {
        self.progress.lock().expect("reply progress poisoned")
    }
}
