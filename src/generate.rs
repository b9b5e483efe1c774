//! Generation orchestration.
//!
//! Entry points that wire context assembly, the lifecycle state machine,
//! chunk coalescing, and cooperative cancellation together and drive the
//! external AI backend. Each generation runs as a spawned background task
//! the caller never awaits; progress is observable only through emitted
//! events, and settlement through the `on_settled` hook. No error escapes
//! the background task unhandled.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{AiBackend, BackendRequest, GenerationOptions, StreamEvent};
use crate::config::GenerationSettings;
use crate::context::{ContextBuilder, ContextOptions, ContextWindow};
use crate::error::{Error, GenerationError};
use crate::events::EventSink;
use crate::message::{ContentPart, Message, Role};
use crate::store::MessageStore;
use crate::stream::{
    ActiveReplies, CancelHandle, CancellationRegistry, ChunkBuffer, ReplyLifecycle, ReplySink,
};
use crate::titles::TitleService;
use crate::tokens::{HeuristicTokenizer, TextTokenizer, TokenEstimator};

/// How a generation settled.
#[derive(Debug)]
pub enum ReplyOutcome {
    Completed(Message),
    Cancelled(Message),
    Failed {
        /// The persisted message, when finalization itself succeeded.
        message: Option<Message>,
        error: Error,
    },
    /// A newer generation took over this message id; this one settled
    /// without touching the reply.
    Superseded,
}

/// Callback invoked exactly once when a generation settles.
pub type SettleHook = Box<dyn FnOnce(ReplyOutcome) + Send + 'static>;

/// What ended the backend stream.
enum StreamEnd {
    Finished { final_text: Option<String> },
    Cancelled,
    Failed { error: Error, mid_stream: bool },
}

fn is_superseded(error: &Error) -> bool {
    matches!(
        error,
        Error::Generation(GenerationError::Superseded { .. })
    )
}

/// The reply generation service. Cheap to clone; all shared state
/// (cancellation registry, chunk buffer, active-reply map) is process-wide.
#[derive(Clone)]
pub struct ReplyGenerator {
    store: Arc<dyn MessageStore>,
    backend: Arc<dyn AiBackend>,
    events: Arc<dyn EventSink>,
    registry: Arc<CancellationRegistry>,
    buffer: Arc<ChunkBuffer>,
    active: Arc<ActiveReplies>,
    context: Arc<ContextBuilder>,
    titles: Option<Arc<dyn TitleService>>,
    settings: GenerationSettings,
}

impl ReplyGenerator {
    pub fn new(
        store: Arc<dyn MessageStore>,
        backend: Arc<dyn AiBackend>,
        events: Arc<dyn EventSink>,
        settings: GenerationSettings,
    ) -> Self {
        Self::with_tokenizer(store, backend, events, settings, Arc::new(HeuristicTokenizer))
    }

    pub fn with_tokenizer(
        store: Arc<dyn MessageStore>,
        backend: Arc<dyn AiBackend>,
        events: Arc<dyn EventSink>,
        settings: GenerationSettings,
        tokenizer: Arc<dyn TextTokenizer>,
    ) -> Self {
        let active = Arc::new(ActiveReplies::new());
        let sink = Arc::new(ReplySink::new(Arc::clone(&active), Arc::clone(&events)));
        let buffer = ChunkBuffer::new(sink, settings.flush_interval);
        let estimator = TokenEstimator::new(tokenizer, &settings);
        let context = Arc::new(ContextBuilder::new(Arc::clone(&store), estimator));
        Self {
            store,
            backend,
            events,
            registry: Arc::new(CancellationRegistry::new()),
            buffer,
            active,
            context,
            titles: None,
            settings,
        }
    }

    /// Attach the title generation collaborator.
    pub fn with_title_service(mut self, titles: Arc<dyn TitleService>) -> Self {
        self.titles = Some(titles);
        self
    }

    /// Request cooperative cancellation of the generation for `message_id`.
    /// Returns whether an in-flight generation was found.
    pub fn cancel(&self, message_id: Uuid) -> bool {
        self.registry.cancel(message_id)
    }

    /// The cancellation registry (shared, process-wide).
    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    /// The branch context builder.
    pub fn context_builder(&self) -> &Arc<ContextBuilder> {
        &self.context
    }

    /// Tear down shared streaming state: cancels any scheduled chunk flush
    /// and drops pending coalesced values.
    pub fn shutdown(&self) {
        self.buffer.destroy();
    }

    /// Generate the first reply to a freshly persisted user message.
    ///
    /// Persists an assistant placeholder (child of the user message), builds
    /// the branch context under the configured budget, and streams into it.
    /// After settling — success or error, always — a best-effort idempotent
    /// title-generation attempt fires. Returns the assistant message id.
    pub async fn generate_reply_for_new_message(
        &self,
        conversation_id: Uuid,
        user_message_id: Uuid,
        on_settled: SettleHook,
    ) -> Result<Uuid, Error> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(GenerationError::ConversationNotFound {
                id: conversation_id,
            })?;
        self.store
            .get_message(user_message_id)
            .await?
            .ok_or(GenerationError::MessageNotFound {
                id: user_message_id,
            })?;

        let placeholder = Message::assistant_placeholder(
            conversation_id,
            &self.settings.placeholder_marker,
            Some(user_message_id),
        );
        let assistant_id = placeholder.id;
        self.store.create_message(&placeholder).await?;

        let context = self
            .context
            .build(assistant_id, &self.default_context_options())
            .await?;

        let options = GenerationOptions {
            model: conversation.model_override.clone(),
        };
        self.start_streaming(
            assistant_id,
            conversation_id,
            Some(user_message_id),
            context,
            options,
            on_settled,
            true,
        )
        .await?;
        Ok(assistant_id)
    }

    /// Regenerate an existing assistant reply in place.
    ///
    /// Rejects non-assistant targets before anything starts. Prior content
    /// and reasoning are cleared to the placeholder, then the branch context
    /// is rebuilt (target excluded) and streamed into the same message id.
    pub async fn regenerate_reply(
        &self,
        message_id: Uuid,
        on_settled: SettleHook,
    ) -> Result<(), Error> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(GenerationError::MessageNotFound { id: message_id })?;
        if message.role != Role::Assistant {
            return Err(GenerationError::RoleMismatch {
                id: message_id,
                role: message.role,
            }
            .into());
        }

        self.store
            .update_message_content(
                message_id,
                vec![ContentPart::text(&self.settings.placeholder_marker)],
                None,
            )
            .await?;

        let context = self
            .context
            .build(message_id, &self.default_context_options())
            .await?;

        let model = match self.store.get_conversation(message.conversation_id).await? {
            Some(conversation) => conversation.model_override,
            None => None,
        };
        self.start_streaming(
            message_id,
            message.conversation_id,
            message.parent_message_id,
            context,
            GenerationOptions { model },
            on_settled,
            false,
        )
        .await
    }

    /// Stream a reply into `target_message_id` without blocking the caller.
    ///
    /// Creates the lifecycle and a cancellation token (superseding any
    /// previous token for the same id), then spawns the drive task. Every
    /// terminal path reports through `on_settled`.
    pub async fn stream_assistant_reply(
        &self,
        target_message_id: Uuid,
        conversation_id: Uuid,
        parent_message_id: Option<Uuid>,
        context: ContextWindow,
        options: GenerationOptions,
        on_settled: SettleHook,
    ) -> Result<(), Error> {
        self.start_streaming(
            target_message_id,
            conversation_id,
            parent_message_id,
            context,
            options,
            on_settled,
            false,
        )
        .await
    }

    /// Context options used by the convenience wrappers: fixed budget,
    /// target excluded.
    pub fn default_context_options(&self) -> ContextOptions {
        ContextOptions {
            include_target: false,
            max_context_tokens: self.settings.max_context_tokens,
            fallback_message_count: self.settings.fallback_message_count,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn start_streaming(
        &self,
        target_message_id: Uuid,
        conversation_id: Uuid,
        parent_message_id: Option<Uuid>,
        context: ContextWindow,
        options: GenerationOptions,
        on_settled: SettleHook,
        trigger_title: bool,
    ) -> Result<(), Error> {
        // Stop any in-flight generation for this id before taking over; it
        // observes its own (old) flag and settles as superseded.
        if self.registry.cancel(target_message_id) {
            debug!(message_id = %target_message_id, "Cancelling superseded generation");
        }

        let lifecycle = ReplyLifecycle::new(
            target_message_id,
            conversation_id,
            parent_message_id,
            Arc::clone(&self.store),
            Arc::clone(&self.events),
            Arc::clone(&self.buffer),
            Arc::clone(&self.active),
            self.settings.placeholder_marker.clone(),
            self.settings.error_marker.clone(),
        );
        lifecycle.init().await?;

        let cancel = self.registry.create_token(target_message_id);
        let request = BackendRequest {
            context: context.messages,
            options,
        };
        let generator = self.clone();
        let title_conversation = trigger_title.then_some(conversation_id);

        info!(message_id = %target_message_id, "Starting reply generation");
        tokio::spawn(async move {
            generator
                .drive(lifecycle, request, cancel, on_settled, title_conversation)
                .await;
        });
        Ok(())
    }

    /// The background drive task: consume the backend stream, settle through
    /// exactly one terminal path, release the cancellation token, fire the
    /// settle hook, then the optional title trigger.
    async fn drive(
        &self,
        lifecycle: ReplyLifecycle,
        request: BackendRequest,
        cancel: CancelHandle,
        on_settled: SettleHook,
        title_conversation: Option<Uuid>,
    ) {
        let message_id = lifecycle.message_id();

        let end = match self.backend.stream_reply(request).await {
            Ok(stream) => Self::consume_stream(&lifecycle, stream, &cancel).await,
            Err(error) => StreamEnd::Failed {
                error: error.into(),
                mid_stream: false,
            },
        };

        let outcome = match end {
            StreamEnd::Finished { final_text } => match lifecycle.complete(final_text).await {
                Ok(message) => {
                    info!(message_id = %message_id, "Reply generation completed");
                    ReplyOutcome::Completed(message)
                }
                Err(error) if is_superseded(&error) => ReplyOutcome::Superseded,
                Err(error) => Self::settle_failure(&lifecycle, error).await,
            },
            StreamEnd::Cancelled => match lifecycle.cancelled().await {
                Ok(message) => {
                    info!(message_id = %message_id, "Reply generation cancelled");
                    ReplyOutcome::Cancelled(message)
                }
                Err(error) if is_superseded(&error) => ReplyOutcome::Superseded,
                Err(error) => {
                    warn!(message_id = %message_id, error = %error, "Cancellation finalization failed");
                    ReplyOutcome::Failed {
                        message: None,
                        error,
                    }
                }
            },
            StreamEnd::Failed { error, .. } if is_superseded(&error) => ReplyOutcome::Superseded,
            StreamEnd::Failed { error, mid_stream } => match lifecycle.error(&error, mid_stream).await {
                Ok(message) => ReplyOutcome::Failed {
                    message: Some(message),
                    error,
                },
                Err(persist_error) if is_superseded(&persist_error) => ReplyOutcome::Superseded,
                Err(persist_error) => {
                    warn!(
                        message_id = %message_id,
                        error = %persist_error,
                        "Error finalization failed"
                    );
                    ReplyOutcome::Failed {
                        message: None,
                        error,
                    }
                }
            },
        };

        // Release only this generation's token; a successor's token stays.
        self.registry.release(message_id, &cancel);
        let superseded = matches!(outcome, ReplyOutcome::Superseded);
        if superseded {
            debug!(message_id = %message_id, "Superseded generation settled");
        }
        on_settled(outcome);

        if !superseded {
            if let Some(conversation_id) = title_conversation {
                self.maybe_generate_title(conversation_id).await;
            }
        }
    }

    /// Consume backend events, polling the cancellation flag between reads.
    async fn consume_stream(
        lifecycle: &ReplyLifecycle,
        mut stream: futures::stream::BoxStream<'static, StreamEvent>,
        cancel: &CancelHandle,
    ) -> StreamEnd {
        let mut mid_stream = false;
        loop {
            if cancel.is_cancelled() {
                return StreamEnd::Cancelled;
            }
            let Some(event) = stream.next().await else {
                // Stream drained without an explicit finish event.
                return StreamEnd::Finished { final_text: None };
            };

            let step = match event {
                StreamEvent::Start => lifecycle.on_start(),
                StreamEvent::ReasoningStart => lifecycle.on_reasoning_start(),
                StreamEvent::ReasoningDelta(delta) => {
                    mid_stream = true;
                    lifecycle.on_reasoning_chunk(delta)
                }
                StreamEvent::ReasoningEnd => lifecycle.on_reasoning_end(),
                StreamEvent::TextDelta(delta) => {
                    mid_stream = true;
                    lifecycle.on_text_chunk(delta)
                }
                StreamEvent::Finish { final_text } => {
                    return StreamEnd::Finished { final_text };
                }
                StreamEvent::Error(error) => {
                    return StreamEnd::Failed {
                        error: error.into(),
                        mid_stream,
                    };
                }
            };
            if let Err(error) = step {
                return StreamEnd::Failed { error, mid_stream };
            }
        }
    }

    async fn settle_failure(lifecycle: &ReplyLifecycle, error: Error) -> ReplyOutcome {
        warn!(message_id = %lifecycle.message_id(), error = %error, "Completion finalization failed");
        match lifecycle.error(&error, true).await {
            Ok(message) => ReplyOutcome::Failed {
                message: Some(message),
                error,
            },
            Err(persist_error) if is_superseded(&persist_error) => ReplyOutcome::Superseded,
            Err(_) => ReplyOutcome::Failed {
                message: None,
                error,
            },
        }
    }

    /// Best-effort idempotent title trigger: fires only while the
    /// conversation title is still the placeholder and the first exchange
    /// (exactly one user and one assistant message) is complete.
    async fn maybe_generate_title(&self, conversation_id: Uuid) {
        let Some(titles) = &self.titles else {
            return;
        };

        let conversation = match self.store.get_conversation(conversation_id).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => return,
            Err(error) => {
                warn!(conversation_id = %conversation_id, error = %error, "Title gating lookup failed");
                return;
            }
        };
        if !conversation.has_placeholder_title() {
            return;
        }

        let messages = match self.store.list_messages(conversation_id).await {
            Ok(messages) => messages,
            Err(error) => {
                warn!(conversation_id = %conversation_id, error = %error, "Title gating listing failed");
                return;
            }
        };
        let users = messages.iter().filter(|m| m.role == Role::User).count();
        let assistants = messages.iter().filter(|m| m.role == Role::Assistant).count();
        if users != 1 || assistants != 1 {
            return;
        }

        titles.generate_title(conversation_id).await;
    }
}
