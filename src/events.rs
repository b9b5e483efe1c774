//! Notification events emitted to consumers (e.g. a UI channel).

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A named notification carrying the message id it concerns.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A message was persisted (the assistant placeholder).
    Added { message_id: Uuid },
    StreamingStart { message_id: Uuid },
    StreamingChunk { message_id: Uuid, delta: String },
    ReasoningStart { message_id: Uuid },
    ReasoningChunk { message_id: Uuid, delta: String },
    ReasoningEnd { message_id: Uuid },
    StreamingEnd { message_id: Uuid },
    StreamingError { message_id: Uuid, message: String },
    StreamingCancelled { message_id: Uuid },
}

impl ChatEvent {
    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::StreamingStart { .. } => "streaming_start",
            Self::StreamingChunk { .. } => "streaming_chunk",
            Self::ReasoningStart { .. } => "reasoning_start",
            Self::ReasoningChunk { .. } => "reasoning_chunk",
            Self::ReasoningEnd { .. } => "reasoning_end",
            Self::StreamingEnd { .. } => "streaming_end",
            Self::StreamingError { .. } => "streaming_error",
            Self::StreamingCancelled { .. } => "streaming_cancelled",
        }
    }

    /// The message this event concerns.
    pub fn message_id(&self) -> Uuid {
        match self {
            Self::Added { message_id }
            | Self::StreamingStart { message_id }
            | Self::StreamingChunk { message_id, .. }
            | Self::ReasoningStart { message_id }
            | Self::ReasoningChunk { message_id, .. }
            | Self::ReasoningEnd { message_id }
            | Self::StreamingEnd { message_id }
            | Self::StreamingError { message_id, .. }
            | Self::StreamingCancelled { message_id } => *message_id,
        }
    }
}

/// Consumer-facing notification channel.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ChatEvent);
}

/// Fan-out sink over a tokio broadcast channel. Lagging or absent receivers
/// are ignored.
pub struct BroadcastSink {
    tx: broadcast::Sender<ChatEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<ChatEvent>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: ChatEvent) {
        let _ = self.tx.send(event);
    }
}

/// Sink that drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ChatEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_event_names_match_the_wire_contract() {
        let id = Uuid::new_v4();
        let cases = [
            (ChatEvent::Added { message_id: id }, "added"),
            (ChatEvent::StreamingStart { message_id: id }, "streaming_start"),
            (
                ChatEvent::StreamingChunk {
                    message_id: id,
                    delta: "x".into(),
                },
                "streaming_chunk",
            ),
            (ChatEvent::ReasoningStart { message_id: id }, "reasoning_start"),
            (
                ChatEvent::ReasoningChunk {
                    message_id: id,
                    delta: "x".into(),
                },
                "reasoning_chunk",
            ),
            (ChatEvent::ReasoningEnd { message_id: id }, "reasoning_end"),
            (ChatEvent::StreamingEnd { message_id: id }, "streaming_end"),
            (
                ChatEvent::StreamingError {
                    message_id: id,
                    message: "boom".into(),
                },
                "streaming_error",
            ),
            (
                ChatEvent::StreamingCancelled { message_id: id },
                "streaming_cancelled",
            ),
        ];

        for (event, expected) in cases {
            assert_eq!(event.name(), expected);
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], expected);
            assert_eq!(event.message_id(), id);
        }
    }

    #[tokio::test]
    async fn broadcast_sink_fans_out() {
        let (sink, mut rx) = BroadcastSink::new(8);
        let id = Uuid::new_v4();
        sink.emit(ChatEvent::StreamingStart { message_id: id });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "streaming_start");
        assert_eq!(event.message_id(), id);
    }
}
