//! Chunk coalescing.
//!
//! Backends can emit many small deltas per second; applying each one directly
//! would flood consumers. The buffer holds at most one pending coalesced
//! value per key and applies the batch once per flush interval (one rendering
//! frame, ~16ms). Text payloads combine by concatenation, non-text payloads
//! by replacement.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

/// Which delta stream of a message a chunk belongs to. Text and reasoning
/// coalesce independently so the two streams never merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamChannel {
    Text,
    Reasoning,
}

/// Buffer key: one coalescing slot per message id and channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub message_id: Uuid,
    pub channel: StreamChannel,
}

impl ChunkKey {
    pub fn text(message_id: Uuid) -> Self {
        Self {
            message_id,
            channel: StreamChannel::Text,
        }
    }

    pub fn reasoning(message_id: Uuid) -> Self {
        Self {
            message_id,
            channel: StreamChannel::Reasoning,
        }
    }
}

/// A coalescable chunk value.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload {
    /// Incremental text; combines by concatenation.
    Text(String),
    /// Opaque value; combines by replacement.
    Replace(serde_json::Value),
}

impl ChunkPayload {
    fn combine(&mut self, incoming: ChunkPayload) {
        match (self, incoming) {
            (ChunkPayload::Text(pending), ChunkPayload::Text(delta)) => pending.push_str(&delta),
            (slot, incoming) => *slot = incoming,
        }
    }
}

/// Receives coalesced values when the buffer applies them.
pub trait ChunkSink: Send + Sync {
    fn apply(&self, key: ChunkKey, payload: ChunkPayload);
}

struct Inner {
    pending: HashMap<ChunkKey, ChunkPayload>,
    flush_task: Option<JoinHandle<()>>,
}

/// Frame-bounded chunk coalescer.
pub struct ChunkBuffer {
    sink: Arc<dyn ChunkSink>,
    interval: Duration,
    inner: Mutex<Inner>,
    /// Self-handle for the scheduled flush task.
    me: Weak<ChunkBuffer>,
}

impl ChunkBuffer {
    pub fn new(sink: Arc<dyn ChunkSink>, interval: Duration) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            sink,
            interval,
            inner: Mutex::new(Inner {
                pending: HashMap::new(),
                flush_task: None,
            }),
            me: me.clone(),
        })
    }

    /// Combine `payload` into the pending slot for `key` and schedule a flush
    /// if none is already scheduled.
    pub fn enqueue(&self, key: ChunkKey, payload: ChunkPayload) {
        let mut inner = self.inner.lock().expect("chunk buffer poisoned");
        match inner.pending.get_mut(&key) {
            Some(pending) => pending.combine(payload),
            None => {
                inner.pending.insert(key, payload);
            }
        }

        if inner.flush_task.is_none() {
            if let Some(buffer) = self.me.upgrade() {
                inner.flush_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(buffer.interval).await;
                    buffer.flush();
                }));
            }
        }
    }

    /// Apply every pending value and clear the buffer.
    pub fn flush(&self) {
        let (batch, task) = {
            let mut inner = self.inner.lock().expect("chunk buffer poisoned");
            let batch: Vec<(ChunkKey, ChunkPayload)> = inner.pending.drain().collect();
            (batch, inner.flush_task.take())
        };
        if let Some(task) = task {
            task.abort();
        }
        for (key, payload) in batch {
            self.sink.apply(key, payload);
        }
    }

    /// Synchronously apply only `message_id`'s pending values and remove
    /// them, so a later scheduled flush cannot re-apply them. Used at stream
    /// end so the last partial frame is not lost.
    pub fn finalize(&self, message_id: Uuid) {
        let batch = self.take_for(message_id);
        for (key, payload) in batch {
            self.sink.apply(key, payload);
        }
    }

    /// Discard `message_id`'s pending values without applying them.
    pub fn clear(&self, message_id: Uuid) {
        self.take_for(message_id);
    }

    /// Cancel any scheduled flush and drop all pending state.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock().expect("chunk buffer poisoned");
        inner.pending.clear();
        if let Some(task) = inner.flush_task.take() {
            task.abort();
        }
    }

    fn take_for(&self, message_id: Uuid) -> Vec<(ChunkKey, ChunkPayload)> {
        let mut inner = self.inner.lock().expect("chunk buffer poisoned");
        let keys: Vec<ChunkKey> = inner
            .pending
            .keys()
            .filter(|k| k.message_id == message_id)
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|k| inner.pending.remove(&k).map(|p| (k, p)))
            .collect()
    }
}
