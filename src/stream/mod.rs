//! The per-message streaming machinery: chunk coalescing, cooperative
//! cancellation, and the reply lifecycle state machine.

pub mod buffer;
pub mod cancel;
pub mod lifecycle;

pub use buffer::{ChunkBuffer, ChunkKey, ChunkPayload, ChunkSink, StreamChannel};
pub use cancel::{CancelHandle, CancellationRegistry};
pub use lifecycle::{ActiveReplies, ReplyLifecycle, ReplyPhase, ReplyProgress, ReplySink};
