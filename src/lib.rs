//! chatstream — assistant-reply streaming core.
//!
//! Branch-scoped context assembly under a token budget, a per-message
//! streaming lifecycle state machine, frame-bounded chunk coalescing, and
//! cooperative cancellation. Storage, the AI backend, and the notification
//! channel are trait collaborators.

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod generate;
pub mod message;
pub mod store;
pub mod stream;
pub mod titles;
pub mod tokens;
