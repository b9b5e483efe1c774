//! Token estimation for context assembly.
//!
//! Counts the generation-context cost of a message: all text-bearing content
//! parts through a pluggable tokenizer, a tile-based heuristic for images,
//! reasoning text, plus a fixed per-message structural overhead.
//!
//! Failure contract: a tokenizer error makes `estimate` return 0 — an
//! explicit "estimation unavailable" signal that the context builder turns
//! into its message-count fallback. It never propagates as an error.

use std::sync::Arc;

use tracing::debug;

use crate::config::GenerationSettings;
use crate::message::{ContentPart, Message};

/// A pluggable text tokenizer.
pub trait TextTokenizer: Send + Sync {
    /// Count tokens in `text`, or fail if the tokenizer cannot process it.
    fn count(&self, text: &str) -> Result<usize, TokenizerError>;
}

/// Tokenizer failure. Internal to estimation — never surfaced to callers.
#[derive(Debug, thiserror::Error)]
#[error("Tokenizer failed: {0}")]
pub struct TokenizerError(pub String);

/// Default tokenizer: ~4 characters per token, rounded up.
pub struct HeuristicTokenizer;

impl TextTokenizer for HeuristicTokenizer {
    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(text.chars().count().div_ceil(4))
    }
}

/// Estimates the context cost of a message.
pub struct TokenEstimator {
    tokenizer: Arc<dyn TextTokenizer>,
    tile_size: u32,
    tokens_per_tile: u32,
    assumed_image_dimension: u32,
    per_message_overhead: usize,
}

impl TokenEstimator {
    pub fn new(tokenizer: Arc<dyn TextTokenizer>, settings: &GenerationSettings) -> Self {
        Self {
            tokenizer,
            tile_size: settings.tile_size,
            tokens_per_tile: settings.tokens_per_tile,
            assumed_image_dimension: settings.assumed_image_dimension,
            per_message_overhead: settings.per_message_overhead,
        }
    }

    /// Estimate the token cost of a message. Returns 0 on tokenizer failure.
    pub fn estimate(&self, message: &Message) -> usize {
        let mut total = self.per_message_overhead;

        for part in &message.content {
            match part {
                ContentPart::Text { text } => match self.tokenizer.count(text) {
                    Ok(n) => total += n,
                    Err(e) => return self.fail(message, e),
                },
                ContentPart::Image { width, height, .. } => {
                    total += self.image_tokens(*width, *height);
                }
                ContentPart::Citation { title, snippet, .. } => {
                    let text = match snippet {
                        Some(s) => format!("{title} {s}"),
                        None => title.clone(),
                    };
                    match self.tokenizer.count(&text) {
                        Ok(n) => total += n,
                        Err(e) => return self.fail(message, e),
                    }
                }
                ContentPart::ToolCall { name, arguments } => {
                    let text = format!("{name} {arguments}");
                    match self.tokenizer.count(&text) {
                        Ok(n) => total += n,
                        Err(e) => return self.fail(message, e),
                    }
                }
                ContentPart::TemporaryFile { text, .. } => {
                    if let Some(text) = text {
                        match self.tokenizer.count(text) {
                            Ok(n) => total += n,
                            Err(e) => return self.fail(message, e),
                        }
                    }
                }
            }
        }

        if let Some(reasoning) = &message.reasoning {
            match self.tokenizer.count(reasoning) {
                Ok(n) => total += n,
                Err(e) => return self.fail(message, e),
            }
        }

        total
    }

    /// `ceil(w/tile) * ceil(h/tile) * tokens_per_tile`, with a fixed assumed
    /// square image when dimensions are unavailable.
    fn image_tokens(&self, width: Option<u32>, height: Option<u32>) -> usize {
        let w = width.unwrap_or(self.assumed_image_dimension);
        let h = height.unwrap_or(self.assumed_image_dimension);
        let tiles = w.div_ceil(self.tile_size) as usize * h.div_ceil(self.tile_size) as usize;
        tiles * self.tokens_per_tile as usize
    }

    fn fail(&self, message: &Message, err: TokenizerError) -> usize {
        debug!(message_id = %message.id, error = %err, "Token estimation unavailable");
        0
    }
}
