//! Configuration types.

use std::time::Duration;

/// Settings for the reply generation pipeline.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Token budget for branch context assembly.
    pub max_context_tokens: usize,
    /// Number of ancestors to fall back to when token estimation is unavailable.
    pub fallback_message_count: usize,
    /// Coalescing interval for streamed chunks (one rendering frame).
    pub flush_interval: Duration,
    /// Tile edge length for the image token heuristic, in pixels.
    pub tile_size: u32,
    /// Token cost per image tile.
    pub tokens_per_tile: u32,
    /// Assumed image edge length when real dimensions are unavailable.
    pub assumed_image_dimension: u32,
    /// Fixed structural token overhead added per message.
    pub per_message_overhead: usize,
    /// Non-empty marker content for a not-yet-generated assistant message.
    /// Empty text is reserved to mean "absent".
    pub placeholder_marker: String,
    /// User-facing content persisted when generation fails before any
    /// content has streamed.
    pub error_marker: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_context_tokens: 8_000,
            fallback_message_count: 8,
            flush_interval: Duration::from_millis(16), // ~one frame at 60Hz
            tile_size: 512,
            tokens_per_tile: 85,
            assumed_image_dimension: 512,
            per_message_overhead: 10,
            placeholder_marker: "\u{2026}".to_string(),
            error_marker: "Something went wrong while generating this reply. Please try again."
                .to_string(),
        }
    }
}
