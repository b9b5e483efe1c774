//! Branch-scoped context assembly.
//!
//! Walks a message's ancestor chain (following `parent_message_id`
//! back-references) and selects a token-bounded window for generation. When
//! token estimation is unavailable the builder degrades to a plain
//! message-count window.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, GenerationError};
use crate::message::Message;
use crate::store::MessageStore;
use crate::tokens::TokenEstimator;

/// Options for one context build.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Include the target message itself at the end of the window.
    pub include_target: bool,
    /// Token budget for the window.
    pub max_context_tokens: usize,
    /// Number of messages to keep when token estimation is unavailable.
    pub fallback_message_count: usize,
}

/// An ordered generation context, oldest to newest. Built fresh for each
/// generation attempt and never persisted.
#[derive(Debug, Clone, Default)]
pub struct ContextWindow {
    pub messages: Vec<Message>,
}

impl ContextWindow {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Builds token-bounded context windows from a message's ancestor chain.
pub struct ContextBuilder {
    store: Arc<dyn MessageStore>,
    estimator: TokenEstimator,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn MessageStore>, estimator: TokenEstimator) -> Self {
        Self { store, estimator }
    }

    /// Build the context window for `target_id`.
    ///
    /// The chain is scanned newest to oldest: the newest message is always
    /// included regardless of cost, each older one only while the running
    /// total stays within budget. If estimation fails on the newest message
    /// before anything is selected, selection falls back to the last
    /// `fallback_message_count` messages. Output is chronological either way.
    pub async fn build(&self, target_id: Uuid, options: &ContextOptions) -> Result<ContextWindow, Error> {
        let target = self
            .store
            .get_message(target_id)
            .await?
            .ok_or(GenerationError::MessageNotFound { id: target_id })?;

        // Oldest -> newest chain of ancestors, optionally ending with the
        // target itself.
        let mut chain = self.collect_ancestors(&target).await?;
        if options.include_target {
            chain.push(target);
        }

        if chain.is_empty() {
            return Ok(ContextWindow::default());
        }

        let selected = self.select_within_budget(&chain, options);
        Ok(ContextWindow { messages: selected })
    }

    /// Follow parent back-references to the root. Cycle-guarded: a repeated
    /// id or a dangling parent ends the walk.
    async fn collect_ancestors(&self, target: &Message) -> Result<Vec<Message>, Error> {
        let mut seen: HashSet<Uuid> = HashSet::from([target.id]);
        let mut ancestors = Vec::new();
        let mut cursor = target.parent_message_id;

        while let Some(parent_id) = cursor {
            if !seen.insert(parent_id) {
                debug!(message_id = %target.id, "Parent cycle detected, stopping walk");
                break;
            }
            let Some(parent) = self.store.get_message(parent_id).await? else {
                break;
            };
            cursor = parent.parent_message_id;
            ancestors.push(parent);
        }

        ancestors.reverse();
        Ok(ancestors)
    }

    /// Newest-to-oldest budget scan over a chronological chain.
    fn select_within_budget(&self, chain: &[Message], options: &ContextOptions) -> Vec<Message> {
        let mut selected: Vec<Message> = Vec::new();
        let mut total = 0usize;

        for message in chain.iter().rev() {
            let cost = self.estimator.estimate(message);

            if selected.is_empty() {
                if cost == 0 {
                    // Estimation unavailable on the newest message: abandon
                    // token-based selection entirely.
                    debug!(
                        fallback = options.fallback_message_count,
                        "Token estimation unavailable, using message-count fallback"
                    );
                    return last_n(chain, options.fallback_message_count);
                }
                // The newest message is always included, whatever it costs.
                total += cost;
                selected.push(message.clone());
                continue;
            }

            if total + cost > options.max_context_tokens {
                break;
            }
            total += cost;
            selected.push(message.clone());
        }

        selected.reverse();
        selected
    }
}

fn last_n(chain: &[Message], n: usize) -> Vec<Message> {
    let start = chain.len().saturating_sub(n);
    chain[start..].to_vec()
}
