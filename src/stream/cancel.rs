//! Cooperative cancellation, one flag per in-flight generation.
//!
//! Setting the flag never aborts an in-flight backend read; the consumer
//! polls `is_cancelled` between incremental reads and stops promptly once
//! set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

/// Handle to one generation's cancellation flag.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Registry of cancellation flags keyed by target message id.
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new flag for `id`, returning its handle.
    ///
    /// Last writer wins: a second generation for the same id replaces the
    /// first's entry, so `cancel` only ever reaches the newest generation.
    pub fn create_token(&self, id: Uuid) -> CancelHandle {
        let flag = Arc::new(AtomicBool::new(false));
        let previous = self
            .tokens
            .lock()
            .expect("cancellation registry poisoned")
            .insert(id, Arc::clone(&flag));
        if previous.is_some() {
            debug!(message_id = %id, "Superseding existing cancellation token");
        }
        CancelHandle { flag }
    }

    /// Set the flag for `id` if a token exists. Returns whether one was found.
    pub fn cancel(&self, id: Uuid) -> bool {
        let tokens = self.tokens.lock().expect("cancellation registry poisoned");
        match tokens.get(&id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Remove the token after a generation settles through any terminal
    /// path, but only while `handle` is still the registered token. A
    /// superseded generation releasing late must not evict its successor's
    /// token.
    pub fn release(&self, id: Uuid, handle: &CancelHandle) {
        let mut tokens = self.tokens.lock().expect("cancellation registry poisoned");
        if tokens
            .get(&id)
            .is_some_and(|flag| Arc::ptr_eq(flag, &handle.flag))
        {
            tokens.remove(&id);
        }
    }

    /// Whether a token is currently registered for `id`.
    pub fn is_active(&self, id: Uuid) -> bool {
        self.tokens
            .lock()
            .expect("cancellation registry poisoned")
            .contains_key(&id)
    }
}
