use super::BackendSet;
use crate::upstream::Backend;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Classic round robin: advance the cursor, inspect that backend, and
/// keep rotating until an alive backend turns up or the pool has been
/// walked once.
pub struct RoundRobinPool {
    pub(crate) backends: BackendSet,
    cursor: AtomicUsize,
}

impl RoundRobinPool {
    pub fn new() -> Self {
        Self {
            backends: BackendSet::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn next_peer(&self) -> Option<Arc<Backend>> {
        let backends = self.backends.snapshot();
        if backends.is_empty() {
            return None;
        }

        for _ in 0..backends.len() {
            let slot = self.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            let candidate = &backends[slot % backends.len()];
            if candidate.is_alive() {
                return Some(candidate.clone());
            }
        }
        None
    }
}

impl Default for RoundRobinPool {
    fn default() -> Self {
        Self::new()
    }
}
