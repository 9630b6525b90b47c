use super::{BackendSet, SelectionKey};
use crate::upstream::Backend;
use crate::util::fnv1a_32;
use std::sync::Arc;

/// Deterministic selection by request path: the same path always maps
/// to the same backend index for a fixed pool size.
pub struct UriHashPool {
    pub(crate) backends: BackendSet,
}

impl UriHashPool {
    pub fn new() -> Self {
        Self {
            backends: BackendSet::new(),
        }
    }

    pub fn next_peer(&self, key: &SelectionKey) -> Option<Arc<Backend>> {
        let backends = self.backends.snapshot();
        if backends.is_empty() {
            return None;
        }
        let idx = fnv1a_32(&key.path) as usize % backends.len();
        Some(backends[idx].clone())
    }
}

impl Default for UriHashPool {
    fn default() -> Self {
        Self::new()
    }
}
