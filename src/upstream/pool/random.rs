use super::BackendSet;
use crate::upstream::Backend;
use rand::Rng;
use std::sync::Arc;

/// Uniform pick over the full backend list, alive or not — a dead pick
/// surfaces as a proxy error and the retry path recovers.
pub struct RandomPool {
    pub(crate) backends: BackendSet,
}

impl RandomPool {
    pub fn new() -> Self {
        Self {
            backends: BackendSet::new(),
        }
    }

    pub fn next_peer(&self) -> Option<Arc<Backend>> {
        let backends = self.backends.snapshot();
        if backends.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..backends.len());
        Some(backends[idx].clone())
    }
}

impl Default for RandomPool {
    fn default() -> Self {
        Self::new()
    }
}
