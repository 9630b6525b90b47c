use super::{BackendSet, SelectionKey};
use crate::upstream::Backend;
use crate::util::fnv1a_32;
use std::sync::Arc;

/// Deterministic selection by client address: the same `remote_addr`
/// always maps to the same backend index for a fixed pool size.
pub struct IpHashPool {
    pub(crate) backends: BackendSet,
}

impl IpHashPool {
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
        let idx = fnv1a_32(&key.remote_addr) as usize % backends.len();
        Some(backends[idx].clone())
    }
}

impl Default for IpHashPool {
    fn default() -> Self {
        Self::new()
    }
}
