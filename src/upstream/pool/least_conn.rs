use super::BackendSet;
use crate::upstream::Backend;
use std::sync::Arc;

/// Pick the alive backend with the fewest in-flight requests. Ties go
/// to the first encountered.
pub struct LeastConnPool {
    pub(crate) backends: BackendSet,
}

impl LeastConnPool {
    pub fn new() -> Self {
        Self {
            backends: BackendSet::new(),
        }
    }

    pub fn next_peer(&self) -> Option<Arc<Backend>> {
        let mut least: Option<Arc<Backend>> = None;

        for candidate in self.backends.snapshot() {
            if !candidate.is_alive() {
                continue;
            }
            match &least {
                Some(current) if current.active_connections() <= candidate.active_connections() => {}
                _ => least = Some(candidate),
            }
        }

        least
    }
}

impl Default for LeastConnPool {
    fn default() -> Self {
        Self::new()
    }
}
