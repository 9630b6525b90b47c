pub mod ip_hash;
pub mod least_conn;
pub mod random;
pub mod round_robin;
pub mod sticky;
pub mod uri_hash;

use crate::upstream::Backend;
use ip_hash::IpHashPool;
use least_conn::LeastConnPool;
use random::RandomPool;
use round_robin::RoundRobinPool;
use std::sync::Arc;
use std::sync::RwLock;
use sticky::StickyPool;
use uri_hash::UriHashPool;

/// The request attributes a pool may consult when picking a peer.
/// Derived once per selection from the original request so the pools
/// stay independent of hyper types.
#[derive(Debug, Clone, Default)]
pub struct SelectionKey {
    pub remote_addr: String,
    pub path: String,
    /// Parsed `X-Sticky-Session-ID` cookie value, if present.
    pub sticky_session: Option<usize>,
}

/// Ordered backend list shared by every pool variant. Grows only during
/// startup; selection takes read snapshots.
pub(crate) struct BackendSet {
    inner: RwLock<Vec<Arc<Backend>>>,
}

impl BackendSet {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, backend: Arc<Backend>) {
        self.inner
            .write()
            .expect("backend set lock poisoned")
            .push(backend);
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Backend>> {
        self.inner
            .read()
            .expect("backend set lock poisoned")
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().expect("backend set lock poisoned").len()
    }
}

/// Enum-based server pool — one variant per balancing strategy, no
/// trait objects. Per-strategy state (cursors) lives inside the
/// variant.
pub enum ServerPool {
    RoundRobin(RoundRobinPool),
    LeastConn(LeastConnPool),
    Random(RandomPool),
    IpHash(IpHashPool),
    UriHash(UriHashPool),
    Sticky(StickyPool),
}

impl ServerPool {
    /// Map a strategy string to a pool. Unrecognized strings fall back
    /// to round robin.
    pub fn new(strategy: &str) -> Self {
        match strategy {
            "least_conn" => Self::LeastConn(LeastConnPool::new()),
            "random" => Self::Random(RandomPool::new()),
            "ip_hash" => Self::IpHash(IpHashPool::new()),
            "uri_hash" => Self::UriHash(UriHashPool::new()),
            "sticky" => Self::Sticky(StickyPool::new()),
            _ => Self::RoundRobin(RoundRobinPool::new()),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        match self {
            Self::RoundRobin(_) => "round_robin",
            Self::LeastConn(_) => "least_conn",
            Self::Random(_) => "random",
            Self::IpHash(_) => "ip_hash",
            Self::UriHash(_) => "uri_hash",
            Self::Sticky(_) => "sticky",
        }
    }

    pub fn add_backend(&self, backend: Arc<Backend>) {
        self.backends().push(backend);
    }

    pub fn get_backends(&self) -> Vec<Arc<Backend>> {
        self.backends().snapshot()
    }

    pub fn size(&self) -> usize {
        self.backends().len()
    }

    pub fn get_next_valid_peer(&self, key: &SelectionKey) -> Option<Arc<Backend>> {
        match self {
            Self::RoundRobin(pool) => pool.next_peer(),
            Self::LeastConn(pool) => pool.next_peer(),
            Self::Random(pool) => pool.next_peer(),
            Self::IpHash(pool) => pool.next_peer(key),
            Self::UriHash(pool) => pool.next_peer(key),
            Self::Sticky(pool) => pool.next_peer(key),
        }
    }

    fn backends(&self) -> &BackendSet {
        match self {
            Self::RoundRobin(pool) => &pool.backends,
            Self::LeastConn(pool) => &pool.backends,
            Self::Random(pool) => &pool.backends,
            Self::IpHash(pool) => &pool.backends,
            Self::UriHash(pool) => &pool.backends,
            Self::Sticky(pool) => &pool.backends,
        }
    }
}
