use super::{BackendSet, SelectionKey};
use crate::upstream::Backend;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const STICKY_COOKIE_NAME: &str = "X-Sticky-Session-ID";

/// Session pinning by backend index. A valid cookie pointing at an
/// alive backend wins; otherwise fall back to round robin and queue a
/// fresh cookie on the chosen backend.
pub struct StickyPool {
    pub(crate) backends: BackendSet,
    cursor: AtomicUsize,
}

impl StickyPool {
    pub fn new() -> Self {
        Self {
            backends: BackendSet::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn next_peer(&self, key: &SelectionKey) -> Option<Arc<Backend>> {
        let backends = self.backends.snapshot();
        if backends.is_empty() {
            return None;
        }

        if let Some(session) = key.sticky_session {
            if session < backends.len() && backends[session].is_alive() {
                return Some(backends[session].clone());
            }
        }

        for _ in 0..backends.len() {
            let slot = self.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            let idx = slot % backends.len();
            if backends[idx].is_alive() {
                backends[idx].add_sticky_cookie(format!("{STICKY_COOKIE_NAME}={idx}"));
                return Some(backends[idx].clone());
            }
        }
        None
    }
}

impl Default for StickyPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the sticky session index from a `Cookie` request header
/// value.
pub fn parse_sticky_cookie(cookie_header: &str) -> Option<usize> {
    cookie_header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        if name.trim() == STICKY_COOKIE_NAME {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::pool::test_support::backend;

    fn pool(urls: &[&str]) -> StickyPool {
        let pool = StickyPool::new();
        for url in urls {
            pool.backends.push(backend(url));
        }
        pool
    }

    fn key(session: Option<usize>) -> SelectionKey {
        SelectionKey {
            remote_addr: "10.0.0.7:54321".to_string(),
            path: "/".to_string(),
            sticky_session: session,
        }
    }

    #[test]
    fn test_parse_sticky_cookie() {
        assert_eq!(parse_sticky_cookie("X-Sticky-Session-ID=2"), Some(2));
        assert_eq!(
            parse_sticky_cookie("other=a; X-Sticky-Session-ID=0; more=b"),
            Some(0)
        );
        assert_eq!(parse_sticky_cookie("X-Sticky-Session-ID=junk"), None);
        assert_eq!(parse_sticky_cookie("other=a"), None);
        assert_eq!(parse_sticky_cookie(""), None);
    }

    #[test]
    fn test_empty_returns_none() {
        assert!(pool(&[]).next_peer(&key(None)).is_none());
    }

    #[test]
    fn test_valid_session_pins_backend() {
        let pool = pool(&["http://127.0.0.1:9001", "http://127.0.0.1:9002"]);
        for _ in 0..5 {
            let peer = pool.next_peer(&key(Some(1))).unwrap();
            assert_eq!(peer.url(), "http://127.0.0.1:9002");
            // A pinned selection must not queue a new cookie.
            assert!(peer.take_sticky_cookies().is_empty());
        }
    }

    #[test]
    fn test_out_of_range_session_falls_back() {
        let pool = pool(&["http://127.0.0.1:9001", "http://127.0.0.1:9002"]);
        let peer = pool.next_peer(&key(Some(7))).unwrap();
        let cookies = peer.take_sticky_cookies();
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with("X-Sticky-Session-ID="));
    }

    #[test]
    fn test_dead_pinned_backend_falls_back() {
        let pool = pool(&["http://127.0.0.1:9001", "http://127.0.0.1:9002"]);
        pool.backends.snapshot()[0].set_alive(false);

        let peer = pool.next_peer(&key(Some(0))).unwrap();
        assert_eq!(peer.url(), "http://127.0.0.1:9002");
        assert_eq!(
            peer.take_sticky_cookies(),
            vec!["X-Sticky-Session-ID=1".to_string()]
        );
    }

    #[test]
    fn test_fallback_cookie_matches_chosen_index() {
        let pool = pool(&["http://127.0.0.1:9001", "http://127.0.0.1:9002"]);
        let backends = pool.backends.snapshot();

        let peer = pool.next_peer(&key(None)).unwrap();
        let idx = backends.iter().position(|b| b.url() == peer.url()).unwrap();
        assert_eq!(
            peer.take_sticky_cookies(),
            vec![format!("X-Sticky-Session-ID={idx}")]
        );
    }
}
