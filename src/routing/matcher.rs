use crate::routing::Handler;
use http::HeaderMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// The original request attributes the matcher sees. Selection is
/// strictly on these — header and path mutations happen only after a
/// handler has been chosen.
pub struct MatchRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub headers: &'a HeaderMap,
    pub remote_addr: &'a str,
}

/// Walk the handler list in configuration order and return the first
/// handler whose predicates all pass.
pub fn match_handler<'a>(
    req: &MatchRequest<'_>,
    handlers: &'a [Arc<Handler>],
) -> Option<&'a Arc<Handler>> {
    handlers.iter().find(|handler| matches(req, handler))
}

fn matches(req: &MatchRequest<'_>, handler: &Handler) -> bool {
    let m = &handler.matchers;

    if !m.methods.is_empty()
        && !m.methods.iter().any(|method| method == req.method || method == "*")
    {
        return false;
    }

    if !m.path.is_empty() && !req.path.starts_with(&m.path) {
        return false;
    }

    for (name, expected) in &m.headers {
        let actual = req.headers.get(name).and_then(|v| v.to_str().ok());
        if actual != Some(expected.as_str()) {
            return false;
        }
    }

    for (name, expected) in &m.query {
        if query_param(req.query, name) != Some(expected.as_str()) {
            return false;
        }
    }

    if !m.client_cidrs.is_empty() {
        let Some(ip) = client_ip(req.remote_addr) else {
            debug!(
                "matcher: unparseable client address {:?}, cidr predicate fails",
                req.remote_addr
            );
            return false;
        };
        if !m.client_cidrs.iter().any(|cidr| cidr.contains(ip)) {
            return false;
        }
    }

    true
}

/// First occurrence of `name` in a raw query string.
fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then_some(value)
    })
}

/// Extract the client IP from a `RemoteAddr`-style string: `ip:port`,
/// `[v6]:port`, or a bare address.
fn client_ip(remote_addr: &str) -> Option<IpAddr> {
    let host = if let Some(rest) = remote_addr.strip_prefix('[') {
        rest.split_once(']').map(|(inner, _)| inner)?
    } else if remote_addr.matches(':').count() == 1 {
        remote_addr.split(':').next()?
    } else {
        // Bare IPv4 or bare IPv6 literal.
        remote_addr
    };
    host.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HandlerConfig, MatchersConfig, StaticResponseConfig};
    use http::HeaderValue;

    fn handler(id: usize, matchers: MatchersConfig) -> Arc<Handler> {
        Arc::new(Handler::compile(
            id,
            &HandlerConfig {
                matchers,
                static_response: Some(StaticResponseConfig::default()),
                ..HandlerConfig::default()
            },
        ))
    }

    fn request<'a>(method: &'a str, path: &'a str) -> MatchRequest<'a> {
        static EMPTY: std::sync::OnceLock<HeaderMap> = std::sync::OnceLock::new();
        MatchRequest {
            method,
            path,
            query: "",
            headers: EMPTY.get_or_init(HeaderMap::new),
            remote_addr: "10.0.0.7:54321",
        }
    }

    #[test]
    fn test_empty_matchers_pass() {
        let handlers = vec![handler(0, MatchersConfig::default())];
        assert!(match_handler(&request("GET", "/anything"), &handlers).is_some());
    }

    #[test]
    fn test_method_predicate() {
        let handlers = vec![handler(
            0,
            MatchersConfig {
                method: vec!["GET".to_string(), "POST".to_string()],
                ..MatchersConfig::default()
            },
        )];
        assert!(match_handler(&request("GET", "/"), &handlers).is_some());
        assert!(match_handler(&request("POST", "/"), &handlers).is_some());
        assert!(match_handler(&request("DELETE", "/"), &handlers).is_none());
    }

    #[test]
    fn test_method_wildcard() {
        let handlers = vec![handler(
            0,
            MatchersConfig {
                method: vec!["*".to_string()],
                ..MatchersConfig::default()
            },
        )];
        assert!(match_handler(&request("DELETE", "/"), &handlers).is_some());
    }

    #[test]
    fn test_path_prefix_predicate() {
        let handlers = vec![handler(
            0,
            MatchersConfig {
                path: "/api".to_string(),
                ..MatchersConfig::default()
            },
        )];
        assert!(match_handler(&request("GET", "/api/users"), &handlers).is_some());
        assert!(match_handler(&request("GET", "/api"), &handlers).is_some());
        assert!(match_handler(&request("GET", "/web"), &handlers).is_none());
    }

    #[test]
    fn test_header_mismatch_rejects_handler() {
        let mut matchers = MatchersConfig::default();
        matchers
            .headers
            .insert("X-Canary".to_string(), "true".to_string());
        let handlers = vec![handler(0, matchers)];

        let mut headers = HeaderMap::new();
        headers.insert("X-Canary", HeaderValue::from_static("false"));
        let req = MatchRequest {
            method: "GET",
            path: "/",
            query: "",
            headers: &headers,
            remote_addr: "10.0.0.7:54321",
        };
        assert!(match_handler(&req, &handlers).is_none());

        headers.insert("X-Canary", HeaderValue::from_static("true"));
        let req = MatchRequest {
            method: "GET",
            path: "/",
            query: "",
            headers: &headers,
            remote_addr: "10.0.0.7:54321",
        };
        assert!(match_handler(&req, &handlers).is_some());
    }

    #[test]
    fn test_missing_header_rejects_handler() {
        let mut matchers = MatchersConfig::default();
        matchers
            .headers
            .insert("X-Canary".to_string(), "true".to_string());
        let handlers = vec![handler(0, matchers)];
        assert!(match_handler(&request("GET", "/"), &handlers).is_none());
    }

    #[test]
    fn test_query_predicate() {
        let mut matchers = MatchersConfig::default();
        matchers.query.insert("debug".to_string(), "1".to_string());
        let handlers = vec![handler(0, matchers)];

        let mut req = request("GET", "/");
        req.query = "debug=1&verbose=0";
        assert!(match_handler(&req, &handlers).is_some());

        let mut req = request("GET", "/");
        req.query = "debug=0";
        assert!(match_handler(&req, &handlers).is_none());

        let req = request("GET", "/");
        assert!(match_handler(&req, &handlers).is_none());
    }

    #[test]
    fn test_cidr_predicate() {
        let handlers = vec![handler(
            0,
            MatchersConfig {
                client_cidrs: vec!["10.0.0.0/8".to_string()],
                ..MatchersConfig::default()
            },
        )];

        assert!(match_handler(&request("GET", "/"), &handlers).is_some());

        let mut req = request("GET", "/");
        req.remote_addr = "192.168.1.5:1000";
        assert!(match_handler(&req, &handlers).is_none());

        let mut req = request("GET", "/");
        req.remote_addr = "not-an-ip";
        assert!(match_handler(&req, &handlers).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let first = handler(
            1,
            MatchersConfig {
                path: "/api".to_string(),
                ..MatchersConfig::default()
            },
        );
        let second = handler(
            2,
            MatchersConfig {
                path: "/".to_string(),
                ..MatchersConfig::default()
            },
        );
        let handlers = vec![first, second];

        let matched = match_handler(&request("GET", "/api/x"), &handlers).unwrap();
        assert_eq!(matched.id, 1);

        let matched = match_handler(&request("GET", "/web"), &handlers).unwrap();
        assert_eq!(matched.id, 2);
    }

    #[test]
    fn test_no_match_returns_none() {
        let handlers = vec![handler(
            0,
            MatchersConfig {
                path: "/api".to_string(),
                method: vec!["POST".to_string()],
                ..MatchersConfig::default()
            },
        )];
        // Path passes but method fails — every predicate must hold.
        assert!(match_handler(&request("GET", "/api"), &handlers).is_none());
    }

    #[test]
    fn test_client_ip_forms() {
        assert_eq!(client_ip("10.0.0.7:54321"), "10.0.0.7".parse().ok());
        assert_eq!(client_ip("10.0.0.7"), "10.0.0.7".parse().ok());
        assert_eq!(client_ip("[::1]:8080"), "::1".parse().ok());
        assert_eq!(client_ip("2001:db8::1"), "2001:db8::1".parse().ok());
        assert_eq!(client_ip("garbage"), None);
    }

    #[test]
    fn test_query_param_first_occurrence() {
        assert_eq!(query_param("a=1&a=2", "a"), Some("1"));
        assert_eq!(query_param("flag&a=1", "flag"), Some(""));
        assert_eq!(query_param("", "a"), None);
    }
}
