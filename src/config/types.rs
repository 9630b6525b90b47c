use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Deserialize a `T` that implements `Default` — treats an explicit
/// `null` the same as a missing field (returns `T::default()`). YAML
/// produces nulls for bare keys (`handlers:`), so every list/map field
/// goes through this. Use with:
///   `#[serde(default, deserialize_with = "deserialize_null_default")]`
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level configuration tree. Immutable after load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub listeners: Vec<ListenerConfig>,
}

/// Admin port and log level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_admin_port")]
    pub port: u16,

    /// "debug", "info", "warn", "error", "fatal".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            port: default_admin_port(),
            log_level: default_log_level(),
        }
    }
}

fn default_admin_port() -> u16 {
    2019
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One or more `host:port` bind entries sharing an ordered handler list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub host: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub handlers: Vec<HandlerConfig>,
}

/// A matcher plus one action. When several actions are populated the
/// evaluation order is static_response > static_files > reverse_proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerConfig {
    #[serde(default)]
    pub matchers: MatchersConfig,

    #[serde(default)]
    pub static_response: Option<StaticResponseConfig>,

    #[serde(default)]
    pub static_files: Option<StaticFilesConfig>,

    #[serde(default)]
    pub reverse_proxy: Option<ReverseProxyConfig>,
}

impl HandlerConfig {
    /// A handler participates in load balancing when it has any
    /// upstream, static or dynamic.
    pub fn has_upstreams(&self) -> bool {
        self.reverse_proxy.as_ref().is_some_and(|rp| {
            !rp.upstreams.static_urls.is_empty() || !rp.upstreams.dynamic.is_empty()
        })
    }
}

/// Request predicates. Empty fields always pass; populated fields are
/// AND-ed together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchersConfig {
    /// Path prefix.
    #[serde(default)]
    pub path: String,

    /// HTTP verbs, or "*" for any.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub method: Vec<String>,

    /// Exact-match header key/value pairs.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub headers: HashMap<String, String>,

    /// Exact-match query key/value pairs.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub query: HashMap<String, String>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub client_cidrs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticResponseConfig {
    /// Defaults to 200 when zero.
    #[serde(default)]
    pub status: u16,

    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticFilesConfig {
    pub root: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReverseProxyConfig {
    /// Path template; `{path}` is replaced with the prefix-stripped
    /// request path. Leading and trailing `/` are trimmed before
    /// substitution.
    #[serde(default)]
    pub rewrite: String,

    #[serde(default)]
    pub upstreams: UpstreamsConfig,

    #[serde(default)]
    pub load_balancing: LoadBalancingConfig,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub add_headers: HashMap<String, String>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub remove_headers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamsConfig {
    #[serde(
        default,
        rename = "static",
        deserialize_with = "deserialize_null_default"
    )]
    pub static_urls: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub dynamic: Vec<DynamicUpstreamConfig>,
}

/// An upstream resolved through DNS at startup rather than written
/// literally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicUpstreamConfig {
    /// "A", "AAAA" or "CNAME".
    #[serde(rename = "type")]
    pub record_type: String,

    /// `host`, `host:port`, or `scheme://host[:port]`.
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancingConfig {
    /// "round_robin", "least_conn", "random", "ip_hash", "uri_hash",
    /// "sticky". Anything else falls back to round robin.
    #[serde(default)]
    pub strategy: String,

    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Seconds to wait between retry attempts.
    #[serde(default = "default_try_interval")]
    pub try_interval: u64,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            strategy: String::new(),
            retries: default_retries(),
            try_interval: default_try_interval(),
        }
    }
}

fn default_retries() -> u32 {
    3
}

fn default_try_interval() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let yaml = r#"
global:
  port: 2019
  log_level: debug
listeners:
  - host: ["example.com:8080", "example.org:8080"]
    handlers:
      - matchers:
          path: /api
          method: [GET, POST]
          headers:
            X-Canary: "true"
          query:
            debug: "1"
          client_cidrs: ["10.0.0.0/8"]
        reverse_proxy:
          rewrite: "/v2/{path}"
          upstreams:
            static: ["http://10.0.0.1:9000", "http://10.0.0.2:9000"]
            dynamic:
              - type: A
                value: "backend.internal:9000"
          load_balancing:
            strategy: least_conn
            retries: 2
            try_interval: 1
          add_headers:
            X-Env: "prod"
          remove_headers: [Cookie]
"#;

        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.global.port, 2019);
        assert_eq!(cfg.global.log_level, "debug");
        assert_eq!(cfg.listeners.len(), 1);

        let listener = &cfg.listeners[0];
        assert_eq!(listener.host.len(), 2);
        assert_eq!(listener.handlers.len(), 1);

        let handler = &listener.handlers[0];
        assert_eq!(handler.matchers.path, "/api");
        assert_eq!(handler.matchers.method, vec!["GET", "POST"]);
        assert_eq!(handler.matchers.headers["X-Canary"], "true");
        assert_eq!(handler.matchers.query["debug"], "1");
        assert_eq!(handler.matchers.client_cidrs, vec!["10.0.0.0/8"]);
        assert!(handler.has_upstreams());

        let rp = handler.reverse_proxy.as_ref().unwrap();
        assert_eq!(rp.rewrite, "/v2/{path}");
        assert_eq!(rp.upstreams.static_urls.len(), 2);
        assert_eq!(rp.upstreams.dynamic.len(), 1);
        assert_eq!(rp.upstreams.dynamic[0].record_type, "A");
        assert_eq!(rp.upstreams.dynamic[0].value, "backend.internal:9000");
        assert_eq!(rp.load_balancing.strategy, "least_conn");
        assert_eq!(rp.load_balancing.retries, 2);
        assert_eq!(rp.load_balancing.try_interval, 1);
        assert_eq!(rp.add_headers["X-Env"], "prod");
        assert_eq!(rp.remove_headers, vec!["Cookie"]);
    }

    #[test]
    fn test_minimal_defaults() {
        let yaml = r#"
listeners:
  - host: ["localhost:8080"]
    handlers:
      - static_response:
          body: pong
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.global.port, 2019);
        assert_eq!(cfg.global.log_level, "info");

        let handler = &cfg.listeners[0].handlers[0];
        assert!(handler.matchers.path.is_empty());
        assert!(handler.matchers.method.is_empty());
        assert!(handler.matchers.headers.is_empty());
        assert!(handler.matchers.query.is_empty());
        assert!(handler.matchers.client_cidrs.is_empty());
        assert!(!handler.has_upstreams());

        let sr = handler.static_response.as_ref().unwrap();
        assert_eq!(sr.status, 0);
        assert_eq!(sr.body, "pong");
    }

    #[test]
    fn test_load_balancing_defaults() {
        let lb: LoadBalancingConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(lb.strategy, "");
        assert_eq!(lb.retries, 3);
        assert_eq!(lb.try_interval, 5);
    }

    #[test]
    fn test_null_lists_default_to_empty() {
        let yaml = r#"
listeners:
  - host: ["localhost:8080"]
    handlers:
      - matchers:
          method:
          client_cidrs:
        reverse_proxy:
          upstreams:
            static:
            dynamic:
          remove_headers:
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let handler = &cfg.listeners[0].handlers[0];
        assert!(handler.matchers.method.is_empty());
        assert!(handler.matchers.client_cidrs.is_empty());

        let rp = handler.reverse_proxy.as_ref().unwrap();
        assert!(rp.upstreams.static_urls.is_empty());
        assert!(rp.upstreams.dynamic.is_empty());
        assert!(rp.remove_headers.is_empty());
        assert!(!handler.has_upstreams());
    }

    #[test]
    fn test_null_handlers_default_to_empty() {
        let yaml = r#"
listeners:
  - host: ["localhost:8080"]
    handlers:
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.listeners[0].handlers.is_empty());
    }

    #[test]
    fn test_has_upstreams_dynamic_only() {
        let yaml = r#"
matchers:
  path: /dyn
reverse_proxy:
  upstreams:
    dynamic:
      - type: CNAME
        value: svc.example.com
"#;
        let handler: HandlerConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(handler.has_upstreams());
    }

    #[test]
    fn test_config_serializes_to_json() {
        // The admin endpoint serves the tree as JSON — a round trip must
        // preserve the "static"/"type" field renames.
        let yaml = r#"
global:
  port: 3000
listeners:
  - host: ["localhost:8080"]
    handlers:
      - reverse_proxy:
          upstreams:
            static: ["http://127.0.0.1:9000"]
            dynamic:
              - type: AAAA
                value: ipv6.internal
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        assert!(json.contains(r#""static""#));
        assert!(json.contains(r#""type": "AAAA""#));
    }
}
