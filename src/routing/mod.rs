pub mod matcher;

pub use matcher::{match_handler, MatchRequest};

use crate::config::{
    HandlerConfig, MatchersConfig, ReverseProxyConfig, StaticFilesConfig, StaticResponseConfig,
};
use ipnetwork::IpNetwork;
use tracing::warn;

/// A handler compiled from configuration. The `id` is assigned at load
/// time and keys the load-balancer registry — a stable stand-in for the
/// configuration-node identity the lookup needs.
pub struct Handler {
    pub id: usize,
    pub matchers: CompiledMatchers,
    pub static_response: Option<StaticResponseConfig>,
    pub static_files: Option<StaticFilesConfig>,
    pub reverse_proxy: Option<ReverseProxyConfig>,
}

impl Handler {
    pub fn compile(id: usize, cfg: &HandlerConfig) -> Self {
        Self {
            id,
            matchers: CompiledMatchers::compile(&cfg.matchers),
            static_response: cfg.static_response.clone(),
            static_files: cfg.static_files.clone(),
            reverse_proxy: cfg.reverse_proxy.clone(),
        }
    }

    pub fn has_upstreams(&self) -> bool {
        self.reverse_proxy.as_ref().is_some_and(|rp| {
            !rp.upstreams.static_urls.is_empty() || !rp.upstreams.dynamic.is_empty()
        })
    }
}

/// Matcher predicates with CIDRs parsed up front. Invalid CIDR entries
/// are skipped with a warning rather than failing the load.
pub struct CompiledMatchers {
    pub path: String,
    pub methods: Vec<String>,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub client_cidrs: Vec<IpNetwork>,
}

impl CompiledMatchers {
    fn compile(cfg: &MatchersConfig) -> Self {
        let client_cidrs = cfg
            .client_cidrs
            .iter()
            .filter_map(|cidr| match cidr.parse::<IpNetwork>() {
                Ok(network) => Some(network),
                Err(e) => {
                    warn!("matcher: skipping invalid cidr {:?}, error={}", cidr, e);
                    None
                }
            })
            .collect();

        Self {
            path: cfg.path.clone(),
            methods: cfg.method.clone(),
            headers: cfg.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            query: cfg.query.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            client_cidrs,
        }
    }
}
