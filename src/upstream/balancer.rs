use crate::config::LoadBalancingConfig;
use crate::dns::DnsResolver;
use crate::error::ProxyError;
use crate::proxy::context::{empty_body, full_body, BoxBody};
use crate::routing::Handler;
use crate::upstream::pool::{SelectionKey, ServerPool};
use crate::upstream::Backend;
use anyhow::{Context, Result};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The outbound request the forwarder hands to `serve`. The body is
/// buffered when retries are possible so attempts can be replayed;
/// with retries disabled it streams through untouched.
pub struct OutboundRequest {
    pub method: Method,
    /// Path plus query, with a leading `/`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub buffered: Option<Bytes>,
    pub streaming: Option<BoxBody>,
}

/// Per-handler façade over one server pool: peer selection, forwarding,
/// sticky-cookie emission, and the retry loop.
pub struct LoadBalancer {
    pool: Arc<ServerPool>,
    retries: u32,
    try_interval: Duration,
}

impl LoadBalancer {
    pub fn new(pool: Arc<ServerPool>, retries: u32, try_interval: Duration) -> Self {
        Self {
            pool,
            retries,
            try_interval,
        }
    }

    /// Build from handler configuration. A zero `try_interval` falls
    /// back to the 5-second default.
    pub fn for_handler(cfg: &LoadBalancingConfig, pool: Arc<ServerPool>) -> Self {
        let secs = if cfg.try_interval == 0 {
            5
        } else {
            cfg.try_interval
        };
        Self::new(pool, cfg.retries, Duration::from_secs(secs))
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// Forward through the pool. On transport failure the chosen
    /// backend is marked dead and selection re-enters the pool — so a
    /// retry can land on a different backend — until the per-request
    /// attempt counter reaches the retry budget.
    pub async fn serve(&self, mut out: OutboundRequest, key: &SelectionKey) -> Response<BoxBody> {
        let mut retry_count: u32 = 0;

        loop {
            let Some(backend) = self.pool.get_next_valid_peer(key) else {
                warn!("balancer: {}", ProxyError::NoBackendAvailable);
                return service_unavailable();
            };

            let body = match &out.buffered {
                Some(bytes) => full_body(bytes.clone()),
                None => out.streaming.take().unwrap_or_else(empty_body),
            };

            backend.inc_active();
            let result = backend
                .forward(out.method.clone(), &out.path_and_query, &out.headers, body)
                .await;
            backend.dec_active();

            match result {
                Ok(response) => {
                    let mut response = response.map(|b| b.boxed());
                    for cookie in backend.take_sticky_cookies() {
                        if let Ok(value) = HeaderValue::from_str(&cookie) {
                            response.headers_mut().append(SET_COOKIE, value);
                        }
                    }
                    return response;
                }
                Err(e) => {
                    warn!(
                        "balancer: {}, upstream={}",
                        ProxyError::BackendUnreachable(e.to_string()),
                        backend.url()
                    );
                    backend.set_alive(false);

                    if retry_count >= self.retries {
                        info!(
                            "balancer: max retry attempts reached, upstream={}, retries={}",
                            backend.url(),
                            self.retries
                        );
                        return service_unavailable();
                    }

                    retry_count += 1;
                    tokio::time::sleep(self.try_interval).await;
                }
            }
        }
    }
}

fn service_unavailable() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body("Service not available"))
        .expect("static response parts")
}

/// Build the `handler id → load balancer` registry: one pool per
/// handler with upstreams, fed by the static list plus DNS-resolved
/// dynamic entries. Malformed upstream URLs are a hard startup failure;
/// DNS failures degrade to whatever did resolve.
pub async fn start_load_balancers(
    handlers: &[Arc<Handler>],
    resolver: Option<&DnsResolver>,
) -> Result<HashMap<usize, Arc<LoadBalancer>>> {
    let mut balancers = HashMap::new();

    for handler in handlers {
        let Some(rp) = &handler.reverse_proxy else {
            continue;
        };

        let pool = Arc::new(ServerPool::new(&rp.load_balancing.strategy));

        let mut urls = rp.upstreams.static_urls.clone();
        if !rp.upstreams.dynamic.is_empty() {
            match resolver {
                Some(resolver) => {
                    let (resolved, err) = resolver.resolve_upstreams(&rp.upstreams.dynamic).await;
                    if let Some(err) = err {
                        warn!("balancer: {}, continuing with remaining upstreams", err);
                    }
                    urls.extend(resolved);
                }
                None => warn!(
                    "balancer: no dns resolver available, skipping {} dynamic upstream(s)",
                    rp.upstreams.dynamic.len()
                ),
            }
        }

        for url in &urls {
            let backend = Backend::new(url)
                .with_context(|| format!("building backend for handler {}", handler.id))?;
            pool.add_backend(Arc::new(backend));
        }

        info!(
            "balancer: pool ready, handler={}, strategy={}, backends={}",
            handler.id,
            pool.strategy_name(),
            pool.size()
        );

        balancers.insert(
            handler.id,
            Arc::new(LoadBalancer::for_handler(&rp.load_balancing, pool)),
        );
    }

    Ok(balancers)
}
