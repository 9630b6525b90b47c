use crate::config::Config;
use crate::dns::DnsResolver;
use crate::routing::Handler;
use crate::upstream::{start_load_balancers, LoadBalancer};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Everything one listening port serves: a hostname → handler-list map
/// in configuration order.
pub struct ListenerGroup {
    pub port: u16,
    pub hosts: HashMap<String, Vec<Arc<Handler>>>,
}

/// Immutable routing state shared by every connection task. Built once
/// at startup; lookups need no locks.
pub struct ProxyState {
    pub config: Arc<Config>,
    pub admin_port: u16,
    pub groups: HashMap<u16, ListenerGroup>,
    pub balancers: HashMap<usize, Arc<LoadBalancer>>,
}

impl ProxyState {
    /// Compile handlers (assigning each its registry id), fold listener
    /// blocks into per-port groups, and start the load balancers for
    /// every handler that has upstreams.
    pub async fn build(config: Config) -> Result<Self> {
        let admin_port = config.global.port;
        let mut groups: HashMap<u16, ListenerGroup> = HashMap::new();
        let mut proxy_handlers: Vec<Arc<Handler>> = Vec::new();
        let mut next_id = 0usize;

        info!("server: parsing listener configs");
        for listener in &config.listeners {
            let compiled: Vec<Arc<Handler>> = listener
                .handlers
                .iter()
                .map(|cfg| {
                    let handler = Arc::new(Handler::compile(next_id, cfg));
                    next_id += 1;
                    handler
                })
                .collect();

            for handler in &compiled {
                if handler.has_upstreams() {
                    proxy_handlers.push(handler.clone());
                }
            }

            for host in &listener.host {
                let (hostname, port) = split_host(host)?;
                let group = groups.entry(port).or_insert_with(|| {
                    info!("server: initializing listener group, port={}", port);
                    ListenerGroup {
                        port,
                        hosts: HashMap::new(),
                    }
                });
                // Handlers for a hostname listed in several listener
                // blocks concatenate in configuration order.
                group
                    .hosts
                    .entry(hostname)
                    .or_default()
                    .extend(compiled.iter().cloned());
            }
        }

        let needs_dns = proxy_handlers.iter().any(|handler| {
            handler
                .reverse_proxy
                .as_ref()
                .is_some_and(|rp| !rp.upstreams.dynamic.is_empty())
        });
        let resolver = if needs_dns {
            Some(DnsResolver::from_system_conf()?)
        } else {
            None
        };

        let balancers = start_load_balancers(&proxy_handlers, resolver.as_ref()).await?;

        Ok(Self {
            config: Arc::new(config),
            admin_port,
            groups,
            balancers,
        })
    }
}

fn split_host(host: &str) -> Result<(String, u16)> {
    let (hostname, port) = host
        .rsplit_once(':')
        .with_context(|| format!("listener host {host:?} is missing a port"))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("listener host {host:?} has an invalid port"))?;
    Ok((hostname.to_string(), port))
}
