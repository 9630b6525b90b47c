use crate::config::DynamicUpstreamConfig;
use crate::error::ProxyError;
use anyhow::{Context, Result};
use dashmap::DashMap;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const CACHE_TTL: Duration = Duration::from_secs(300);

/// Supported dynamic-upstream record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    A,
    Aaaa,
    Cname,
}

impl RecordKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A" => Some(Self::A),
            "AAAA" => Some(Self::Aaaa),
            "CNAME" => Some(Self::Cname),
            _ => None,
        }
    }
}

struct CacheEntry {
    records: Vec<String>,
    expire_at: Instant,
}

/// Process-wide `(record-type, domain) → records` cache. Entries expire
/// after the TTL but are never re-queried on their own — callers decide
/// when to resolve.
pub(crate) struct DnsCache {
    entries: DashMap<(RecordKind, String), CacheEntry>,
    ttl: Duration,
}

impl DnsCache {
    fn new() -> Self {
        Self::with_ttl(CACHE_TTL)
    }

    fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn get(&self, kind: RecordKind, domain: &str) -> Option<Vec<String>> {
        let entry = self.entries.get(&(kind, domain.to_string()))?;
        if entry.expire_at <= Instant::now() {
            return None;
        }
        Some(entry.records.clone())
    }

    fn insert(&self, kind: RecordKind, domain: &str, records: Vec<String>) {
        self.entries.insert(
            (kind, domain.to_string()),
            CacheEntry {
                records,
                expire_at: Instant::now() + self.ttl,
            },
        );
    }
}

/// Resolves dynamic upstream specs to concrete URLs.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
    cache: DnsCache,
}

impl DnsResolver {
    pub fn from_system_conf() -> Result<Self> {
        let resolver =
            TokioAsyncResolver::tokio_from_system_conf().context("building dns resolver")?;
        Ok(Self {
            resolver,
            cache: DnsCache::new(),
        })
    }

    /// Resolve every dynamic upstream entry, best-effort. Returns all
    /// successfully resolved URLs; when any entry failed the aggregate
    /// error carries the failure count so callers can log it and fall
    /// back to the static list.
    pub async fn resolve_upstreams(
        &self,
        upstreams: &[DynamicUpstreamConfig],
    ) -> (Vec<String>, Option<ProxyError>) {
        let mut resolved = Vec::new();
        let mut failed = 0usize;

        for upstream in upstreams {
            let Some(kind) = RecordKind::parse(&upstream.record_type) else {
                warn!(
                    "dns: {}",
                    ProxyError::UnsupportedRecordType(upstream.record_type.clone())
                );
                failed += 1;
                continue;
            };

            let (scheme, domain, port) = parse_upstream_value(&upstream.value);

            let records = match self.cache.get(kind, &domain) {
                Some(records) => {
                    debug!("dns: cache hit, type={:?}, domain={}", kind, domain);
                    records
                }
                None => match self.lookup(kind, &domain).await {
                    Ok(records) => {
                        self.cache.insert(kind, &domain, records.clone());
                        records
                    }
                    Err(e) => {
                        warn!("dns: lookup failed, domain={}, error={}", domain, e);
                        failed += 1;
                        continue;
                    }
                },
            };

            for record in &records {
                resolved.push(format_url(&scheme, record, port.as_deref()));
            }
        }

        let err = (failed > 0).then_some(ProxyError::DnsResolution { failed });
        (resolved, err)
    }

    async fn lookup(&self, kind: RecordKind, domain: &str) -> Result<Vec<String>> {
        match kind {
            RecordKind::A => {
                let lookup = self
                    .resolver
                    .ipv4_lookup(domain)
                    .await
                    .with_context(|| format!("A lookup for {domain}"))?;
                Ok(lookup.iter().map(|a| a.to_string()).collect())
            }
            RecordKind::Aaaa => {
                let lookup = self
                    .resolver
                    .ipv6_lookup(domain)
                    .await
                    .with_context(|| format!("AAAA lookup for {domain}"))?;
                Ok(lookup.iter().map(|aaaa| aaaa.to_string()).collect())
            }
            RecordKind::Cname => {
                let lookup = self
                    .resolver
                    .lookup(domain, RecordType::CNAME)
                    .await
                    .with_context(|| format!("CNAME lookup for {domain}"))?;
                // A CNAME resolves to a single canonical name; hickory
                // names carry a trailing dot that has to go.
                let name = lookup
                    .iter()
                    .find_map(|rdata| rdata.as_cname())
                    .map(|cname| cname.0.to_utf8().trim_end_matches('.').to_string())
                    .with_context(|| format!("no CNAME record for {domain}"))?;
                Ok(vec![name])
            }
        }
    }
}

/// Split an upstream value into `(scheme, domain, port)`. Values without
/// a scheme get `http`.
fn parse_upstream_value(value: &str) -> (String, String, Option<String>) {
    let (scheme, rest) = match value.split_once("://") {
        Some((scheme, rest)) => (scheme.to_string(), rest),
        None => ("http".to_string(), value),
    };

    match rest.split_once(':') {
        Some((domain, port)) => (scheme, domain.to_string(), Some(port.to_string())),
        None => (scheme, rest.to_string(), None),
    }
}

/// Reconstitute `scheme://record[:port]`. IPv6 records are bracketed so
/// the result parses as a URL authority.
fn format_url(scheme: &str, record: &str, port: Option<&str>) -> String {
    let host = if record.contains(':') {
        format!("[{record}]")
    } else {
        record.to_string()
    };
    match port {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    }
}
