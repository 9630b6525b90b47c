use crate::proxy::context::BoxBody;
use anyhow::{Context, Result};
use http::{HeaderMap, Method, Request, Response, Uri};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A resolved upstream plus its runtime state: liveness, in-flight
/// request count, and sticky cookies pending emission. Exclusively
/// owned by one server pool; shared with the health checker via `Arc`.
pub struct Backend {
    scheme: String,
    authority: String,
    host: String,
    port: u16,
    alive: AtomicBool,
    active_connections: AtomicUsize,
    sticky_cookies: Mutex<Vec<String>>,
    client: Client<HttpConnector, BoxBody>,
}

impl Backend {
    /// Parse an upstream URL and build the backend's pooled HTTP
    /// client. Malformed URLs are a hard startup failure.
    pub fn new(url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .with_context(|| format!("parsing upstream url {url:?}"))?;

        let scheme = uri.scheme_str().unwrap_or("http").to_string();
        let authority = uri
            .authority()
            .with_context(|| format!("upstream url {url:?} has no host"))?;
        let host = authority.host().trim_matches(['[', ']']).to_string();
        let port = authority
            .port_u16()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });

        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_keepalive(Some(Duration::from_secs(60)));

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(60))
            .build(connector);

        Ok(Self {
            scheme,
            authority: authority.to_string(),
            host,
            port,
            alive: AtomicBool::new(true),
            active_connections: AtomicUsize::new(0),
            sticky_cookies: Mutex::new(Vec::new()),
            client,
        })
    }

    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme, self.authority)
    }

    /// Hostname and port for the health checker's TCP dial.
    pub fn dial_addr(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn inc_active(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Queue a cookie for emission on the next response this backend
    /// serves.
    pub fn add_sticky_cookie(&self, cookie: String) {
        self.sticky_cookies
            .lock()
            .expect("sticky cookie lock poisoned")
            .push(cookie);
    }

    /// Drain the pending sticky cookies.
    pub fn take_sticky_cookies(&self) -> Vec<String> {
        std::mem::take(
            &mut *self
                .sticky_cookies
                .lock()
                .expect("sticky cookie lock poisoned"),
        )
    }

    /// Forward a request to this backend. `path_and_query` must start
    /// with `/`.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: BoxBody,
    ) -> Result<Response<Incoming>> {
        let uri = format!("{}://{}{}", self.scheme, self.authority, path_and_query);

        let mut builder = Request::builder().method(method).uri(&uri);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        let request = builder
            .body(body)
            .with_context(|| format!("building upstream request for {uri}"))?;
        self.client
            .request(request)
            .await
            .with_context(|| format!("forwarding to {uri}"))
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("url", &self.url())
            .field("alive", &self.is_alive())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}
