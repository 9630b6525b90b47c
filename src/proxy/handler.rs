use crate::proxy::compress::{accepts_gzip, compress_response};
use crate::proxy::context::{BoxBody, RequestContext};
use crate::proxy::static_files;
use crate::routing::{match_handler, Handler, MatchRequest};
use crate::server::ProxyState;
use crate::upstream::pool::sticky::parse_sticky_cookie;
use crate::upstream::{OutboundRequest, SelectionKey};
use crate::util::generate_request_id;
use http::header::{ACCEPT_ENCODING, CONNECTION, COOKIE, HOST, TRANSFER_ENCODING, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Entry point for every request on every listener port:
///
/// 1. ensure `X-Request-ID`
/// 2. note whether the client accepts gzip
/// 3. parse the `Host` header into hostname + port
/// 4. listener-group and host lookup
/// 5. matcher over the handler list
/// 6. action dispatch (static response | static file | proxy)
///
/// The response is compressed on the way out when the client asked for
/// it and the handler did not already encode.
pub async fn dispatch(
    mut req: Request<BoxBody>,
    state: Arc<ProxyState>,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    if !req.headers().contains_key(REQUEST_ID_HEADER) {
        let generated = generate_request_id();
        if let Ok(value) = HeaderValue::from_str(&generated) {
            req.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
    }
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let accept_gzip = req
        .headers()
        .get(ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(accepts_gzip)
        .unwrap_or(false);

    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let ctx = RequestContext::new(
        request_id,
        host,
        req.uri().path().to_string(),
        req.method().as_str().to_string(),
        peer_addr.to_string(),
    );
    debug!(
        request_id = %ctx.request_id,
        "proxy: request coming, host={}, path={}",
        ctx.host,
        ctx.uri_path
    );

    let response = route(req, &state, &ctx).await;
    ctx.log_access(response.status().as_u16());

    let response = if accept_gzip {
        compress_response(response)
    } else {
        response
    };
    Ok(response)
}

async fn route(
    req: Request<BoxBody>,
    state: &ProxyState,
    ctx: &RequestContext,
) -> Response<BoxBody> {
    let Some((hostname, port)) = parse_host(&ctx.host, state.admin_port) else {
        return ctx.error_response(StatusCode::BAD_REQUEST, "Bad Request");
    };

    let Some(group) = state.groups.get(&port) else {
        return ctx.error_response(StatusCode::NOT_FOUND, "404 page not found");
    };
    let Some(handlers) = group.hosts.get(&hostname) else {
        return ctx.error_response(StatusCode::NOT_FOUND, "404 page not found");
    };

    let match_req = MatchRequest {
        method: &ctx.method,
        path: &ctx.uri_path,
        query: req.uri().query().unwrap_or(""),
        headers: req.headers(),
        remote_addr: &ctx.remote_addr,
    };
    let Some(handler) = match_handler(&match_req, handlers) else {
        return ctx.error_response(StatusCode::NOT_FOUND, "404 page not found");
    };
    let handler = handler.clone();

    if let Some(static_response) = &handler.static_response {
        return static_files::serve_static_response(static_response);
    }
    if let Some(static_cfg) = &handler.static_files {
        return static_files::serve_file(&ctx.uri_path, &handler.matchers.path, static_cfg).await;
    }
    if handler.has_upstreams() {
        return handle_reverse_proxy(req, state, &handler, ctx).await;
    }

    ctx.error_response(StatusCode::NOT_IMPLEMENTED, "Not Implemented")
}

/// Proxy path: forwarded headers, configured header transforms with
/// placeholder substitution, prefix strip + rewrite, then the load
/// balancer. Placeholders see the original request attributes; the
/// path mutations happen after the handler is already selected.
async fn handle_reverse_proxy(
    req: Request<BoxBody>,
    state: &ProxyState,
    handler: &Handler,
    ctx: &RequestContext,
) -> Response<BoxBody> {
    let Some(balancer) = state.balancers.get(&handler.id) else {
        return ctx.error_response(StatusCode::INTERNAL_SERVER_ERROR, "Load balancer not found");
    };
    let Some(rp) = &handler.reverse_proxy else {
        return ctx.error_response(StatusCode::INTERNAL_SERVER_ERROR, "Load balancer not found");
    };

    let (parts, body) = req.into_parts();
    let mut headers = parts.headers;

    append_forwarded_headers(&mut headers, ctx);

    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let values = PlaceholderValues {
        remote_ip: remote_ip(&ctx.remote_addr),
        scheme: "http",
        host: &ctx.host,
        path: &ctx.uri_path,
        query: parts.uri.query().unwrap_or(""),
        method: &ctx.method,
        user_agent: &user_agent,
    };

    for (name, template) in &rp.add_headers {
        let value = substitute_placeholders(template, &values);
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!("proxy: skipping invalid added header {:?}", name),
        }
    }

    for name in &rp.remove_headers {
        headers.remove(name.as_str());
    }

    remove_hop_headers(&mut headers);

    let stripped = if handler.matchers.path.is_empty() {
        ctx.uri_path.as_str()
    } else {
        ctx.uri_path
            .strip_prefix(&handler.matchers.path)
            .unwrap_or(&ctx.uri_path)
    };
    let new_path = if rp.rewrite.is_empty() {
        stripped.to_string()
    } else {
        rewrite_path(&rp.rewrite, stripped)
    };
    let path_and_query = assemble_path_and_query(&new_path, parts.uri.query());

    // Sticky lookup runs after header transforms — a removed Cookie
    // header also removes the pinning.
    let sticky_session = headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_sticky_cookie);
    let key = SelectionKey {
        remote_addr: ctx.remote_addr.clone(),
        path: new_path,
        sticky_session,
    };

    // Replayable body when retries are on; zero-copy stream otherwise.
    let (buffered, streaming) = if rp.load_balancing.retries > 0 {
        match body.collect().await {
            Ok(collected) => (Some(collected.to_bytes()), None),
            Err(e) => {
                warn!(
                    request_id = %ctx.request_id,
                    "proxy: failed to read request body, error={}",
                    e
                );
                return ctx.error_response(StatusCode::BAD_REQUEST, "Bad Request");
            }
        }
    } else {
        (None, Some(body))
    };

    let out = OutboundRequest {
        method: parts.method,
        path_and_query,
        headers,
        buffered,
        streaming,
    };
    balancer.serve(out, &key).await
}

/// Split a `Host` header into hostname and port. A missing port falls
/// back to the admin port; a malformed port is a 400 for the caller.
fn parse_host(host: &str, admin_port: u16) -> Option<(String, u16)> {
    match host.rsplit_once(':') {
        Some((hostname, port)) => {
            let port = port.parse::<u16>().ok()?;
            Some((hostname.to_string(), port))
        }
        None => Some((host.to_string(), admin_port)),
    }
}

fn append_forwarded_headers(headers: &mut HeaderMap, ctx: &RequestContext) {
    static XFF: HeaderName = HeaderName::from_static("x-forwarded-for");
    static XFH: HeaderName = HeaderName::from_static("x-forwarded-host");
    static XFP: HeaderName = HeaderName::from_static("x-forwarded-proto");

    if let Ok(value) = HeaderValue::from_str(&ctx.remote_addr) {
        headers.append(XFF.clone(), value);
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.host) {
        headers.append(XFH.clone(), value);
    }
    headers.append(XFP.clone(), HeaderValue::from_static("http"));
}

fn remove_hop_headers(headers: &mut HeaderMap) {
    let hop_headers: &[HeaderName] = &[
        CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-authenticate"),
        HeaderName::from_static("proxy-authorization"),
        HeaderName::from_static("te"),
        HeaderName::from_static("trailers"),
        TRANSFER_ENCODING,
        HeaderName::from_static("upgrade"),
    ];

    for header in hop_headers {
        headers.remove(header);
    }
}

struct PlaceholderValues<'a> {
    remote_ip: String,
    scheme: &'a str,
    host: &'a str,
    path: &'a str,
    query: &'a str,
    method: &'a str,
    user_agent: &'a str,
}

fn substitute_placeholders(template: &str, values: &PlaceholderValues<'_>) -> String {
    template
        .replace("{remote_ip}", &values.remote_ip)
        .replace("{scheme}", values.scheme)
        .replace("{host}", values.host)
        .replace("{path}", values.path)
        .replace("{query}", values.query)
        .replace("{method}", values.method)
        .replace("{user_agent}", values.user_agent)
}

/// Client address without the port; falls back to the raw value when it
/// does not look like `host:port`.
fn remote_ip(remote_addr: &str) -> String {
    if let Some(rest) = remote_addr.strip_prefix('[') {
        if let Some((inner, _)) = rest.split_once(']') {
            return inner.to_string();
        }
    }
    if remote_addr.matches(':').count() == 1 {
        if let Some((host, _)) = remote_addr.split_once(':') {
            return host.to_string();
        }
    }
    remote_addr.to_string()
}

/// Apply a rewrite template to a prefix-stripped path. The template's
/// leading and trailing `/` are trimmed and `{path}` is replaced with
/// the stripped path (sans leading `/`), so `/prefix/{path}` over
/// `/a/b` yields `prefix/a/b`.
fn rewrite_path(rewrite: &str, stripped_path: &str) -> String {
    let template = rewrite.strip_prefix('/').unwrap_or(rewrite);
    let template = template.strip_suffix('/').unwrap_or(template);
    template.replace("{path}", stripped_path.strip_prefix('/').unwrap_or(stripped_path))
}

fn assemble_path_and_query(path: &str, query: Option<&str>) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    if !path.starts_with('/') {
        out.push('/');
    }
    out.push_str(path);
    if let Some(query) = query {
        out.push('?');
        out.push_str(query);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host() {
        assert_eq!(
            parse_host("example.com:8080", 2019),
            Some(("example.com".to_string(), 8080))
        );
        assert_eq!(
            parse_host("example.com", 2019),
            Some(("example.com".to_string(), 2019))
        );
        assert_eq!(parse_host("example.com:notaport", 2019), None);
        assert_eq!(parse_host("example.com:", 2019), None);
        assert_eq!(
            parse_host("[::1]:8080", 2019),
            Some(("[::1]".to_string(), 8080))
        );
    }

    #[test]
    fn test_remote_ip() {
        assert_eq!(remote_ip("10.0.0.7:54321"), "10.0.0.7");
        assert_eq!(remote_ip("[::1]:8080"), "::1");
        assert_eq!(remote_ip("10.0.0.7"), "10.0.0.7");
        assert_eq!(remote_ip("2001:db8::1"), "2001:db8::1");
    }

    #[test]
    fn test_substitute_placeholders() {
        let values = PlaceholderValues {
            remote_ip: "10.0.0.7".to_string(),
            scheme: "http",
            host: "example.com:8080",
            path: "/api/users",
            query: "page=2",
            method: "GET",
            user_agent: "curl/8.0",
        };

        // Header-placeholder law: "{host}" resolves to the Host value.
        assert_eq!(substitute_placeholders("{host}", &values), "example.com:8080");
        assert_eq!(
            substitute_placeholders("{method} {path}?{query} from {remote_ip}", &values),
            "GET /api/users?page=2 from 10.0.0.7"
        );
        assert_eq!(
            substitute_placeholders("{scheme}://{host} via {user_agent}", &values),
            "http://example.com:8080 via curl/8.0"
        );
        assert_eq!(substitute_placeholders("plain", &values), "plain");
    }

    #[test]
    fn test_rewrite_path_law() {
        assert_eq!(rewrite_path("/prefix/{path}", "/a/b"), "prefix/a/b");
        assert_eq!(rewrite_path("prefix/{path}/", "/a/b"), "prefix/a/b");
        assert_eq!(rewrite_path("/v2/{path}", "users"), "v2/users");
        assert_eq!(rewrite_path("/fixed", "/anything"), "fixed");
        assert_eq!(rewrite_path("{path}", "/a"), "a");
    }

    #[test]
    fn test_assemble_path_and_query() {
        assert_eq!(assemble_path_and_query("prefix/a", None), "/prefix/a");
        assert_eq!(assemble_path_and_query("/a", None), "/a");
        assert_eq!(assemble_path_and_query("", None), "/");
        assert_eq!(
            assemble_path_and_query("a/b", Some("x=1")),
            "/a/b?x=1"
        );
    }

    #[test]
    fn test_remove_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-custom", HeaderValue::from_static("stays"));

        remove_hop_headers(&mut headers);
        assert!(!headers.contains_key(CONNECTION));
        assert!(!headers.contains_key("keep-alive"));
        assert!(headers.contains_key("x-custom"));
    }

    #[test]
    fn test_append_forwarded_headers() {
        let ctx = RequestContext::new(
            "rid".to_string(),
            "example.com:8080".to_string(),
            "/".to_string(),
            "GET".to_string(),
            "10.0.0.7:54321".to_string(),
        );
        let mut headers = HeaderMap::new();
        append_forwarded_headers(&mut headers, &ctx);

        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.7:54321");
        assert_eq!(headers.get("x-forwarded-host").unwrap(), "example.com:8080");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "http");
    }
}
