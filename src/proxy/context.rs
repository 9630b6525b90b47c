use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use std::time::Instant;
use tracing::debug;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Per-request context: identity and the original attributes every
/// later phase logs against.
pub struct RequestContext {
    pub request_id: String,
    /// Raw `Host` header value.
    pub host: String,
    pub uri_path: String,
    pub method: String,
    pub remote_addr: String,
    pub start: Instant,
}

impl RequestContext {
    pub fn new(
        request_id: String,
        host: String,
        uri_path: String,
        method: String,
        remote_addr: String,
    ) -> Self {
        Self {
            request_id,
            host,
            uri_path,
            method,
            remote_addr,
            start: Instant::now(),
        }
    }

    /// Single exit point for error paths — plain-text body, logged at
    /// debug with the request id.
    pub fn error_response(&self, status: StatusCode, msg: &str) -> hyper::Response<BoxBody> {
        let mut buf = itoa::Buffer::new();
        debug!(
            request_id = %self.request_id,
            status = buf.format(status.as_u16()),
            "proxy: terminating request, reason={}",
            msg
        );

        hyper::Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(full_body(msg.to_string()))
            .expect("static response parts")
    }

    /// One structured access line per completed request.
    pub fn log_access(&self, status: u16) {
        tracing::info!(
            request_id = %self.request_id,
            client = %self.remote_addr,
            method = %self.method,
            host = %self.host,
            path = %self.uri_path,
            status = status,
            latency_ms = %self.start.elapsed().as_millis(),
            "access"
        );
    }
}
