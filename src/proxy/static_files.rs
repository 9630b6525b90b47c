use crate::config::{StaticFilesConfig, StaticResponseConfig};
use crate::proxy::context::{full_body, BoxBody};
use http::header::CONTENT_TYPE;
use http::{response, Response, StatusCode};
use std::path::Path;
use tracing::{debug, warn};

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("X-Content-Type-Options", "nosniff"),
    ("X-XSS-Protection", "1; mode=block"),
    ("X-Frame-Options", "DENY"),
    (
        "Strict-Transport-Security",
        "max-age=31536000; includeSubDomains",
    ),
    ("Content-Security-Policy", "default-src 'self'"),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
];

fn static_reply(status: StatusCode) -> response::Builder {
    let mut builder = Response::builder().status(status);
    for (name, value) in SECURITY_HEADERS {
        builder = builder.header(*name, *value);
    }
    builder.header("X-Powered-By", "Reproxy")
}

/// Serve a configured literal body. A zero status defaults to 200.
pub fn serve_static_response(cfg: &StaticResponseConfig) -> Response<BoxBody> {
    let status = StatusCode::from_u16(cfg.status).unwrap_or(StatusCode::OK);
    let status = if cfg.status == 0 { StatusCode::OK } else { status };

    static_reply(status)
        .body(full_body(cfg.body.clone()))
        .expect("static response parts")
}

/// Serve a file under `root`. The request path (matcher prefix already
/// stripped by the caller's contract below) is sanitized so the
/// resolved target can never escape the root: traversal → 403, missing
/// file → 404, directory → 403.
pub async fn serve_file(
    request_path: &str,
    matcher_path: &str,
    cfg: &StaticFilesConfig,
) -> Response<BoxBody> {
    let rel = request_path
        .strip_prefix(matcher_path)
        .unwrap_or(request_path);
    let rel = rel.strip_prefix('/').unwrap_or(rel);

    let clean = clean_path(rel);
    if clean == ".." || clean.starts_with("../") || clean.contains("/../") {
        warn!("static: rejecting traversal attempt, path={:?}", request_path);
        return forbidden();
    }

    let file_path = Path::new(&cfg.root).join(&clean);

    let meta = match tokio::fs::metadata(&file_path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("static: file not found, path={}", file_path.display());
            return static_reply(StatusCode::NOT_FOUND)
                .body(full_body("File not found"))
                .expect("static response parts");
        }
        Err(e) => {
            warn!(
                "static: error accessing file, path={}, error={}",
                file_path.display(),
                e
            );
            return static_reply(StatusCode::INTERNAL_SERVER_ERROR)
                .body(full_body("Internal Server Error"))
                .expect("static response parts");
        }
    };

    if meta.is_dir() {
        debug!(
            "static: attempted directory access, path={}",
            file_path.display()
        );
        return forbidden();
    }

    match tokio::fs::read(&file_path).await {
        Ok(contents) => {
            let mime = mime_guess::from_path(&file_path).first_or_octet_stream();
            debug!("static: serving file, path={}", file_path.display());
            static_reply(StatusCode::OK)
                .header(CONTENT_TYPE, mime.as_ref())
                .body(full_body(contents))
                .expect("static response parts")
        }
        Err(e) => {
            warn!(
                "static: error reading file, path={}, error={}",
                file_path.display(),
                e
            );
            static_reply(StatusCode::INTERNAL_SERVER_ERROR)
                .body(full_body("Internal Server Error"))
                .expect("static response parts")
        }
    }
}

fn forbidden() -> Response<BoxBody> {
    static_reply(StatusCode::FORBIDDEN)
        .body(full_body("Forbidden"))
        .expect("static response parts")
}

/// Lexical path cleanup with Go `path.Clean` semantics over a relative
/// path: drop empty and `.` segments, resolve `..` against preceding
/// segments, keep leading `..` that cannot be resolved, return `.` for
/// an empty result.
fn clean_path(p: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in p.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if out.last().is_none_or(|last| *last == "..") {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    if out.is_empty() {
        ".".to_string()
    } else {
        out.join("/")
    }
}
