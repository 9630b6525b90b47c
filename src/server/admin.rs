use crate::config::Config;
use crate::proxy::context::{full_body, BoxBody};
use http::header::CONTENT_TYPE;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{error, info};

/// Admin surface: `GET /config` returns the parsed configuration tree
/// as pretty-printed JSON. Nothing here goes through the matcher or
/// proxy chain.
pub fn handle_admin(
    req: Request<Incoming>,
    config: Arc<Config>,
) -> Result<Response<BoxBody>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/config") => {
            info!(
                "admin: retrieving server config, path={}",
                req.uri().path()
            );
            match serde_json::to_string_pretty(&*config) {
                Ok(body) => Ok(Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, "application/json")
                    .body(full_body(body))
                    .expect("static response parts")),
                Err(e) => {
                    error!("admin: error marshalling config, error={}", e);
                    Ok(Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .body(full_body("error occurred while marshalling config"))
                        .expect("static response parts"))
                }
            }
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(full_body("404 page not found"))
            .expect("static response parts")),
    }
}
