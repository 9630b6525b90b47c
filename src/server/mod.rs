mod admin;
pub mod bootstrap;
pub mod runtime;
mod state;

pub use state::{ListenerGroup, ProxyState};

use crate::config::Config;
use crate::proxy;
use anyhow::Result;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

/// Run the HTTP server for one listener group with graceful shutdown:
/// when `shutdown` is notified the accept loop stops and in-flight
/// connections get up to `DRAIN_TIMEOUT` to finish.
pub async fn run_listener_server(
    port: u16,
    state: Arc<ProxyState>,
    shutdown: Arc<Notify>,
) -> Result<()> {
    const DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("server: listener serving, port={}", port);

    let active_conns = Arc::new(AtomicI64::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: listener stopping, port={}, draining...", port);
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                error!("server: accept failed, port={}, error={}", port, e);
                continue;
            }
        };

        active_conns.fetch_add(1, Ordering::Relaxed);
        let state = state.clone();
        let active_conns = active_conns.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let state_inner = state.clone();
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state_inner.clone();
                async move { proxy::dispatch(req.map(|body| body.boxed()), state, peer_addr).await }
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!(
                        "server: connection error, peer={}, error={}",
                        peer_addr, e
                    );
                }
            }

            active_conns.fetch_sub(1, Ordering::Relaxed);
        });
    }

    drain(&active_conns, DRAIN_TIMEOUT, port).await;
    Ok(())
}

async fn drain(active_conns: &Arc<AtomicI64>, timeout: std::time::Duration, port: u16) {
    let active = active_conns.load(Ordering::Relaxed);
    if active == 0 {
        return;
    }

    info!(
        "server: waiting for {} active connections, port={}",
        active, port
    );
    let wait = async {
        while active_conns.load(Ordering::Relaxed) > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    };
    match tokio::time::timeout(timeout, wait).await {
        Ok(_) => info!("server: all connections drained, port={}", port),
        Err(_) => info!(
            "server: drain timeout ({}s), {} connections still active, port={}",
            timeout.as_secs(),
            active_conns.load(Ordering::Relaxed),
            port
        ),
    }
}

/// Run the admin server on the global port.
pub async fn run_admin_server(port: u16, config: Arc<Config>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin serving, port={}", port);

    loop {
        let (stream, _) = listener.accept().await?;
        let config = config.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let config = config.clone();
                async move { admin::handle_admin(req, config) }
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: admin connection error, error={}", e);
                }
            }
        });
    }
}
