use crate::upstream::pool::ServerPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, info};

const CHECK_INTERVAL: Duration = Duration::from_secs(20);
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Spawn the health-check loop for one server pool. Every tick each
/// backend is dialed sequentially; the loop ends when shutdown is
/// signalled.
pub fn launch_health_check(pool: Arc<ServerPool>, shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        info!(
            "health: starting checker, strategy={}, backends={}",
            pool.strategy_name(),
            pool.size()
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(CHECK_INTERVAL) => {}
                _ = shutdown.notified() => {
                    info!("health: checker stopping");
                    return;
                }
            }
            run_health_check(&pool).await;
        }
    });
}

/// One round over the pool: TCP-dial every backend and update its
/// liveness flag.
pub async fn run_health_check(pool: &ServerPool) {
    for backend in pool.get_backends() {
        let (host, port) = backend.dial_addr();
        let alive = is_reachable(host, port).await;

        if alive != backend.is_alive() {
            info!(
                "health: backend {} now {}",
                backend.url(),
                if alive { "alive" } else { "dead" }
            );
        } else {
            debug!("health: backend {} still {}", backend.url(), alive);
        }

        backend.set_alive(alive);
    }
}

async fn is_reachable(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::pool::test_support::backend;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reachable_backend_marked_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let pool = ServerPool::new("round_robin");
        pool.add_backend(backend(&format!("http://{addr}")));
        pool.get_backends()[0].set_alive(false);

        run_health_check(&pool).await;
        assert!(pool.get_backends()[0].is_alive());
    }

    #[tokio::test]
    async fn test_unreachable_backend_marked_dead() {
        // Bind then drop to get a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let pool = ServerPool::new("round_robin");
        pool.add_backend(backend(&format!("http://{addr}")));
        assert!(pool.get_backends()[0].is_alive());

        run_health_check(&pool).await;
        assert!(!pool.get_backends()[0].is_alive());
    }
}
