use crate::config::Config;
use crate::server::{self, ProxyState};
use crate::upstream::health;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
}

/// Process lifecycle: load config → init logging → build routing state
/// and load balancers → spawn health checkers, admin and listener
/// servers → block until a termination signal → drain and exit.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    let config = Config::load(&args.config_path)?;

    init_tracing(&config.global.log_level);
    info!("config loaded successfully for reproxy");

    let state = Arc::new(ProxyState::build(config).await?);
    let shutdown = Arc::new(Notify::new());

    for balancer in state.balancers.values() {
        health::launch_health_check(balancer.pool().clone(), shutdown.clone());
    }

    start_admin_server(&state);

    let mut listener_handles = Vec::new();
    for port in state.groups.keys().copied() {
        let state = state.clone();
        let shutdown = shutdown.clone();
        listener_handles.push(tokio::spawn(async move {
            server::run_listener_server(port, state, shutdown).await
        }));
    }

    wait_for_shutdown(&shutdown).await;

    for handle in listener_handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("server: listener task failed, error={}", e),
            Err(e) => tracing::error!("server: listener task panicked, error={}", e),
        }
    }

    info!("server: shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str) {
    // tracing has no fatal level; config "fatal" maps to error.
    let level = match log_level {
        "fatal" => "error",
        other => other,
    };

    let (non_blocking, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    // The writer guard must outlive the process.
    std::mem::forget(guard);
}

fn start_admin_server(state: &Arc<ProxyState>) {
    let config = state.config.clone();
    let port = state.admin_port;
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(port, config).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    });
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let (terminate, quit) = {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
        (
            async move {
                term.recv().await;
            },
            async move {
                quit.recv().await;
            },
        )
    };

    #[cfg(not(unix))]
    let (terminate, quit) = (std::future::pending::<()>(), std::future::pending::<()>());

    tokio::select! {
        _ = ctrl_c => info!("server: received SIGINT, shutting down"),
        _ = terminate => info!("server: received SIGTERM, shutting down"),
        _ = quit => info!("server: received SIGQUIT, shutting down"),
    }

    shutdown.notify_waiters();
}
