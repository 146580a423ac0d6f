//! Fabric control plane entry point.
//!
//! Bootstraps the store, the HA coordinator, the rate limiter, and the
//! lighthouse Supervisor, then starts the Axum HTTP server with graceful
//! shutdown. Background tasks (heartbeat, prune, supervisor tick, rate
//! limit eviction) all select on one shutdown watch channel so `Stop` is
//! prompt and uniform across subsystems.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use fabric_core::ha::HaConfig;
use fabric_core::ratelimit::{RateLimitConfig, RateLimiter};
use fabric_store::Store;

use fabric_server::config::ServerConfig;
use fabric_server::ha::HaCoordinator;
use fabric_server::hardening;
use fabric_server::routes::build_router;
use fabric_server::state::AppState;
use fabric_server::supervisor::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("failed to load configuration")?;

    // Hardening runs before logging is initialized, so it reports warnings
    // on stderr directly.
    hardening::apply(config.disable_mlock);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .json()
        .init();

    info!(instance_id = %config.instance_id, mode = ?config.mode, "fabric-server starting");

    let config = Arc::new(config);
    let store = Arc::new(
        Store::connect(&config.database_path)
            .await
            .context("failed to open store")?,
    );

    let ha_config = HaConfig {
        instance_id: config.instance_id.clone(),
        address: config.address.clone(),
        mode: config.mode,
        heartbeat_interval: config.heartbeat_interval,
        heartbeat_threshold: config.heartbeat_threshold,
        prune_interval: config.prune_interval,
        prune_multiplier: config.prune_multiplier,
    };
    let ha = Arc::new(HaCoordinator::new(Arc::clone(&store), ha_config));
    ha.start().await.context("HA startup failed")?;

    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));

    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&store),
        config.instance_id.clone(),
        PathBuf::from(&config.supervisor_base_dir),
        config.lighthouse_binary.clone(),
    ));

    let state = Arc::new(AppState::new(
        Arc::clone(&store),
        Arc::clone(&ha),
        Arc::clone(&supervisor),
        Arc::clone(&rate_limiter),
        Arc::clone(&config),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat_handle = tokio::spawn({
        let ha = Arc::clone(&ha);
        let shutdown = shutdown_rx.clone();
        async move { ha.run_heartbeat_task(shutdown).await }
    });
    let prune_handle = tokio::spawn({
        let ha = Arc::clone(&ha);
        let shutdown = shutdown_rx.clone();
        async move { ha.run_prune_task(shutdown).await }
    });
    let supervisor_handle = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        let shutdown = shutdown_rx.clone();
        let interval = config.supervisor_tick_interval;
        async move { supervisor.run(interval, shutdown).await }
    });
    let eviction_handle = tokio::spawn({
        let rate_limiter = Arc::clone(&rate_limiter);
        let shutdown = shutdown_rx.clone();
        let interval = config.rate_limit_eviction_interval;
        let idle_threshold = config.rate_limit_idle_threshold;
        async move { rate_limiter.run_eviction_task(interval, idle_threshold, shutdown).await }
    });

    let app = build_router(Arc::clone(&state));
    let listen_addr: SocketAddr = config.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "fabric-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx))
    .await
    .context("server error")?;

    info!("waiting for background tasks to stop");
    let _ = tokio::time::timeout(
        Duration::from_secs(10),
        futures::future::join4(heartbeat_handle, prune_handle, supervisor_handle, eviction_handle),
    )
    .await;

    ha.stop().await;
    info!("fabric-server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown to every background
/// task and to Axum's graceful-shutdown future.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, draining in-flight requests");
    let _ = shutdown_tx.send(true);
}
