//! vcbridge binary.
//!
//! Loads configuration, starts the bridge and serves the sidecar socket
//! until SIGINT/SIGTERM, then leaves the call.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use vcbridge_server::sidecar::{self, SidecarHub, SidecarPlatform};
use vcbridge_server::{load_config, Bridge, ChatPlatform, Services};

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("VCBRIDGE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn fail(context: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("vcbridge: {context}: {error}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = match load_config(selected_config_path) {
        Ok(config) => config,
        Err(e) => fail("invalid configuration", e),
    };

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let services = match Services::from_config(&config) {
        Ok(services) => services,
        Err(e) => fail("invalid voice configuration", e),
    };

    let (events_tx, events_rx) = mpsc::channel(256);
    let hub = SidecarHub::new(events_tx);
    let platform: Arc<dyn ChatPlatform> = Arc::new(SidecarPlatform::new(Arc::clone(&hub)));
    let bridge = Bridge::new(&config, platform, services);
    tokio::spawn(Arc::clone(&bridge).run(events_rx));

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => fail("failed to bind sidecar listener", e),
    };
    tracing::info!(%addr, voice = %config.channels.voice, "vcbridge listening for sidecar");

    if let Err(e) = axum::serve(listener, sidecar::router(hub))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
    }

    bridge.shutdown().await;
    tracing::info!("vcbridge shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
