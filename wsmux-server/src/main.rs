//! wsmux server - WebSocket terminal session multiplexer

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use wsmux_utils::{init_logging_with_config, LogConfig, Result, WsmuxError};

mod bridge;
mod cli;
mod config;
mod http;
mod observability;
mod project;
mod pty;
mod session;

use cli::Args;
use config::{ConfigLoader, DEFAULT_CONFIG_TOML};
use http::AppState;
use project::DirectoryResolver;
use session::SessionRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", DEFAULT_CONFIG_TOML);
        return Ok(());
    }

    let mut app_config = ConfigLoader::load_and_validate(args.config.as_deref())?;
    args.apply(&mut app_config);
    ConfigLoader::validate(&app_config)?;

    init_logging_with_config(LogConfig::server(
        app_config.logging.output,
        app_config.logging.filter.clone(),
    ))?;

    let addr = app_config.server.listen_addr().ok_or_else(|| {
        WsmuxError::config(format!("Invalid listen address: {}", app_config.server.listen))
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind {}: {}", addr, e);
        WsmuxError::Io(e)
    })?;

    info!(
        projects_root = %app_config.projects.root.display(),
        idle_timeout_secs = app_config.sessions.idle_timeout_secs,
        shell = %app_config.sessions.shell,
        "Starting wsmux server"
    );

    let registry = SessionRegistry::new(app_config.sessions.clone());
    let resolver = Arc::new(DirectoryResolver::new(
        app_config.projects.root.clone(),
        app_config.projects.create_missing,
    ));
    let state = AppState::new(registry.clone(), resolver);

    // Sessions are torn down inside the shutdown future so attached
    // connections see their exit before the listener stops.
    let shutdown = async move {
        wait_for_shutdown_signal().await;
        info!(sessions = registry.len(), "Shutting down");
        registry.shutdown().await;
    };

    http::serve(listener, state, shutdown).await?;

    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
