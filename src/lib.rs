// LicenseHub installer
// Library entry point: configuration, state and the HTTP server.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod i18n;
pub mod installation;
pub mod licensing;
pub mod models;
pub mod payment;
pub mod requirements;
pub mod routes;
pub mod security;
pub mod session;
pub mod utils;
pub mod wizard;

use anyhow::{Context, Result};
use log::{error, info};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;

use crate::models::state::AppState;

pub struct Server {
    state: AppState,
    address: SocketAddr,
}

impl Server {
    pub fn new(state: AppState, address: SocketAddr) -> Self {
        Self { state, address }
    }

    /// Serve until Ctrl+C or SIGTERM; in-flight requests are allowed to finish.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.address)
            .await
            .with_context(|| format!("Failed to bind {}", self.address))?;
        info!(
            "[PHASE: server] [STEP: listen] installer available at http://{}/install",
            self.address
        );

        let app = api::router(self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(e) = shutdown_signal().await {
                    error!("[PHASE: server] [STEP: shutdown] signal handler failed: {:#}", e);
                    std::future::pending::<()>().await;
                }
                info!("[PHASE: server] [STEP: shutdown] signal received, draining connections");
            })
            .await
            .context("HTTP server failed")?;

        info!("[PHASE: server] [STEP: shutdown] server stopped");
        Ok(())
    }
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        res = ctrl_c => res?,
        res = terminate => res?,
    }
    Ok(())
}
