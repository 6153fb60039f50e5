//! Server lifecycle management
//!
//! Binds the HTTP listener, serves the router and drains in-flight flows
//! when a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use idlink_api::{create_router, AppState};
use idlink_core::{bootstrap::Services, Config};

/// `idlink` server
pub struct IdlinkServer {
    config: Config,
    services: Services,
    shutdown: CancellationToken,
}

impl IdlinkServer {
    pub fn new(config: Config, services: Services) -> Self {
        Self {
            config,
            services,
            shutdown: CancellationToken::new(),
        }
    }

    /// Serve until SIGINT/SIGTERM, then cancel every running flow
    pub async fn run(self) -> anyhow::Result<()> {
        let http_address = self.config.http_address();
        let http_addr: SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;

        let listener = tokio::net::TcpListener::bind(http_addr).await.map_err(|e| {
            error!("Failed to bind HTTP address {}: {}", http_addr, e);
            anyhow::anyhow!("Failed to bind {http_addr}: {e}")
        })?;

        let state = AppState::new(Arc::clone(&self.services.engine), self.shutdown.clone());
        let router = create_router(state);

        info!(
            providers = ?self.services.registry.list_names(),
            "HTTP server listening on {}", http_addr
        );

        let shutdown = self.shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                info!("Shutdown signal received, starting graceful shutdown...");
                // In-flight flows observe the cancellation and return promptly
                shutdown.cancel();
            })
            .await
            .map_err(|e| {
                error!("HTTP server error: {}", e);
                anyhow::anyhow!("HTTP server error: {e}")
            })?;

        info!("idlink server shut down complete");
        Ok(())
    }
}

async fn shutdown_signal() {
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
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
