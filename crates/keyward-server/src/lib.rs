//! keyward-server: the HTTP front end of the certificate pipeline.
//!
//! Loads `server.toml`, builds the [`Issuer`] and serves the API over TLS
//! (or plain HTTP with `tls_disable`). SIGINT or SIGTERM stop accepting
//! connections and cancel requests that have not started signing.

pub mod api;
pub mod config;
pub mod hash;
pub mod telemetry;
pub mod tls;

use std::sync::Arc;

use anyhow::{Context, Result};
use keyward_core::Issuer;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::tls::TlsListener;

/// Builds the pipeline and serves until shutdown.
pub async fn run(config: ServerConfig) -> Result<()> {
    let issuer = Issuer::from_config(&config.service).context("failed to initialize backends")?;
    info!(issuer = ?issuer, "pipeline ready");

    let tls_config = config
        .tls_paths()
        .map(|(cert, key)| tls::load_server_config(cert, key))
        .transpose()
        .context("failed to load TLS certificate")?;

    let listener = TcpListener::bind(config.address)
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;

    let shutdown = CancellationToken::new();
    let app = api::router(AppState::new(Arc::new(issuer), shutdown.clone()));
    tokio::spawn(watch_signals(shutdown.clone()));

    match tls_config {
        Some(tls_config) => {
            info!("keyward-server listening on {} (tls)", config.address);
            let listener =
                TlsListener::new(listener, tls_config).context("failed to start TLS listener")?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await?;
        }
        None => {
            warn!("keyward-server listening on {} without tls", config.address);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await?;
        }
    }

    info!("keyward-server stopped");
    Ok(())
}

async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
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
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
    shutdown.cancel();
}
