//! Chapper Server - Main Entry Point

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use chapper_server::{api, bridge, config, signaling, turn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (required for WebRTC)
    let _ =
        rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chapper_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Chapper Server"
    );

    // The relay must be up before clients are told about it
    let relay = if config.turn_enabled {
        let relay = turn::TurnServer::from_config(&config)?;
        relay.run().await?;
        if !config.has_turn_credentials() {
            warn!("TURN_USERNAME/TURN_CREDENTIAL not set, relay allocations will be rejected");
        }
        Some(relay)
    } else {
        info!("TURN relay disabled by configuration");
        None
    };

    let sessions = bridge::WebRtcFactory::new(&config)?;
    let hub = signaling::Hub::new(config.token_ttl);
    let bridge = bridge::Bridge::new(Arc::new(sessions), config.token_ttl);

    // Build application state
    let state = api::AppState::new(config.clone(), hub, bridge);

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    if let Some(relay) = relay {
        relay.close().await?;
    }

    info!("Server shutdown complete");

    Ok(())
}
