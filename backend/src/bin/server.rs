//! IBP XYZ HTTP Server Binary
//!
//! Loads configuration, builds the transport and serves the REST API.
//!
//! # Usage
//!
//! ```bash
//! # Against SAP IBP
//! SAP_API_URL=https://.../ZSALES SAP_WRITE_API_URL=https://.../IBP_PLANNING_DATA_API_SRV \
//!   SAP_USERNAME=user SAP_PASSWORD=secret cargo run --bin ibp-xyz-server
//!
//! # In-memory backend seeded from a JSON file
//! IBP_BACKEND=local IBP_LOCAL_DATA=observations.json cargo run --bin ibp-xyz-server
//! ```
//!
//! # Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 8000)
//! - `IBP_CONFIG`: Path to a TOML configuration file
//! - `RUST_LOG`: Log filter (default: info)

use std::net::SocketAddr;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ibp_xyz::config::AppConfig;
use ibp_xyz::http::{create_router, AppState};
use ibp_xyz::sap::TransportFactory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting IBP XYZ HTTP Server");

    let config = AppConfig::load()?;
    let transport = TransportFactory::from_settings(&config.sap)?;
    info!("Transport initialized (backend: {})", config.sap.backend);

    let validation = config.validate_write_settings();
    if !validation.missing.is_empty() {
        tracing::warn!("Write-back not fully configured, missing: {:?}", validation.missing);
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(config, transport);
    let app = create_router(state);

    info!("Server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
