//! Gather inquiry relay server.
//!
//! Configuration comes from an optional JSON file named by `GATHER_CONFIG`
//! and `GATHER_*` environment overrides. Log verbosity follows `RUST_LOG`.

use std::sync::Arc;

use gather_inquiry::http::{self, AppState};
use gather_inquiry::{DeliveryOrchestrator, InquiryConfig, RelayClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = InquiryConfig::from_env()?;

    tracing::info!(
        relay = %config.relay.address(),
        tls = ?config.relay.tls.mode,
        from = %config.mailboxes.from_address,
        notify = %config.mailboxes.notification_address,
        "relay configured"
    );

    let client = RelayClient::new(config.relay.clone(), &config.mailboxes)?;
    let orchestrator = DeliveryOrchestrator::new(config.mailboxes.clone(), Arc::new(client));
    let state = AppState::new(orchestrator, config.server.allowed_origins.clone());

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Gather API listening on {}", listener.local_addr()?);

    http::serve(listener, state, http::shutdown_signal()).await?;
    Ok(())
}
