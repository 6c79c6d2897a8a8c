//! popbridge - POP3 server entry point

use anyhow::{Context, Result};
use popbridge_common::config::{Config, LoggingConfig};
use popbridge_core::{create_tls_acceptor, Pop3Config, Pop3Server, Verifier};
use popbridge_storage::StoreProvider;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    init_logging(&config.logging);

    info!("Starting popbridge POP3 server...");

    config.validate().context("Invalid configuration")?;
    for warning in config.warnings() {
        warn!("{}", warning);
    }

    // Message storage
    let provider = StoreProvider::from_config(&config.storage)?;
    info!(backend = ?config.storage.backend, "Message store configured");

    // Credential verification
    let verifier = Verifier::from_config(&config.auth, provider)?;
    info!(strategy = verifier.name(), "Credential verifier configured");

    let mut server = Pop3Server::new(Pop3Config::from_config(&config), verifier);
    if let Some(tls) = &config.tls {
        server = server.with_tls(create_tls_acceptor(tls)?);
        info!("TLS enabled");
    }

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await?;

    info!("popbridge shutdown complete");

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
