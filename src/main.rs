//! dnpwire - DNP3-style outstation
//!
//! Serves a configurable point database to masters over TCP.

use dnpwire_server::{Config, Server};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // A config file named in DNPWIRE_CONFIG must load; otherwise defaults apply.
    let config_path = std::env::var("DNPWIRE_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting dnpwire outstation");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Station address: {}", config.station.address);
    if config.station.accept_any_master {
        tracing::info!("  Masters: any");
    } else {
        tracing::info!("  Master address: {}", config.station.master_address);
    }
    tracing::info!(
        "  Points: {} binary inputs, {} binary outputs, {} counters, {} analog inputs",
        config.points.binary_inputs.len(),
        config.points.binary_outputs.len(),
        config.points.counters.len(),
        config.points.analog_inputs.len()
    );

    let server = Arc::new(Server::from_config(&config));

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping outstation...");
        shutdown_server.shutdown();
    });

    server.run().await?;

    let stats = server.stats();
    tracing::info!(
        "Outstation stopped after {} connections, {} requests",
        stats
            .connections_total
            .load(std::sync::atomic::Ordering::Relaxed),
        stats.requests_total.load(std::sync::atomic::Ordering::Relaxed)
    );
    Ok(())
}
