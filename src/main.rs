//! Card Sync Server
//!
//! Runs the sync hub behind a WebSocket listener.
//! Games are registered by the embedding rules engine; this binary accepts
//! actions and logs them.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use card_sync::{
    network::{LogActions, SyncHub, SyncServer},
    telemetry::{FanoutTelemetry, MetricsCollector, TracingTelemetry},
    SyncConfig, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let default_filter = if cfg!(feature = "debug-tracing") {
        "card_sync=trace,info"
    } else {
        "card_sync=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let config = SyncConfig::from_env();
    info!("Card Sync Server v{}", VERSION);
    info!("Codec: {}", config.protocol.codec);
    info!(
        "Compression threshold: {} bytes, max message: {} bytes",
        config.protocol.compression_threshold, config.protocol.max_message_size
    );

    let metrics = Arc::new(MetricsCollector::new());
    let telemetry = Arc::new(
        FanoutTelemetry::new()
            .with(Arc::new(TracingTelemetry))
            .with(metrics.clone()),
    );

    let hub = Arc::new(
        SyncHub::new(&config, Arc::new(LogActions), telemetry).context("building sync hub")?,
    );
    let server = SyncServer::new(config.server.clone(), hub);

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            shutdown.cancel();
        }
    });

    server.run().await.context("running sync server")?;

    let snapshot = metrics.snapshot();
    info!(
        "Served {} connections, {} messages in, {} out, {} security denials",
        snapshot.connections, snapshot.messages_received, snapshot.messages_sent, snapshot.security_denials
    );
    Ok(())
}
