//! Signaling peer - hosts named endpoints against a relay
//!
//! Usage:
//!   signal_peer --endpoint V1 --endpoint V2
//!   signal_peer --config config/signaling.toml --send V1:V3:offer --data '{"sdp":"..."}'

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde_json::Value;
use signaling::{Endpoint, EndpointDirectory, HttpRelay, MessageHandler, SignalingConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "signal_peer")]
#[command(about = "Host signaling endpoints against a polling relay")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Relay base URL, overrides the configuration file
    #[arg(long)]
    relay_url: Option<String>,

    /// Endpoint name to host (repeatable)
    #[arg(short, long = "endpoint")]
    endpoints: Vec<String>,

    /// Send one message after startup, as FROM:TARGET:OPERATION
    #[arg(long)]
    send: Option<String>,

    /// JSON payload for --send
    #[arg(long, requires = "send")]
    data: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Logs every inbound message
struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn receive(&self, endpoint: &Endpoint, from: &str, operation: &str, data: Value) {
        info!(
            endpoint = endpoint.name(),
            from,
            operation,
            data = %data,
            "Received"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = match &args.config {
        Some(path) => SignalingConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => SignalingConfig::default(),
    };
    if let Some(url) = &args.relay_url {
        config.relay.url = url.clone();
    }
    for name in &args.endpoints {
        if !config.endpoints.contains(name) {
            config.endpoints.push(name.clone());
        }
    }
    config.validate()?;

    if config.endpoints.is_empty() {
        bail!("No endpoints configured; pass --endpoint or list them in the config file");
    }

    let relay = Arc::new(HttpRelay::from_config(&config.relay)?);
    let handler: Arc<dyn MessageHandler> = Arc::new(LoggingHandler);
    let directory = EndpointDirectory::new();

    for name in &config.endpoints {
        Endpoint::builder(name.as_str())
            .shared_relay(relay.clone())
            .shared_handler(handler.clone())
            .with_config(&config.relay)
            .spawn(&directory)?;
    }
    info!(
        "Hosting {} endpoints against {}",
        directory.len(),
        config.relay.url
    );

    if let Some(route) = &args.send {
        send_once(&directory, route, args.data.as_deref()).await?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    info!("Received shutdown signal");

    directory.shutdown().await;
    Ok(())
}

async fn send_once(directory: &EndpointDirectory, route: &str, data: Option<&str>) -> Result<()> {
    let parts: Vec<&str> = route.splitn(3, ':').collect();
    let [from, target, operation] = parts.as_slice() else {
        bail!("--send expects FROM:TARGET:OPERATION, got '{}'", route);
    };

    let Some(endpoint) = directory.lookup(from) else {
        bail!("'{}' is not a hosted endpoint", from);
    };

    let data = data
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--data is not valid JSON")?;

    if let Err(e) = endpoint.send(target, operation, data)?.await {
        warn!("Send task did not complete: {}", e);
    }
    Ok(())
}

/// RUST_LOG wins over --log-level when set
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
