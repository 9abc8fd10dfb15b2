use gbx_client::GbxClient;
use status_poller::config::StatusConfig;
use status_poller::{status_channel, Poller, StatusReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration, then let the environment override the server
    let mut config = load_config()?;
    config.gbx.apply_env()?;

    // Initialize logging
    init_logging(&config);

    info!("Status poller v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Game server at {} (user {})", config.gbx.addr(), config.gbx.user);

    let client = GbxClient::new(config.gbx.clone(), config.timeouts.into());
    let (publisher, reader) = status_channel();
    let poller = Poller::new(client, publisher, config.poller.interval());

    let cancel = CancellationToken::new();
    let poller_task = tokio::spawn(poller.run(cancel.clone()));
    let report_task = tokio::spawn(report_changes(reader));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    cancel.cancel();
    if let Err(e) = poller_task.await {
        error!("Poller task failed: {}", e);
    }
    // The reporter ends once the poller drops the publisher
    if let Err(e) = report_task.await {
        error!("Reporter task failed: {}", e);
    }

    Ok(())
}

/// Logs every snapshot the poller publishes
async fn report_changes(mut reader: StatusReader) {
    while reader.changed().await {
        let snapshot = reader.current();
        match serde_json::to_string(&*snapshot) {
            Ok(json) => info!("Server status: {}", json),
            Err(e) => warn!("Could not serialize status: {}", e),
        }
    }
}

fn load_config() -> anyhow::Result<StatusConfig> {
    // Try to load from /etc/tmnf-dashboard/status.toml first (production)
    if let Ok(config) = StatusConfig::from_file("/etc/tmnf-dashboard/status.toml") {
        info!("Loaded config from /etc/tmnf-dashboard/status.toml");
        return Ok(config);
    }

    // Try configs/status.toml (development)
    if let Ok(config) = StatusConfig::from_file("configs/status.toml") {
        info!("Loaded config from configs/status.toml");
        return Ok(config);
    }

    // Try ./status.toml (current directory)
    if let Ok(config) = StatusConfig::from_file("status.toml") {
        info!("Loaded config from status.toml");
        return Ok(config);
    }

    // Use default config as last resort
    warn!("No config file found, using defaults and XMLRPC_* environment");
    Ok(StatusConfig::default_config())
}

fn init_logging(config: &StatusConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level));

    if config.logging.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }
}
