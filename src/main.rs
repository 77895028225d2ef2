use std::path::PathBuf;

use anyhow::Context;
use redolink_common::{DiscardSink, Shutdown};
use redolink_engine::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("redolink.toml"));
    let text = std::fs::read_to_string(&config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let config = Config::from_toml(&text).context("invalid configuration")?;

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                shutdown.request();
            }
        });
    }

    info!(database = %config.database, "redolink starting");
    // The discard sink stands in until a real sink is attached; it counts
    // what would have been delivered.
    let sink = Box::new(DiscardSink::default());
    redolink_engine::run(config, sink, shutdown)
        .await
        .context("replication failed")?;
    Ok(())
}
