use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use consultai_core::config::{AppConfig, ConfigOverrides, LoadOptions, StorageBackend};
use consultai_server::{bootstrap_with_config, logging, router};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "consultai-server", version, about = "Consulting assistant HTTP server")]
struct Args {
    /// Path to a TOML config file. Defaults to ./consultai.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
    /// memory or database
    #[arg(long)]
    storage: Option<StorageBackend>,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn load_options(self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config,
            overrides: ConfigOverrides {
                storage_backend: self.storage,
                database_url: self.database_url,
                log_level: self.log_level,
                server_port: self.port,
                ..ConfigOverrides::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.load_options())?;
    logging::init(&config.logging);

    let app = bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("could not bind {address}"))?;

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "consultai-server listening"
    );

    axum::serve(listener, router(app.state, &app.config.server))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    info!(event_name = "system.server.stopped", correlation_id = "shutdown", "consultai-server stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(event_name = "system.server.signal_failed", error = %error, "ctrl-c handler failed");
        return;
    }
    info!(event_name = "system.server.stopping", correlation_id = "shutdown", "shutdown requested");
}
