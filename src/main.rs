//! Main entry point for the mix-downloader CLI

use clap::Parser;
use mix_downloader::cli::{Cli, Commands};
use mix_downloader::shutdown::ShutdownCoordinator;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mix_downloader=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = mix_downloader::metrics::init_metrics(addr).await {
            warn!(error = %e, "Metrics exporter unavailable, continuing without it");
        }
    }

    let shutdown = ShutdownCoordinator::shared();
    shutdown.install_ctrl_c_handler();

    // A second Ctrl+C abandons the graceful drain
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.wait_for_shutdown().await;
            if tokio::signal::ctrl_c().await.is_ok() {
                error!("Second Ctrl+C received - exiting without waiting for downloads");
                std::process::exit(130);
            }
        });
    }

    let result = match cli.command {
        Commands::Download(ref args) => args
            .execute(&cli, shutdown.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Validate(ref validate_cmd) => validate_cmd
            .execute(&cli.data_dir)
            .await
            .map_err(|e| anyhow::anyhow!(e)),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
