use anyhow::{Context, Result};
use clap::Parser;
use filesync::client::spawn_workers;
use filesync::config::{ClientConfig, DEFAULT_CLIENT_CONFIG};
use std::path::PathBuf;
use tracing::{info, warn};

/// Mirror monitored trees from a filesyncd server.
#[derive(Parser, Debug)]
#[command(name = "filesync", version, about)]
struct Cli {
    /// Client configuration file
    #[arg(default_value = DEFAULT_CLIENT_CONFIG)]
    config: PathBuf,

    /// Server address (overrides the config file)
    #[arg(long, env = "FILESYNC_IP")]
    ip: Option<String>,

    /// Server port (overrides the config file)
    #[arg(long, env = "FILESYNC_PORT")]
    port: Option<u16>,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    filesync::logging::init(cli.verbose, cli.quiet);

    let mut config = ClientConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(ip) = cli.ip {
        config.ip = ip;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let workers = spawn_workers(&config)?;
    info!(workers = workers.len(), server = %config.base_url(), "Client started");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
        }
        results = futures::future::join_all(workers) => {
            for result in results {
                if let Err(e) = result {
                    warn!("Worker stopped: {}", e);
                }
            }
        }
    }

    Ok(())
}
