use anyhow::{Context, Result};
use clap::Parser;
use filesync::config::{ServerConfig, DEFAULT_SERVER_CONFIG};
use filesync::server::run_server;
use std::path::PathBuf;

/// Serve the index and content of monitored trees.
#[derive(Parser, Debug)]
#[command(name = "filesyncd", version, about)]
struct Cli {
    /// Server configuration file
    #[arg(default_value = DEFAULT_SERVER_CONFIG)]
    config: PathBuf,

    /// Listen address (overrides the config file)
    #[arg(long, env = "FILESYNCD_IP")]
    ip: Option<String>,

    /// Listen port (overrides the config file)
    #[arg(long, env = "FILESYNCD_PORT")]
    port: Option<u16>,

    /// Debug logging, including every request
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

    let mut config = ServerConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(ip) = cli.ip {
        config.ip = ip;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    run_server(config).await
}
