//! netwarden CLI.

use anyhow::{Context, Result};
use clap::Parser;
use netwarden::providers::checker::CachedProvider;
use netwarden::providers::ReputationProvider;
use netwarden::{rpc, Config, Monitor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "netwarden")]
#[command(about = "Monitor a process's connections, classify remote IPs via reputation services, and block VPN/proxy traffic")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "netwarden.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let provider = Arc::new(CachedProvider::new(&config.provider));
    info!(provider = provider.name(), "Reputation provider ready");

    // The one fatal path: the initial session with the enforcement daemon.
    let session = rpc::establish(&config.monitor)
        .await
        .with_context(|| {
            format!(
                "failed to connect to enforcement daemon at {}:{}",
                config.monitor.host, config.monitor.port
            )
        })?;

    let monitor = Monitor::new(Arc::new(session), provider, &config);
    monitor.run().await;

    Ok(())
}
