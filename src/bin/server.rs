//! SOCKS5 relay server binary.
//!
//! Usage: socks-relay [OPTIONS]
//!
//! Options:
//!   -b, --bind <ADDR>         Listen address (default 0.0.0.0:1080)
//!   -c, --config <FILE>       Path to a TOML configuration file
//!   -g, --generate            Print a default configuration and exit
//!   -l, --log-level <LEVEL>   Log level when RUST_LOG is unset (default info)

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;

use socks_relay::server::{Server, ServerConfig, ServerConfigFile};

#[derive(Debug, Parser)]
#[command(name = "socks-relay", version, about = "Minimal SOCKS5 CONNECT relay")]
struct Args {
    /// Listen address; overrides the config file.
    #[arg(short, long, env = "SOCKS_RELAY_BIND")]
    bind: Option<String>,

    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a default configuration and exit.
    #[arg(short, long)]
    generate: bool,

    /// Log level used when RUST_LOG is not set.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    if args.generate {
        return generate_config();
    }

    let config = load_config(&args)?;
    run_server(config).await
}

fn generate_config() -> anyhow::Result<()> {
    let file = ServerConfigFile::from_config(&ServerConfig::default());

    println!("# SOCKS relay configuration");
    println!("# 0 disables drain_timeout_ms / connect_timeout_ms");
    println!();
    println!("{}", file.to_toml()?);

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            ServerConfigFile::from_toml(&content)?.to_config()?
        }
        None => ServerConfig::default(),
    };

    if let Some(bind) = &args.bind {
        config.set_bind(bind)?;
    }

    config.validate()?;
    Ok(config)
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    tracing::info!("Starting SOCKS relay on {}", config.bind_addr());
    if let Some(drain) = config.drain_timeout {
        tracing::info!("Relay drain timeout: {}ms", drain.as_millis());
    }

    let bound = Server::new(config).bind().await?;
    let metrics = bound.metrics();

    // In-flight relays are not drained on shutdown.
    tokio::select! {
        result = bound.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    println!("{}", metrics.format_report());
    Ok(())
}
