//! skirmishd - tabletop combat server daemon

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use skirmish::{Config, Server};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tabletop combat server
#[derive(Parser, Debug)]
#[command(name = "skirmishd", version, about = "Serve tabletop combat sessions")]
struct Args {
    /// TOML config file (default: skirmish.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// JSON reference library (default: bundled starter library)
    #[arg(short, long)]
    reference: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "skirmish=info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // Defaults, then file, then environment, then flags
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(reference) = args.reference {
        config.reference_path = Some(reference);
    }
    info!("starting with {:?}", config);

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
