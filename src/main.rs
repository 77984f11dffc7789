use anyhow::{Context, Result};
use clap::Parser;
use ripd::{Config, Eventloop};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// A RIPv2-style distance-vector routing daemon for integer router
/// identities on a local UDP transport.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    config: PathBuf,

    /// Log debug output; repeat for trace output.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let eventloop = Eventloop::new(&config, shutdown_rx)?;

    tracing::info!(
        router_id = config.router_id,
        ports = ?config.incoming_ports,
        "daemon started"
    );

    let mut task = tokio::spawn(eventloop.run());

    tokio::select! {
        result = &mut task => {
            result.context("event loop panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            let _ = shutdown_tx.send(true);
            task.await.context("event loop panicked")??;
        }
    }

    Ok(())
}
