//! REX client - Registers with a heartbeat daemon and stays connected
//!
//! # Usage
//!
//! ```text
//! rex                          # Connect to $REX_ADDR or 127.0.0.1:8080
//! rex --addr 10.0.0.5:8080     # Connect elsewhere
//! rex --echo-pong              # Answer every ping
//! ```
//!
//! Exits when the daemon closes the connection or on Ctrl+C / SIGTERM
//! (after sending `REX CLOSE`).

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rex_client::{ClientConfig, HeartbeatClient};

/// REX client - stays registered with a heartbeat daemon
#[derive(Parser, Debug)]
#[command(name = "rex", version, about)]
struct Cli {
    /// Daemon address [default: $REX_ADDR or 127.0.0.1:8080]
    #[arg(long)]
    addr: Option<String>,

    /// Answer each PING with a PONG
    #[arg(long)]
    echo_pong: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        if let Some(addr) = &self.addr {
            config.addr = addr.clone();
        }
        config.echo_pong = self.echo_pong;
        config
    }
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("rex={level}").parse()?)
        .add_directive(format!("rex_client={level}").parse()?)
        .add_directive(format!("rex_protocol={level}").parse()?);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json)?;

    let config = cli.client_config();
    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        shutdown_token.cancel();
    });

    info!(addr = %config.addr, "REX client starting");

    HeartbeatClient::run(config, cancel_token)
        .await
        .context("Heartbeat client failed")?;

    info!("REX client stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
