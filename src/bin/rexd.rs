//! REX Daemon - Client registry and liveness prober
//!
//! This binary accepts heartbeat clients over TCP, assigns each one a short
//! id, and pings every registered client until its connection goes away.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! rexd start
//!
//! # Start on another port, pinging every 500ms, with JSON logs
//! rexd --json start --addr 127.0.0.1:9000 --ping-interval-ms 500
//!
//! # Start the daemon (background/daemonized)
//! rexd start -d
//!
//! # Stop the daemon
//! rexd stop
//!
//! # Check daemon status
//! rexd status
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rexd::config::{DaemonConfig, DEFAULT_HTTP_ADDR};
use rexd::registry::spawn_default_registry;
use rexd::server::{HeartbeatServer, HttpPlaceholder};

/// REX daemon - client registry and liveness prober
#[derive(Parser, Debug)]
#[command(name = "rexd", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start(StartArgs),
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

#[derive(Args, Debug, Default)]
struct StartArgs {
    /// Heartbeat listen address [default: $REX_ADDR or 0.0.0.0:8080]
    #[arg(long)]
    addr: Option<String>,

    /// HTTP placeholder listen address [default: 0.0.0.0:8081]
    #[arg(long)]
    http_addr: Option<String>,

    /// Milliseconds between pings [default: 2000]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    ping_interval_ms: Option<u64>,

    /// Milliseconds a new connection has to register [default: 10000]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    handshake_timeout_ms: Option<u64>,

    /// Run as a background daemon (fork to background)
    #[arg(short = 'd', long)]
    daemon: bool,
}

impl StartArgs {
    fn daemon_config(&self) -> DaemonConfig {
        let mut config = DaemonConfig::from_env();
        if let Some(addr) = &self.addr {
            config.listen_addr = addr.clone();
        }
        if let Some(ms) = self.ping_interval_ms {
            config.session.ping_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.handshake_timeout_ms {
            config.session.handshake_timeout = Duration::from_millis(ms);
        }
        config
    }

    fn http_addr(&self) -> &str {
        self.http_addr.as_deref().unwrap_or(DEFAULT_HTTP_ADDR)
    }
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("rex")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("rexd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("rexd.log")
}

fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // Signal 0 only checks that the process exists
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = cli
        .command
        .unwrap_or_else(|| Command::Start(StartArgs::default()));

    match command {
        Command::Start(start) => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'rexd stop' to stop it first.");
                process::exit(1);
            }

            if start.daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(start, cli.verbose, cli.json);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                println!("Log: {}", log_file_path().display());
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("rexd={level}").parse()?)
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
async fn run_daemon(start: StartArgs, verbose: bool, json: bool) -> Result<()> {
    init_logging(verbose, json)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "REX daemon starting"
    );

    let config = start.daemon_config();
    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_default_registry();
    info!("Client registry started");

    let http = HttpPlaceholder::bind(start.http_addr(), cancel_token.clone())
        .await
        .context("Failed to start HTTP listener")?;
    let http_handle = tokio::spawn(http.run());

    info!(
        addr = %config.listen_addr,
        ping_interval_ms = config.session.ping_interval.as_millis() as u64,
        "Starting heartbeat server"
    );

    let server = HeartbeatServer::bind(config, registry, cancel_token.clone())
        .await
        .context("Failed to start heartbeat server")?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        cancel_token.cancel();
        return Err(e.into());
    }

    let _ = http_handle.await;

    info!("REX daemon stopped");
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

#[cfg(test)]
mod tests {
    use super::*;

    fn start_args(args: &[&str]) -> StartArgs {
        let mut argv = vec!["rexd", "start"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Some(Command::Start(start)) => start,
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_ping_interval_rejected() {
        let result = Cli::try_parse_from(["rexd", "start", "--ping-interval-ms", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_handshake_timeout_rejected() {
        let result = Cli::try_parse_from(["rexd", "start", "--handshake-timeout-ms", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_start_flags_override_config() {
        let start = start_args(&[
            "--addr",
            "127.0.0.1:9000",
            "--ping-interval-ms",
            "500",
            "--handshake-timeout-ms",
            "1500",
        ]);
        let config = start.daemon_config();

        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.session.ping_interval, Duration::from_millis(500));
        assert_eq!(config.session.handshake_timeout, Duration::from_millis(1500));
        assert_eq!(start.http_addr(), DEFAULT_HTTP_ADDR);
    }
}
