//! atlink operator console
//!
//! Opens an SSH session to a RouterOS router and relays AT commands to its
//! cellular modem.
//!
//! - `exec`: run one AT command and print the output
//! - `signal`: print a parsed signal snapshot (text or JSON)
//! - `console`: interactive command loop on stdin
//!
//! Logs go to stderr so command output on stdout can be piped.

mod console;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use atlink_core::config::AtlinkConfig;
use atlink_core::service::{ConnectRequest, ModemService};
use atlink_core::ssh::OpenSshTransport;

/// AT command console for router-embedded cellular modems.
#[derive(Parser, Debug)]
#[command(name = "atlink", about = "AT command console for router-embedded modems")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Router address.
    #[arg(long, env = "ATLINK_HOST")]
    host: String,

    /// SSH port.
    #[arg(long, default_value_t = 22)]
    port: u16,

    /// SSH user.
    #[arg(long, env = "ATLINK_USER", default_value = "admin")]
    user: String,

    /// RouterOS LTE interface the modem is attached to.
    #[arg(long, default_value = "lte1")]
    interface: String,

    /// Environment variable holding the SSH password.
    #[arg(long, default_value = "ATLINK_PASSWORD")]
    password_env: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one AT command and print its output.
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        at: Vec<String>,
    },
    /// Print a parsed signal snapshot.
    Signal {
        /// Emit JSON instead of a text summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Read AT commands from stdin until EOF or `/quit`.
    Console,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AtlinkConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AtlinkConfig::default(),
    };
    let password = std::env::var(&cli.password_env)
        .with_context(|| format!("password not set, export {}", cli.password_env))?;

    tracing::info!(
        host = %cli.host,
        port = cli.port,
        user = %cli.user,
        interface = %cli.interface,
        "atlink starting"
    );

    let transport = Arc::new(OpenSshTransport::new(config.ssh.clone()));
    let service = Arc::new(ModemService::new(transport, config));

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = service.spawn_sweeper(shutdown_rx);

    let request = ConnectRequest {
        host: cli.host.clone(),
        port: Some(cli.port),
        username: cli.user.clone(),
        password,
        interface: cli.interface.clone(),
    };

    // ── Shutdown handling ───────────────────────────────────────
    let result = tokio::select! {
        result = run(&service, &cli.command, request) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    service.shutdown().await;
    if let Err(e) = sweeper.await {
        tracing::error!("sweeper task failed: {e}");
    }

    tracing::info!("atlink stopped");
    result
}

async fn run(
    service: &ModemService,
    command: &Command,
    request: ConnectRequest,
) -> anyhow::Result<()> {
    let opened = service.create_session(request).await?;
    eprintln!("{}", opened.preview.trim_end());

    let token = opened.token.as_str();
    let result = async {
        match command {
            Command::Exec { at } => {
                let output = service.run_command(token, &at.join(" ")).await?;
                println!("{}", output.trim_end());
            }
            Command::Signal { json } => {
                let snapshot = service.fetch_signal_snapshot(token).await?;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                } else {
                    print!("{}", render::summary(&snapshot));
                }
            }
            Command::Console => console::run(service, token).await?,
        }
        anyhow::Ok(())
    }
    .await;

    service.end_session(token).await;
    result
}
