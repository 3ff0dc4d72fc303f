//! meshlaned — the meshlane daemon.
//!
//! # Usage
//!
//! ```text
//! meshlaned run --config meshlane.toml --port 9090
//! meshlaned check-config --config meshlane.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use meshlane_core::MeshConfig;
use meshlaned::{Mesh, RegistryMode, build_registry};

const DEFAULT_FILTER: &str = "info,meshlaned=debug,meshlane=debug";

#[derive(Parser)]
#[command(name = "meshlaned", about = "meshlane service discovery daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "meshlane.toml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: register, refresh periodically, serve the admin API.
    Run {
        /// Admin API port.
        #[arg(long, default_value = "9090")]
        port: u16,

        /// Registry backend.
        #[arg(long, value_enum, default_value_t = RegistryMode::Http)]
        registry: RegistryMode,
    },
    /// Validate the configuration and print it with defaults resolved.
    CheckConfig,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let result = match cli.command {
        Command::Run { port, registry } => run(&cli.config, port, registry).await,
        Command::CheckConfig => check_config(&cli.config),
    };

    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "meshlaned exiting");
    }
    result
}

fn load_config(path: &Path) -> anyhow::Result<MeshConfig> {
    MeshConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

async fn run(config_path: &Path, port: u16, mode: RegistryMode) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "meshlane daemon starting");

    let config = load_config(config_path)?;
    let registry = build_registry(mode, &config.registry);
    let mesh = Mesh::build(&config, registry);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    mesh.run(addr, shutdown_signal()).await?;

    info!("meshlane daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
    }
    info!("shutdown signal received");
}
