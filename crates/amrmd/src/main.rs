//! amrmd — the AMRM daemon.
//!
//! Serves the application master heartbeat protocol:
//! - protocol listener (register, allocate, finish)
//! - admin listener (attempt admission and retirement)
//! - attempt event drain
//!
//! # Usage
//!
//! ```text
//! amrmd serve --config /etc/amrm/amrm.toml
//! amrmd serve --address 0.0.0.0:8030 --client-thread-count 16
//! amrmd check-config --config /etc/amrm/amrm.toml
//! ```

mod daemon;
mod standalone;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use amrm_core::AmrmConfig;
use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,amrmd=debug,amrm=debug";

#[derive(Parser)]
#[command(name = "amrmd", about = "Application master heartbeat protocol daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the protocol until interrupted.
    Serve(ServeArgs),

    /// Parse and validate a config file, then print it with defaults filled in.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

/// Flags override values from the config file.
#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Path to amrm.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Protocol listener address.
    #[arg(long)]
    address: Option<SocketAddr>,

    /// Admin listener address.
    #[arg(long)]
    admin_address: Option<SocketAddr>,

    /// Worker threads serving RPCs.
    #[arg(long)]
    client_thread_count: Option<usize>,

    /// Check caller identity against the claimed attempt.
    #[arg(long, value_name = "BOOL")]
    security_enabled: Option<bool>,
}

impl ServeArgs {
    fn load_config(&self) -> anyhow::Result<AmrmConfig> {
        let mut config = match &self.config {
            Some(path) => load_file(path)?,
            None => AmrmConfig::default(),
        };

        if let Some(address) = self.address {
            config.server.address = address;
        }
        if let Some(address) = self.admin_address {
            config.server.admin_address = address;
        }
        if let Some(count) = self.client_thread_count {
            config.server.client_thread_count = count;
        }
        if let Some(enabled) = self.security_enabled {
            config.security.enabled = enabled;
        }

        config.validate()?;
        Ok(config)
    }
}

fn load_file(path: &Path) -> anyhow::Result<AmrmConfig> {
    AmrmConfig::from_file(path).with_context(|| format!("load config {}", path.display()))
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve(args) => serve(args),
        Command::CheckConfig { config } => {
            let config = load_file(&config)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.load_config()?;
    let threads = config.server.client_thread_count;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name("amrm-worker")
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    info!(
        threads,
        address = %config.server.address,
        admin_address = %config.server.admin_address,
        "amrmd starting"
    );

    runtime.block_on(daemon::run(config))
}
