//! lockboxd: lockbox vault daemon
//!
//! Usage:
//!   lockboxd [--config /etc/lockbox/config.toml] [--listen 127.0.0.1:8080] [--data-dir DIR]
//!
//! On first start against an empty data directory the master key is
//! generated and logged once. Record it: registering users requires it.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use lockbox_core::config::LockboxConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lockboxd", version, about = "lockbox encrypted file vault daemon")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        long,
        short = 'c',
        env = "LOCKBOX_CONFIG",
        default_value = "/etc/lockbox/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "LOCKBOX_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "LOCKBOX_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// gRPC listen address; overrides the config file
    #[arg(long, env = "LOCKBOX_LISTEN")]
    listen: Option<String>,

    /// Root data directory; overrides the config file
    #[arg(long, env = "LOCKBOX_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The log setup depends on the config, so the loader's missing-file
    // warning fires before any subscriber exists; repeat it below.
    let config_exists = cli.config.exists();
    let mut config = LockboxConfig::load(&cli.config).await?;
    apply_overrides(&mut config, &cli);

    init_logging(&config.daemon.log_level, &config.daemon.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "lockboxd starting"
    );
    if !config_exists {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    lockboxd::daemon::run(config).await
}

fn apply_overrides(config: &mut LockboxConfig, cli: &Cli) {
    if let Some(level) = &cli.log {
        config.daemon.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.daemon.log_format = match format {
            LogFormat::Json => "json".into(),
            LogFormat::Text => "text".into(),
        };
    }
    if let Some(listen) = &cli.listen {
        config.daemon.listen = listen.clone();
    }
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
