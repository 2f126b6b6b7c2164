//! # dbchange-relay
//!
//! Relays PostgreSQL change notifications to an HTTP collection endpoint.
//! Configuration comes from files and `DBRELAY__*` variables; the flags
//! below override individual values.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

use dbchange_relay::config::{ConfigManager, LoadOptions, LogFormat, RelayConfig};
use dbchange_relay::logging::init_structured_logging;
use dbchange_relay::{Relay, ShutdownReport};

#[derive(Parser)]
#[command(name = "dbchange-relay")]
#[command(about = "Relay PostgreSQL change notifications to an HTTP endpoint")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file; replaces the config directory lookup
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding dbchange-relay.toml and dbchange-relay.<env>.toml
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Environment name (default: DBRELAY_ENV, APP_ENV, then development)
    #[arg(short, long)]
    environment: Option<String>,

    /// PostgreSQL connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Collection endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Notification channel to listen on
    #[arg(long)]
    channel: Option<String>,

    /// Number of forwarding workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Assume triggers are already installed
    #[arg(long)]
    skip_trigger_install: bool,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<CliLogFormat>,

    /// Validate configuration and exit
    #[arg(long)]
    check: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Pretty,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

impl Cli {
    fn apply_overrides(&self, config: &mut RelayConfig) {
        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.forwarder.endpoint = endpoint.clone();
        }
        if let Some(channel) = &self.channel {
            config.listener.channel = channel.clone();
        }
        if let Some(workers) = self.workers {
            config.workers.count = workers;
        }
        if self.skip_trigger_install {
            config.listener.install_triggers = false;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format.into();
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(Some(report)) if !report.is_clean() => {
            info!(
                pending_at_exit = report.pending_at_exit(),
                workers_aborted = report.workers.aborted,
                "dbchange-relay stopped with undelivered events"
            );
            process::exit(0);
        }
        Ok(_) => {
            info!("dbchange-relay stopped");
            process::exit(0);
        }
        Err(e) => {
            // Logging may not be initialised yet when configuration fails
            eprintln!("dbchange-relay: {e:#}");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<Option<ShutdownReport>> {
    let options = LoadOptions {
        config_file: cli.config.clone(),
        config_dir: cli.config_dir.clone(),
        environment: cli
            .environment
            .clone()
            .unwrap_or_else(ConfigManager::detect_environment),
        ..LoadOptions::default()
    };

    let manager = ConfigManager::load_with(options).context("loading configuration")?;
    let environment = manager.environment().to_string();
    let mut config = manager.into_config();
    cli.apply_overrides(&mut config);
    config.validate().context("validating configuration")?;

    init_structured_logging(&config.logging, &environment);

    if cli.check {
        println!("✅ Configuration valid for environment '{environment}'");
        println!("{config:#?}");
        return Ok(None);
    }

    let report = Relay::new(config)?
        .run()
        .await
        .inspect_err(|e| error!(error = %e, "dbchange-relay failed"))
        .context("relay terminated")?;
    Ok(Some(report))
}
