use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vacancy_intake::config::{Config, ConfigError};
use vacancy_intake::poller::{AccountPoller, connect_enabled_accounts, poll_all_accounts};
use vacancy_intake::{IngestError, Scheduler, Store};

#[derive(Parser)]
#[command(name = "vacancy-intake", about = "Turns job-board notification mail into applications")]
struct Cli {
    #[arg(short, long, default_value = "config/intake.toml")]
    config: PathBuf,

    /// Exchange each account's refresh token before connecting
    #[arg(long)]
    refresh_tokens: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll on a fixed interval until Ctrl-C
    Run,
    /// Poll every enabled account once and exit
    Once,
    /// Print row counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Install crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install rustls crypto provider")?;

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    let store = Arc::new(Store::open(&cfg.db_path)?);

    match cli.command {
        Command::Stats => {
            let counts = store.counts()?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Command::Once => {
            let pollers = connect(&cfg, store, cli.refresh_tokens).await?;
            let summary = poll_all_accounts(&pollers).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.failed_accounts.len() == pollers.len() {
                return Err("every account failed to list messages".into());
            }
        }
        Command::Run => {
            let pollers = connect(&cfg, store, cli.refresh_tokens).await?;
            let scheduler = Scheduler::new(
                pollers,
                Duration::from_secs(cfg.schedule.interval_secs),
                Duration::from_secs(cfg.schedule.retry_backoff_secs),
            );
            scheduler.start_background();

            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutting down");
            scheduler.stop().await;
        }
    }

    Ok(())
}

async fn connect(cfg: &Config, store: Arc<Store>, refresh: bool) -> Result<Vec<AccountPoller>, IngestError> {
    let pollers = connect_enabled_accounts(cfg, store, refresh).await;
    if pollers.is_empty() {
        return Err(ConfigError::Invalid("no enabled account could be connected".into()).into());
    }
    Ok(pollers)
}
