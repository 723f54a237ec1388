use anyhow::Result;
use clap::Parser;
use nalscraper::{
    config::{Config, DEFAULT_CONFIG_PATH, DEFAULT_ENV},
    db::{Database, PgConnector},
    logging, pipeline,
};
use reqwest::Client;
use std::path::PathBuf;
use tracing::{error, info};

/// Fetch county NAL archives, project their records and bulk-load them.
#[derive(Debug, Parser)]
#[command(name = "nalscraper", version)]
struct Cli {
    /// JSON config file with one section per environment
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Config section to use; unknown labels fall back to DEFAULT
    #[arg(long, default_value = DEFAULT_ENV)]
    env: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ─── 1) config + logging ─────────────────────────────────────────
    let cfg = Config::load(&cli.config, Some(&cli.env))?;
    logging::init(
        cfg.settings.log_level.as_deref(),
        cfg.settings.log_file.as_deref(),
    )?;
    // config is read before the subscriber exists, so report the env choice here
    if cfg.fell_back_from(&cli.env) {
        info!(requested = %cli.env, selected = %cfg.env, "environment not configured; using DEFAULT");
    }
    info!(env = %cfg.env, config = %cli.config.display(), "startup");

    // ─── 2) run ──────────────────────────────────────────────────────
    let client = Client::new();
    let mut db = Database::new(PgConnector::from_config(&cfg)?);

    match pipeline::run(&cfg, &client, &mut db).await {
        Ok(summary) => {
            info!(?summary, "run complete");
            Ok(())
        }
        Err(e) => {
            let msg = format!("{e:#}");
            error!(error = %msg, "Process failure");
            Err(e)
        }
    }
}
