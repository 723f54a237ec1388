// src/pipeline.rs

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Instant;
use tracing::{error, info, instrument};
use url::Url;

use crate::config::Config;
use crate::db::{load_file, Connector, Database};
use crate::error::PipelineError;
use crate::fetch::{download_files, get_remote_filenames, ListingFilter};
use crate::process::{list_archives, write_records_csv, write_records_json, Extractor};

/// Counts from one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub listed: usize,
    pub downloaded: usize,
    pub download_failures: usize,
    pub archives_loaded: usize,
    pub rows_loaded: u64,
}

/// Listing → download → per archive: extract, write, bulk load.
///
/// Download failures are skipped; any other failure stops the run and is
/// returned after being logged.
#[instrument(level = "info", skip_all, fields(env = %cfg.env))]
pub async fn run<C: Connector>(
    cfg: &Config,
    client: &Client,
    db: &mut Database<C>,
) -> Result<RunSummary> {
    let start = Instant::now();

    // settings every stage needs, checked before touching the network
    let site = Url::parse(cfg.ftp_site()?)
        .map_err(|e| PipelineError::config("FTP_SITE", e.to_string()))?;
    let listing = Url::parse(cfg.listing_url()?)
        .map_err(|e| PipelineError::config("LISTING_URL", e.to_string()))?;
    let filter = ListingFilter::new(cfg.min_file_date()?, cfg.name_marker())?;
    let extractor = Extractor::from_config(cfg)?;
    let table = cfg.table_name()?.to_string();

    let mut summary = RunSummary::default();

    // ─── 1) listing ──────────────────────────────────────────────────
    let names = get_remote_filenames(client, &listing, &filter)
        .await
        .inspect_err(|e| error!(error = %e, "listing failed"))?;
    summary.listed = names.len();

    // ─── 2) downloads ────────────────────────────────────────────────
    let downloads = download_files(client, &site, &names, &extractor.download_dir).await?;
    summary.downloaded = downloads.fetched.len();
    summary.download_failures = downloads.failed.len();

    // ─── 3) every archive in the download dir ───────────────────────
    let archives = list_archives(&downloads.dir)?;
    info!(count = archives.len(), "archives to load");

    for name in archives {
        let rows = process_archive(cfg, &extractor, db, &table, &name)
            .await
            .inspect_err(|e| error!(archive = %name, error = %e, "process failure"))
            .with_context(|| format!("processing {name}"))?;
        summary.archives_loaded += 1;
        summary.rows_loaded += rows;
    }

    info!(?summary, elapsed = ?start.elapsed(), "all done");
    Ok(summary)
}

async fn process_archive<C: Connector>(
    cfg: &Config,
    extractor: &Extractor,
    db: &mut Database<C>,
    table: &str,
    name: &str,
) -> Result<u64> {
    info!(archive = %name, "processing");
    let records = extractor.extract_and_process(name)?;
    let csv_path = write_records_csv(&extractor.download_dir, name, &records)?;
    if cfg.settings.write_json {
        write_records_json(&extractor.download_dir, name, &records)?;
    }
    drop(records);
    load_file(db, table, &csv_path).await
}
