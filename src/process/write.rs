// src/process/write.rs

use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, error};

use crate::error::PipelineError;
use crate::process::project::Record;

/// Field separator shared by the writer and the bulk loader.
pub const DELIMITER: u8 = b'|';

/// `<dir>/<archive stem>.<ext>`
pub fn output_path(dir: &Path, archive_name: &str, ext: &str) -> PathBuf {
    dir.join(Path::new(archive_name).with_extension(ext))
}

fn ensure_non_empty(archive_name: &str, records: &[Record]) -> Result<()> {
    if records.is_empty() {
        error!(archive = archive_name, "refusing to write an empty record batch");
        return Err(PipelineError::EmptyBatch(archive_name.to_string()).into());
    }
    Ok(())
}

fn is_lone_empty(rec: &Record) -> bool {
    rec.len() == 1 && rec.values().all(str::is_empty)
}

/// Write `records` as a pipe-delimited file with a header row taken from the
/// first record's keys. Returns the path written.
pub fn write_records_csv(dir: &Path, archive_name: &str, records: &[Record]) -> Result<PathBuf> {
    ensure_non_empty(archive_name, records)?;
    let path = output_path(dir, archive_name, "csv");

    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let mut wtr = WriterBuilder::new()
        .delimiter(DELIMITER)
        .from_writer(BufWriter::new(file));

    wtr.write_record(records[0].keys())?;
    for rec in records {
        if is_lone_empty(rec) {
            // csv writes this as `""`, which COPY loads as '' instead of NULL
            wtr.flush()?;
            let mut file: &File = wtr.get_ref().get_ref();
            file.write_all(b"\n")?;
        } else {
            wtr.write_record(rec.values())?;
        }
    }
    wtr.flush()
        .with_context(|| format!("flushing {}", path.display()))?;

    debug!(path = %path.display(), rows = records.len(), "wrote delimited file");
    Ok(path)
}

/// Same batch as a JSON array of objects, for eyeballing a load.
pub fn write_records_json(dir: &Path, archive_name: &str, records: &[Record]) -> Result<PathBuf> {
    ensure_non_empty(archive_name, records)?;
    let path = output_path(dir, archive_name, "json");

    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), records)
        .with_context(|| format!("writing {}", path.display()))?;

    debug!(path = %path.display(), rows = records.len(), "wrote JSON snapshot");
    Ok(path)
}
