// src/process/archive.rs

use anyhow::{Context, Result};
use glob::{glob_with, MatchOptions};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};
use zip::ZipArchive;

use crate::config::Config;
use crate::error::PipelineError;
use crate::process::project::{project_records, CodeTable, EnrichmentTable, Record};

/// County word ahead of the first underscore, e.g. `Duval_Final_NAL_2020.zip`.
static COUNTY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]+)_").expect("county regex is valid"));

/// Grouping value carried by an archive name; empty when it has none.
pub fn county_from_name(name: &str) -> &str {
    COUNTY_PREFIX
        .captures(name)
        .and_then(|c| c.get(1))
        .map_or("", |m| m.as_str())
}

/// Load the land-use lookup from a JSON object of code → description.
pub fn load_code_table(path: impl AsRef<Path>) -> Result<CodeTable> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        PipelineError::config("DOR_CODE_FILE", format!("{}: {e}", path.display()))
    })?;
    let table: CodeTable = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        PipelineError::config("DOR_CODE_FILE", format!("{}: {e}", path.display()))
    })?;
    Ok(table)
}

/// Everything extraction needs, checked before any archive is opened.
#[derive(Debug, Clone)]
pub struct Extractor {
    pub download_dir: PathBuf,
    pub fields: Vec<String>,
    pub codes: CodeTable,
    pub enrichments: EnrichmentTable,
}

impl Extractor {
    /// Fails when the code table, field list or download dir is not configured.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let codes = load_code_table(cfg.dor_code_file()?)?;
        let fields = cfg.csv_fields()?.to_vec();
        let download_dir = cfg.download_dir()?.to_path_buf();
        info!(codes = codes.len(), fields = fields.len(), "extractor ready");
        Ok(Self {
            download_dir,
            fields,
            codes,
            enrichments: EnrichmentTable::standard(),
        })
    }

    /// Unpack `<download_dir>/<archive_name>` next to itself and project the
    /// first file of its manifest.
    ///
    /// Archives are expected to hold a single CSV; anything after the first
    /// manifest entry is extracted but not read.
    #[instrument(level = "info", skip(self), fields(dir = %self.download_dir.display()))]
    pub fn extract_and_process(&self, archive_name: &str) -> Result<Vec<Record>> {
        let zip_path = self.download_dir.join(archive_name);
        let file = File::open(&zip_path)
            .with_context(|| format!("Failed to open ZIP file: {}", zip_path.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("Failed to read ZIP archive: {}", zip_path.display()))?;

        let county = county_from_name(archive_name);

        if archive.is_empty() {
            return Err(PipelineError::EmptyArchive(archive_name.to_string()).into());
        }
        let first = archive
            .by_index(0)
            .with_context(|| format!("Failed to access first entry of {}", archive_name))?
            .name()
            .to_string();

        archive.extract(&self.download_dir).with_context(|| {
            format!("extracting {} into {}", archive_name, self.download_dir.display())
        })?;
        drop(archive);

        let csv_path = self.download_dir.join(&first);
        let csv = File::open(&csv_path)
            .with_context(|| format!("opening extracted {}", csv_path.display()))?;
        let records = project_records(
            BufReader::new(csv),
            &self.fields,
            &self.enrichments,
            &self.codes,
            county,
        )?;

        info!(county, csv = %first, rows = records.len(), "archive processed");
        Ok(records)
    }
}

/// `*.zip` files in `dir` (any case), sorted by name.
pub fn list_archives(dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let dir = dir.as_ref();
    let pattern = format!("{}/*.zip", glob::Pattern::escape(&dir.to_string_lossy()));
    let options = MatchOptions {
        case_sensitive: false,
        ..Default::default()
    };
    let mut names = Vec::new();
    for entry in glob_with(&pattern, options)? {
        let path = entry.with_context(|| format!("listing {}", dir.display()))?;
        if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_zip;
    use std::fs;
    use tempfile::tempdir;

    fn extractor(dir: &Path) -> Extractor {
        Extractor {
            download_dir: dir.to_path_buf(),
            fields: vec!["CO_NO".into(), "DOR_UC".into()],
            codes: [("01".to_string(), "Residential".to_string())]
                .into_iter()
                .collect(),
            enrichments: EnrichmentTable::standard(),
        }
    }

    #[test]
    fn county_comes_from_the_name_prefix() {
        assert_eq!(county_from_name("Duval_Final_NAL_2020.zip"), "Duval");
        assert_eq!(county_from_name("St_Johns_Final_NAL_2020.zip"), "St");
        assert_eq!(county_from_name("12_Final.zip"), "");
        assert_eq!(county_from_name("Duval.zip"), "");
    }

    #[test]
    fn one_record_per_data_row() -> Result<()> {
        crate::logging::init_test_logging();
        let dir = tempdir()?;
        write_zip(
            &dir.path().join("Duval_Final_NAL_2020.zip"),
            &[
                ("NAL16F202001.csv", "CO_NO,PARCEL_ID,DOR_UC\n16,A1,01\n16,A2,01\n16,A3, 01 \n"),
                ("readme.txt", "ignored"),
            ],
        )?;

        let recs = extractor(dir.path()).extract_and_process("Duval_Final_NAL_2020.zip")?;
        assert_eq!(recs.len(), 3);
        assert!(recs.iter().all(|r| r.get("COUNTY") == Some("Duval")));
        assert_eq!(recs[2].get("DOR_UC_DESC"), Some("Residential"));
        // contents are unpacked alongside the archive
        assert!(dir.path().join("NAL16F202001.csv").is_file());
        assert!(dir.path().join("readme.txt").is_file());
        Ok(())
    }

    #[test]
    fn empty_archive_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        write_zip(&dir.path().join("Clay_Final_NAL_2020.zip"), &[])?;
        let err = extractor(dir.path())
            .extract_and_process("Clay_Final_NAL_2020.zip")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptyArchive(_))
        ));
        Ok(())
    }

    #[test]
    fn code_table_must_load() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("dor_codes.json");
        fs::write(&path, r#"{"00": "Vacant Residential", "01": "Single Family"}"#)?;
        let table = load_code_table(&path)?;
        assert_eq!(table.get("01").map(String::as_str), Some("Single Family"));

        let err = load_code_table(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Config { .. })
        ));
        Ok(())
    }

    #[test]
    fn preconditions_fail_before_any_archive_is_read() -> Result<()> {
        let cfg = Config::from_json(r#"{"DEFAULT": {"CSV_FIELDS": ["CO_NO"]}}"#, None)?;
        let err = Extractor::from_config(&cfg).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::Config { key, .. }) => assert_eq!(key, "DOR_CODE_FILE"),
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn archives_are_listed_in_name_order() -> Result<()> {
        let dir = tempdir()?;
        for name in ["b.zip", "a.ZIP", "c.csv"] {
            fs::write(dir.path().join(name), b"")?;
        }
        assert_eq!(list_archives(dir.path())?, ["a.ZIP", "b.zip"]);
        Ok(())
    }
}
