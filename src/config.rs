// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use crate::error::PipelineError;

pub const DEFAULT_CONFIG_PATH: &str = "./config/config.json";
pub const DEFAULT_ENV: &str = "DEFAULT";
/// Environment label whose database connection carries a user name.
pub const REMOTE_ENV: &str = "REMOTE";

/// One environment section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Settings {
    pub ftp_site: Option<String>,
    pub listing_url: Option<String>,
    pub min_file_date: Option<String>,
    pub data_download_dir: Option<PathBuf>,
    pub dor_code_file: Option<PathBuf>,
    pub csv_fields: Option<Vec<String>>,
    pub db_host: Option<String>,
    pub db_name: Option<String>,
    pub db_user: Option<String>,
    pub table_name: Option<String>,
    pub log_file: Option<PathBuf>,
    pub log_level: Option<String>,
    pub name_marker: Option<String>,
    #[serde(default)]
    pub write_json: bool,
}

/// Settings for the active environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub env: String,
    pub settings: Settings,
}

impl Config {
    /// Load `path` and select `env`, falling back to `DEFAULT` when the
    /// requested label is not a section of the file.
    pub fn load(path: impl AsRef<Path>, env: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json(&text, env).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_json(text: &str, env: Option<&str>) -> Result<Self> {
        let mut sections: HashMap<String, Settings> = serde_json::from_str(text)?;

        let env = match env {
            Some(e) if sections.contains_key(e) => e.to_string(),
            other => {
                if let Some(e) = other {
                    info!(requested = e, "environment not configured; using DEFAULT");
                }
                DEFAULT_ENV.to_string()
            }
        };
        let settings = sections
            .remove(&env)
            .ok_or_else(|| PipelineError::config(&env, "no such environment section"))?;

        info!(env = %env, "config loaded");
        Ok(Self { env, settings })
    }

    /// True when `requested` was not a section and `DEFAULT` was used instead.
    pub fn fell_back_from(&self, requested: &str) -> bool {
        self.env != requested
    }

    pub fn is_remote(&self) -> bool {
        self.env == REMOTE_ENV
    }

    pub fn ftp_site(&self) -> Result<&str> {
        require("FTP_SITE", self.settings.ftp_site.as_deref())
    }

    /// Where the directory listing is read from; the site itself unless overridden.
    pub fn listing_url(&self) -> Result<&str> {
        match self.settings.listing_url.as_deref() {
            Some(url) => Ok(url),
            None => self.ftp_site(),
        }
    }

    pub fn min_file_date(&self) -> Result<&str> {
        require("MIN_FILE_DATE", self.settings.min_file_date.as_deref())
    }

    pub fn download_dir(&self) -> Result<&Path> {
        require("DATA_DOWNLOAD_DIR", self.settings.data_download_dir.as_deref())
    }

    pub fn dor_code_file(&self) -> Result<&Path> {
        require("DOR_CODE_FILE", self.settings.dor_code_file.as_deref())
    }

    /// Ordered projection list; an empty list counts as missing.
    pub fn csv_fields(&self) -> Result<&[String]> {
        let fields = require("CSV_FIELDS", self.settings.csv_fields.as_deref())?;
        if fields.is_empty() {
            return Err(PipelineError::config("CSV_FIELDS", "field list is empty").into());
        }
        Ok(fields)
    }

    pub fn db_host(&self) -> Result<&str> {
        require("DB_HOST", self.settings.db_host.as_deref())
    }

    pub fn db_name(&self) -> Result<&str> {
        require("DB_NAME", self.settings.db_name.as_deref())
    }

    pub fn db_user(&self) -> Result<&str> {
        require("DB_USER", self.settings.db_user.as_deref())
    }

    pub fn table_name(&self) -> Result<&str> {
        require("TABLE_NAME", self.settings.table_name.as_deref())
    }

    pub fn name_marker(&self) -> &str {
        self.settings.name_marker.as_deref().unwrap_or("NAL")
    }
}

fn require<'a, T: ?Sized>(key: &str, value: Option<&'a T>) -> Result<&'a T> {
    value.ok_or_else(|| {
        warn!(key, "setting not configured");
        PipelineError::config(key, "not configured").into()
    })
}
