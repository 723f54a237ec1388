// src/fetch/listing.rs

use anyhow::{Context, Result};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, info, instrument, trace};
use url::Url;

use crate::error::PipelineError;
use crate::fetch::ftp;

/// Leading `M-D-YY` / `MM-DD-YY` token of a listing line.
static DATE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}-\d{1,2}-\d{1,2}").expect("date token regex is valid"));

const LISTING_DATE_FORMAT: &str = "%m-%d-%y";
const MIN_DATE_FORMAT: &str = "%m/%d/%y";

/// Accepts listing lines newer than `min_date` whose file name carries `marker`.
#[derive(Debug, Clone)]
pub struct ListingFilter {
    min_date: NaiveDate,
    name_pattern: Regex,
}

impl ListingFilter {
    /// `min_date` is `MM/DD/YY`; a malformed value is a configuration error.
    pub fn new(min_date: &str, marker: &str) -> Result<Self> {
        let min_date = NaiveDate::parse_from_str(min_date.trim(), MIN_DATE_FORMAT).map_err(|e| {
            PipelineError::config("MIN_FILE_DATE", format!("{min_date:?} is not MM/DD/YY: {e}"))
        })?;
        // size token, then the name: county word, free text, marker, .zip.
        // Only letters may touch the marker, so `Final` never counts as `nal`.
        let name_pattern = Regex::new(&format!(
            r"\d{{5,20}} ([A-Za-z]+ (?:.*[^A-Za-z])?(?i:{})(?:[^A-Za-z].*)?\.(?i:zip))",
            regex::escape(marker)
        ))
        .map_err(|e| PipelineError::config("NAME_MARKER", e.to_string()))?;

        Ok(Self {
            min_date,
            name_pattern,
        })
    }

    pub fn min_date(&self) -> NaiveDate {
        self.min_date
    }

    /// Date of a line's leading token, if it has a real one.
    pub fn line_date(line: &str) -> Option<NaiveDate> {
        let token = DATE_TOKEN.find(line)?;
        NaiveDate::parse_from_str(token.as_str(), LISTING_DATE_FORMAT).ok()
    }

    /// File name accepted from a single line, or `None` when either gate rejects it.
    pub fn accept(&self, line: &str) -> Option<String> {
        let date = Self::line_date(line)?;
        if date <= self.min_date {
            trace!(%date, "older than minimum date");
            return None;
        }
        let caps = self.name_pattern.captures(line)?;
        Some(caps[1].to_string())
    }

    /// Accepted names in source order.
    pub fn filter<'a, I>(&self, lines: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        lines.into_iter().filter_map(|l| self.accept(l)).collect()
    }
}

/// Read the raw listing text from `url` (`http(s)://`, `ftp://` or `file://`).
pub async fn fetch_listing(client: &Client, url: &Url) -> Result<String> {
    debug!(%url, "fetching listing");
    match url.scheme() {
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| anyhow::anyhow!("invalid file URL {}", url))?;
            tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading listing {}", path.display()))
        }
        "ftp" => ftp::list(url).await,
        _ => Ok(client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("Non-success status {}", url))?
            .text()
            .await
            .with_context(|| format!("Reading text from {}", url))?),
    }
}

/// List the remote site and return the archive names worth downloading.
#[instrument(level = "info", skip(client, filter), fields(min_date = %filter.min_date()))]
pub async fn get_remote_filenames(
    client: &Client,
    site: &Url,
    filter: &ListingFilter,
) -> Result<Vec<String>> {
    let text = fetch_listing(client, site).await?;
    let names = filter.filter(text.lines());
    info!(count = names.len(), %site, "accepted remote files");
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const LINE: &str = "11-10-20  12345 Duval Final NAL 2020.zip";

    #[test]
    fn strictly_newer_lines_are_accepted() -> Result<()> {
        let f = ListingFilter::new("11/09/20", "NAL")?;
        assert_eq!(f.accept(LINE).as_deref(), Some("Duval Final NAL 2020.zip"));

        let f = ListingFilter::new("11/11/20", "NAL")?;
        assert_eq!(f.accept(LINE), None);

        // same day is not "after"
        let f = ListingFilter::new("11/10/20", "NAL")?;
        assert_eq!(f.accept(LINE), None);
        Ok(())
    }

    #[test]
    fn lines_failing_a_gate_are_skipped_in_order() -> Result<()> {
        let f = ListingFilter::new("01/01/20", "NAL")?;
        let listing = "\
total 1234
12-01-20  12345 Alachua Final NAL 2020.zip
12-01-20  12345 Alachua Final SDF 2020.zip
1-2-21  9876543 Baker Prelim nal 2021.ZIP
01-01-20  12345 Bay Final NAL 2020.zip
13-40-20  12345 Broken Final NAL 2020.zip
drwxr-xr-x   2 ftp ftp  4096 readme.txt
12-05-20  12 Clay Final NAL 2020.zip
12-06-20  12345 Duval Final_NAL_2020.zip
12-06-20  12345 Dixie Final NAL2020.zip
12-06-20  12345 Gulf Final NALX 2020.zip
12-07-20  10:15AM  12345678 Hardee Final NAL 2020.zip
";
        assert_eq!(
            f.filter(listing.lines()),
            vec![
                "Alachua Final NAL 2020.zip".to_string(),
                "Baker Prelim nal 2021.ZIP".to_string(),
                "Duval Final_NAL_2020.zip".to_string(),
                "Dixie Final NAL2020.zip".to_string(),
                "Hardee Final NAL 2020.zip".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn malformed_min_date_is_a_config_error() {
        let err = ListingFilter::new("2020-11-09", "NAL").unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::Config { key, .. }) => assert_eq!(key, "MIN_FILE_DATE"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn line_date_parses_short_tokens() {
        assert_eq!(
            ListingFilter::line_date("1-2-21 foo"),
            NaiveDate::from_ymd_opt(2021, 1, 2)
        );
        assert_eq!(ListingFilter::line_date("foo 1-2-21"), None);
    }

    #[tokio::test]
    async fn remote_filenames_from_file_url() -> Result<()> {
        let mut tmp = NamedTempFile::new()?;
        writeln!(tmp, "{LINE}")?;
        writeln!(tmp, "11-08-20  12345 Dade Final NAL 2020.zip")?;
        let url = Url::from_file_path(tmp.path()).map_err(|_| anyhow::anyhow!("bad path"))?;

        let filter = ListingFilter::new("11/09/20", "NAL")?;
        let names = get_remote_filenames(&Client::new(), &url, &filter).await?;
        assert_eq!(names, vec!["Duval Final NAL 2020.zip".to_string()]);
        Ok(())
    }
}
