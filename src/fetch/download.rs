// src/fetch/download.rs

use anyhow::{Context, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, error, info, instrument};
use url::Url;

use crate::fetch::ftp;

/// An archive that made it to local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub remote_name: String,
    pub path: PathBuf,
}

/// Outcome of one download pass. Failed names are reported, not raised.
#[derive(Debug, Default)]
pub struct Downloads {
    pub dir: PathBuf,
    pub fetched: Vec<FetchedFile>,
    pub failed: Vec<(String, String)>,
}

/// Canonical remote address of `name` under `base`. The name is pushed as a
/// single path segment, so spaces become `%20` and `#`/`?` stay part of it.
pub fn remote_url(base: &Url, name: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("{base} cannot hold a file path"))?
        .pop_if_empty()
        .push(name);
    Ok(url)
}

/// Local file name for a remote name; spaces become underscores.
pub fn local_name(name: &str) -> String {
    name.replace(' ', "_")
}

async fn stream_to_file(client: &Client, url: &Url, dest: &Path) -> Result<u64> {
    let mut resp = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("GET {} failed", url))?
        .error_for_status()?;

    let mut file = fs::File::create(dest)
        .await
        .with_context(|| format!("creating {}", dest.display()))?;
    let mut written = 0u64;
    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk)
            .await
            .with_context(|| format!("writing {}", dest.display()))?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Copy one remote archive into `dest_dir`, returning its local path.
/// A partly written file is removed again on failure.
pub async fn download_file(
    client: &Client,
    base: &Url,
    name: &str,
    dest_dir: impl AsRef<Path>,
) -> Result<PathBuf> {
    let url = remote_url(base, name)?;
    let dest_path = dest_dir.as_ref().join(local_name(name));
    debug!(%url, dest = %dest_path.display(), "downloading");

    let fetched = match url.scheme() {
        "file" => match url.to_file_path() {
            Ok(src) => fs::copy(&src, &dest_path)
                .await
                .with_context(|| format!("copying {}", src.display())),
            Err(()) => Err(anyhow::anyhow!("invalid file URL {}", url)),
        },
        "ftp" => ftp::retrieve(base, name, &dest_path).await,
        _ => stream_to_file(client, &url, &dest_path).await,
    };

    match fetched {
        Ok(bytes) => {
            debug!(bytes, "fetched");
            Ok(dest_path)
        }
        Err(e) => {
            fs::remove_file(&dest_path).await.ok();
            Err(e)
        }
    }
}

/// Download every name in turn. A failure is logged and that file skipped;
/// only failing to create `dest_dir` aborts the pass.
#[instrument(level = "info", skip(client, names, dest_dir), fields(count = names.len()))]
pub async fn download_files(
    client: &Client,
    base: &Url,
    names: &[String],
    dest_dir: impl AsRef<Path>,
) -> Result<Downloads> {
    let dir = dest_dir.as_ref().to_path_buf();
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "download dir doesn't exist: creating it");
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let mut out = Downloads {
        dir,
        ..Default::default()
    };
    for name in names {
        match download_file(client, base, name, &out.dir).await {
            Ok(path) => {
                info!(file = %path.display(), "downloaded");
                out.fetched.push(FetchedFile {
                    remote_name: name.clone(),
                    path,
                });
            }
            Err(e) => {
                error!(name = %name, error = %e, "download failed; skipping");
                out.failed.push((name.clone(), e.to_string()));
            }
        }
    }

    info!(
        fetched = out.fetched.len(),
        failed = out.failed.len(),
        "download pass complete"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn remote_url_escapes_spaces() -> Result<()> {
        let base = Url::parse("ftp://sdrftp03.dor.state.fl.us/Tax Roll Data Files/2020F/NAL")?;
        let url = remote_url(&base, "Duval Final NAL 2020.zip")?;
        assert_eq!(
            url.as_str(),
            "ftp://sdrftp03.dor.state.fl.us/Tax%20Roll%20Data%20Files/2020F/NAL/Duval%20Final%20NAL%202020.zip"
        );
        assert_eq!(local_name("Duval Final NAL 2020.zip"), "Duval_Final_NAL_2020.zip");
        Ok(())
    }

    #[test]
    fn reserved_characters_stay_in_the_name() -> Result<()> {
        let base = Url::parse("https://example.org/nal/")?;
        let url = remote_url(&base, "Odd #1 NAL?.zip")?;
        assert_eq!(url.as_str(), "https://example.org/nal/Odd%20%231%20NAL%3F.zip");
        assert_eq!(url.fragment(), None);
        assert_eq!(url.query(), None);
        Ok(())
    }

    #[test]
    fn ftp_download_target_is_the_decoded_base_dir() -> Result<()> {
        let base = Url::parse("ftp://sdrftp03.dor.state.fl.us/Tax Roll Data Files/2020F/NAL/")?;
        let target = ftp::FtpTarget::from_url(&base)?;
        assert_eq!(target.dir, "/Tax Roll Data Files/2020F/NAL/");
        assert_eq!(
            remote_url(&base, "Duval Final NAL 2020.zip")?.path(),
            "/Tax%20Roll%20Data%20Files/2020F/NAL/Duval%20Final%20NAL%202020.zip"
        );
        Ok(())
    }

    #[tokio::test]
    async fn failures_are_skipped_and_the_rest_downloaded() -> Result<()> {
        crate::logging::init_test_logging();
        let remote = tempdir()?;
        std::fs::write(remote.path().join("Duval Final NAL 2020.zip"), b"PK-duval")?;
        std::fs::write(remote.path().join("Clay Final NAL 2020.zip"), b"PK-clay")?;
        let base = Url::from_directory_path(remote.path())
            .map_err(|_| anyhow::anyhow!("bad remote dir"))?;

        let local = tempdir()?;
        let dest = local.path().join("downloads");
        let names = vec![
            "Duval Final NAL 2020.zip".to_string(),
            "Missing Final NAL 2020.zip".to_string(),
            "Clay Final NAL 2020.zip".to_string(),
        ];

        let out = download_files(&Client::new(), &base, &names, &dest).await?;

        assert_eq!(out.dir, dest);
        assert_eq!(out.fetched.len(), 2);
        assert_eq!(out.failed.len(), 1);
        assert_eq!(out.failed[0].0, "Missing Final NAL 2020.zip");
        assert_eq!(out.fetched[1].remote_name, "Clay Final NAL 2020.zip");
        assert_eq!(
            std::fs::read(dest.join("Duval_Final_NAL_2020.zip"))?,
            b"PK-duval"
        );
        // nothing half-written is left behind for the failed name
        assert!(!dest.join("Missing_Final_NAL_2020.zip").exists());
        Ok(())
    }
}
