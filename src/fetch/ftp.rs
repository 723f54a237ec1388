// src/fetch/ftp.rs

use anyhow::{bail, Context, Result};
use percent_encoding::percent_decode_str;
use std::{fs::File, io, path::Path};
use suppaftp::{types::FileType, FtpStream};
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_FTP_PORT: u16 = 21;
const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

/// Connection details and working directory taken from an `ftp://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpTarget {
    pub addr: String,
    pub user: String,
    pub password: String,
    /// Decoded directory path, e.g. `/Tax Roll Data Files/2020F/NAL`.
    pub dir: String,
}

impl FtpTarget {
    pub fn from_url(url: &Url) -> Result<Self> {
        if url.scheme() != "ftp" {
            bail!("{url} is not an ftp:// address");
        }
        let host = url
            .host_str()
            .with_context(|| format!("{url} has no host"))?;
        let user = match url.username() {
            "" => ANONYMOUS_USER.to_string(),
            u => decode(u)?,
        };
        let password = match url.password() {
            Some(p) => decode(p)?,
            None => ANONYMOUS_PASSWORD.to_string(),
        };
        Ok(Self {
            addr: format!("{host}:{}", url.port().unwrap_or(DEFAULT_FTP_PORT)),
            user,
            password,
            dir: decode(url.path())?,
        })
    }

    fn session(&self) -> Result<FtpStream> {
        let mut ftp = FtpStream::connect(&self.addr)
            .with_context(|| format!("connecting to ftp {}", self.addr))?;
        ftp.login(&self.user, &self.password)
            .with_context(|| format!("ftp login as {}", self.user))?;
        if !self.dir.is_empty() && self.dir != "/" {
            ftp.cwd(&self.dir)
                .with_context(|| format!("ftp CWD {}", self.dir))?;
        }
        Ok(ftp)
    }
}

fn decode(s: &str) -> Result<String> {
    Ok(percent_decode_str(s)
        .decode_utf8()
        .with_context(|| format!("{s:?} is not UTF-8 once decoded"))?
        .into_owned())
}

fn quit(mut ftp: FtpStream) {
    if let Err(e) = ftp.quit() {
        warn!(error = %e, "ftp QUIT failed");
    }
}

/// `LIST` of the directory at `url`, one entry per line.
pub async fn list(url: &Url) -> Result<String> {
    let target = FtpTarget::from_url(url)?;
    tokio::task::spawn_blocking(move || {
        let mut ftp = target.session()?;
        let lines = ftp
            .list(None)
            .with_context(|| format!("ftp LIST {}", target.dir))?;
        debug!(entries = lines.len(), dir = %target.dir, "ftp listing");
        quit(ftp);
        Ok(lines.join("\n"))
    })
    .await
    .context("ftp listing task failed")?
}

/// `RETR name` from the directory at `base` into `dest`; returns bytes written.
pub async fn retrieve(base: &Url, name: &str, dest: &Path) -> Result<u64> {
    let target = FtpTarget::from_url(base)?;
    let name = name.to_string();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut ftp = target.session()?;
        ftp.transfer_type(FileType::Binary)
            .context("switching ftp to binary mode")?;

        let mut stream = ftp
            .retr_as_stream(&name)
            .with_context(|| format!("ftp RETR {name}"))?;
        let mut file =
            File::create(&dest).with_context(|| format!("creating {}", dest.display()))?;
        let n = io::copy(&mut stream, &mut file)
            .with_context(|| format!("writing {}", dest.display()))?;
        ftp.finalize_retr_stream(stream)
            .with_context(|| format!("finishing ftp RETR {name}"))?;

        quit(ftp);
        Ok(n)
    })
    .await
    .context("ftp download task failed")?
}
