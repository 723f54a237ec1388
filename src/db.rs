// src/db.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{
    postgres::{PgConnectOptions, PgConnection},
    Connection,
};
use std::path::Path;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
};
use tracing::{error, info, instrument};

use crate::config::Config;
use crate::error::PipelineError;

static TABLE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("table name regex is valid")
});

/// Reject anything that is not a plain (optionally schema-qualified) identifier.
pub fn validate_table_name(table: &str) -> Result<&str> {
    if TABLE_NAME.is_match(table) {
        Ok(table)
    } else {
        let reason = format!("{table:?} is not a table identifier");
        Err(PipelineError::config("TABLE_NAME", reason).into())
    }
}

const COPY_CHUNK: usize = 64 * 1024;

/// COPY statement for pipe-delimited rows where an empty field is NULL.
pub fn copy_statement(table: &str) -> String {
    format!("COPY {table} FROM STDIN WITH (FORMAT csv, DELIMITER '|', NULL '')")
}

/// A connection that can take a bulk copy of delimited rows.
#[async_trait]
pub trait BulkSink: Send {
    /// Append every row read from `rows` to `table` and commit; returns rows copied.
    async fn copy_rows(
        &mut self,
        table: &str,
        rows: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64>;
}

#[async_trait]
impl BulkSink for PgConnection {
    async fn copy_rows(
        &mut self,
        table: &str,
        rows: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64> {
        let mut tx = self.begin().await.context("starting copy transaction")?;
        let mut copy = tx
            .copy_in_raw(&copy_statement(table))
            .await
            .with_context(|| format!("starting COPY into {table}"))?;

        let mut buf = vec![0u8; COPY_CHUNK];
        loop {
            let n = rows.read(&mut buf).await.context("reading delimited rows")?;
            if n == 0 {
                break;
            }
            copy.send(buf[..n].to_vec())
                .await
                .with_context(|| format!("streaming rows into {table}"))?;
        }
        let copied = copy
            .finish()
            .await
            .with_context(|| format!("finishing COPY into {table}"))?;
        tx.commit().await.context("committing copy")?;
        Ok(copied)
    }
}

/// Opens a new sink connection.
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: BulkSink;

    async fn connect(&self) -> Result<Self::Conn>;
}

/// Postgres connection parameters. The user name is only sent for the
/// remote environment; local connections rely on the server's defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgConnector {
    pub host: String,
    pub database: String,
    pub user: Option<String>,
}

impl PgConnector {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let user = if cfg.is_remote() {
            Some(cfg.db_user()?.to_string())
        } else {
            None
        };
        Ok(Self {
            host: cfg.db_host()?.to_string(),
            database: cfg.db_name()?.to_string(),
            user,
        })
    }

    pub fn options(&self) -> PgConnectOptions {
        let opts = PgConnectOptions::new()
            .host(&self.host)
            .database(&self.database);
        match &self.user {
            Some(user) => opts.username(user),
            None => opts,
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Conn = PgConnection;

    async fn connect(&self) -> Result<PgConnection> {
        PgConnection::connect_with(&self.options())
            .await
            .with_context(|| format!("connecting to {}/{}", self.host, self.database))
    }
}

/// Database handle that connects on first use and hands out the same
/// connection to every later caller.
pub struct Database<C: Connector = PgConnector> {
    connector: C,
    conn: Option<C::Conn>,
    connects: usize,
}

impl<C: Connector> Database<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            conn: None,
            connects: 0,
        }
    }

    /// Number of times a connection was actually opened.
    pub fn connects(&self) -> usize {
        self.connects
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn connection(&mut self) -> Result<&mut C::Conn> {
        if self.conn.is_none() {
            info!("initializing db now");
            let conn = self.connector.connect().await.map_err(|e| {
                error!(error = %e, "failed to initialize DB");
                anyhow::Error::new(PipelineError::Sink(format!("{e:#}")))
            })?;
            self.conn = Some(conn);
            self.connects += 1;
        }
        self.conn
            .as_mut()
            .ok_or_else(|| PipelineError::Sink("connection unavailable".into()).into())
    }
}

/// Bulk-append the delimited file at `path` (header line skipped) to `table`.
#[instrument(level = "info", skip(db, path), fields(file = %path.as_ref().display()))]
pub async fn load_file<C: Connector>(
    db: &mut Database<C>,
    table: &str,
    path: impl AsRef<Path>,
) -> Result<u64> {
    let table = validate_table_name(table)?;
    let path = path.as_ref();

    let result = async {
        let file = File::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut header = String::new();
        reader
            .read_line(&mut header)
            .await
            .with_context(|| format!("reading header of {}", path.display()))?;

        let conn = db.connection().await?;
        let rows = conn.copy_rows(table, &mut reader).await?;
        Ok::<_, anyhow::Error>(rows)
    }
    .await;

    match result {
        Ok(rows) => {
            info!(rows, table, "loaded");
            Ok(rows)
        }
        Err(e) => {
            let msg = format!("{e:#}");
            error!(error = %msg, table, "failed to upload to DB");
            match e.downcast_ref::<PipelineError>() {
                Some(_) => Err(e),
                None => Err(e.context(PipelineError::Sink(format!("loading {}", path.display())))),
            }
        }
    }
}
