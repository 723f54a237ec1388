// src/error.rs

use thiserror::Error;

/// Failures the pipeline distinguishes between.
///
/// Stage functions return `anyhow::Result`; these variants travel inside the
/// `anyhow::Error` so the driver (and tests) can tell a bad setting apart from
/// bad data or a broken sink with `err.downcast_ref::<PipelineError>()`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required setting is absent or malformed.
    #[error("configuration error for {key}: {reason}")]
    Config { key: String, reason: String },

    /// A configured field is not present in a source row.
    #[error("row {row}: field {field} missing from source data")]
    MissingField { field: String, row: usize },

    /// A classification code has no entry in the lookup table.
    #[error("row {row}: no description for code {code:?} in field {field}")]
    UnknownCode {
        field: String,
        code: String,
        row: usize,
    },

    /// Nothing to write; headers are derived from the first record.
    #[error("record batch for {0} is empty")]
    EmptyBatch(String),

    /// The archive manifest has no entries.
    #[error("archive {0} contains no files")]
    EmptyArchive(String),

    /// Connection, copy or commit failed.
    #[error("database sink failure: {0}")]
    Sink(String),
}

impl PipelineError {
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
