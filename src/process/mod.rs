// src/process/mod.rs
//
// Archive → records → delimited file. Everything here is synchronous; the
// driver runs it between the async fetch and load stages.

pub mod archive;
pub mod project;
pub mod write;

pub use archive::{county_from_name, list_archives, load_code_table, Extractor};
pub use project::{clean_field, project_records, CodeTable, EnrichmentTable, Placement, Record};
pub use write::{write_records_csv, write_records_json, DELIMITER};
