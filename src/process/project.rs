// src/process/project.rs

use anyhow::{Context, Result};
use csv::StringRecord;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::{collections::HashMap, fmt, io::Read};
use tracing::{debug, instrument};

use crate::error::PipelineError;

/// Field that receives the archive's county ahead of it.
pub const COUNTY_CODE_FIELD: &str = "CO_NO";
pub const COUNTY_KEY: &str = "COUNTY";
/// Field whose land-use code is resolved to a description after it.
pub const LAND_USE_FIELD: &str = "DOR_UC";
pub const LAND_USE_DESC_KEY: &str = "DOR_UC_DESC";

/// Land-use code → description.
pub type CodeTable = HashMap<String, String>;

/// Strip backslashes (they break the bulk-load format) and surrounding whitespace.
pub fn clean_field(raw: &str) -> String {
    raw.replace('\\', "").trim().to_string()
}

/// One projected row: field names and values in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key`, or overwrite its value in place when already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut rec = Record::new();
        for (k, v) in iter {
            rec.insert(k, v);
        }
        rec
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Per-archive values the enrichment rules can draw on.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    /// Grouping value taken from the archive name (the county).
    pub context: &'a str,
    pub codes: &'a CodeTable,
    /// 1-based data row number, for error reports.
    pub row: usize,
}

/// Where a derived column goes relative to the field that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Before,
    After,
}

/// Computes a derived value from the cleaned field value.
pub type DeriveFn = fn(field: &str, value: &str, ctx: &RowContext<'_>) -> Result<String>;

#[derive(Clone)]
pub struct Enrichment {
    pub key: String,
    pub placement: Placement,
    pub derive: DeriveFn,
}

impl fmt::Debug for Enrichment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enrichment")
            .field("key", &self.key)
            .field("placement", &self.placement)
            .finish_non_exhaustive()
    }
}

/// Field identifier → extra column rule, consulted while projecting each field.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentTable {
    rules: HashMap<String, Enrichment>,
}

fn county_of(_field: &str, _value: &str, ctx: &RowContext<'_>) -> Result<String> {
    Ok(ctx.context.to_string())
}

fn land_use_description(field: &str, value: &str, ctx: &RowContext<'_>) -> Result<String> {
    ctx.codes.get(value).cloned().ok_or_else(|| {
        PipelineError::UnknownCode {
            field: field.to_string(),
            code: value.to_string(),
            row: ctx.row,
        }
        .into()
    })
}

impl EnrichmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// County ahead of `CO_NO`, land-use description after `DOR_UC`.
    pub fn standard() -> Self {
        Self::new()
            .with(COUNTY_CODE_FIELD, COUNTY_KEY, Placement::Before, county_of)
            .with(
                LAND_USE_FIELD,
                LAND_USE_DESC_KEY,
                Placement::After,
                land_use_description,
            )
    }

    pub fn with(
        mut self,
        field: impl Into<String>,
        key: impl Into<String>,
        placement: Placement,
        derive: DeriveFn,
    ) -> Self {
        self.rules.insert(
            field.into(),
            Enrichment {
                key: key.into(),
                placement,
                derive,
            },
        );
        self
    }

    pub fn get(&self, field: &str) -> Option<&Enrichment> {
        self.rules.get(field)
    }
}

/// Configured fields resolved against a header row.
#[derive(Debug, Clone)]
pub struct Projection<'a> {
    columns: Vec<(&'a str, usize)>,
    enrichments: &'a EnrichmentTable,
}

impl<'a> Projection<'a> {
    /// Every configured field must name a header column.
    pub fn new(
        headers: &StringRecord,
        fields: &'a [String],
        enrichments: &'a EnrichmentTable,
    ) -> Result<Self> {
        let index: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h, i)).collect();
        let columns = fields
            .iter()
            .map(|f| {
                index
                    .get(f.as_str())
                    .map(|&i| (f.as_str(), i))
                    .ok_or_else(|| PipelineError::MissingField {
                        field: f.clone(),
                        row: 0,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            columns,
            enrichments,
        })
    }

    /// Build the record for one data row.
    pub fn project(&self, row: &StringRecord, ctx: &RowContext<'_>) -> Result<Record> {
        let mut rec = Record::new();
        for &(field, idx) in &self.columns {
            let raw = row.get(idx).ok_or_else(|| PipelineError::MissingField {
                field: field.to_string(),
                row: ctx.row,
            })?;
            let value = clean_field(raw);

            match self.enrichments.get(field) {
                Some(rule) => {
                    let derived = (rule.derive)(field, &value, ctx)?;
                    match rule.placement {
                        Placement::Before => {
                            rec.insert(rule.key.as_str(), derived);
                            rec.insert(field, value);
                        }
                        Placement::After => {
                            rec.insert(field, value);
                            rec.insert(rule.key.as_str(), derived);
                        }
                    }
                }
                None => rec.insert(field, value),
            }
        }
        Ok(rec)
    }
}

/// Read every row of `reader` (header first) into a record batch.
#[instrument(level = "debug", skip_all, fields(context = context))]
pub fn project_records<R: Read>(
    reader: R,
    fields: &[String],
    enrichments: &EnrichmentTable,
    codes: &CodeTable,
    context: &str,
) -> Result<Vec<Record>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers().context("reading CSV header row")?.clone();
    let projection = Projection::new(&headers, fields, enrichments)?;

    let mut records = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let row = result.with_context(|| format!("CSV parse error at data row {}", i + 1))?;
        let ctx = RowContext {
            context,
            codes,
            row: i + 1,
        };
        records.push(projection.project(&row, &ctx)?);
    }

    debug!(rows = records.len(), "projected rows");
    Ok(records)
}
